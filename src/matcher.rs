//! Transition matcher (C5): finds the unique valid transition for a
//! `(current-state, event, payload)` triple.
//!
//! A pure function over the definition and an explicit `skip_event_check`
//! flag — used when chaining automatic transitions after the first hop,
//! where the entity's new state must be matched against any transition
//! regardless of which event originally arrived.

use std::hash::Hash;

use crate::definition::{DefinitionError, Transition, WorkflowDefinition};

/// Outcome of a single match attempt.
pub enum MatchResult<'a, T, S, P> {
    /// Exactly one transition's `from`+`event`+`conditions` matched.
    Found(&'a Transition<T, S, P>),
    /// No transition in the definition satisfied all three predicates.
    None,
}

/// Find the unique valid transition for `entity` at `current_state`
/// reacting to `event` with `payload`.
///
/// When `skip_event_check` is set, the `event` filter is ignored and any
/// transition whose `from` contains `current_state` is a candidate —
/// this is how automatic chaining works after a successful step.
pub fn find_transition<'a, T, S, P>(
    definition: &'a WorkflowDefinition<T, S, P>,
    current_state: &S,
    event: &str,
    entity: &T,
    payload: &P,
    skip_event_check: bool,
) -> Result<MatchResult<'a, T, S, P>, DefinitionError>
where
    S: Eq + Hash + std::fmt::Debug,
{
    let candidates: Vec<&Transition<T, S, P>> = definition
        .transitions
        .iter()
        .filter(|t| t.from.contains(current_state))
        .filter(|t| skip_event_check || t.event == event)
        .filter(|t| t.conditions.iter().all(|cond| cond(entity, payload)))
        .collect();

    if candidates.is_empty() {
        return Ok(MatchResult::None);
    }

    let mut distinct_destinations: Vec<&S> = Vec::new();
    for t in &candidates {
        if !distinct_destinations.contains(&&t.to) {
            distinct_destinations.push(&t.to);
        }
    }

    if distinct_destinations.len() > 1 {
        return Err(DefinitionError::AmbiguousTransition(
            definition.name.clone(),
            format!("{:?}", current_state),
            event.to_string(),
        ));
    }

    Ok(MatchResult::Found(candidates[0]))
}
