//! Reference in-memory implementations of the storage-facing collaborator
//! contracts (C2, SAGA history). These are templates and test doubles, not
//! production stores — the core never ships a concrete database driver.

pub mod mock;
