//! Record store backends.
//!
//! - [`memory`]: in-memory store with relations, used for fixtures and tests
//! - `path` / `predicate`: field path resolution and condition evaluation
//!   shared by the in-memory backend

pub mod memory;
mod path;
mod predicate;

pub use memory::MemoryStore;
