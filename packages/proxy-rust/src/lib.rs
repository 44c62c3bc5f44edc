//! App proxy: a schema-agnostic JSON bridge that lets external clients
//! search and write records of any entity type through two entry points.
//!
//! - [`AppProxy`]: `search` / `write` orchestration over a [`RecordStore`]
//! - [`QueryExecutor`] / [`WriteDispatcher`]: per-entity-type read and write
//! - [`storage`]: backends, currently the in-memory [`MemoryStore`]
//! - [`service`]: tower pipeline (load shedding, timeout, metrics) for transports
//! - [`fixture`]: JSON fixtures that seed a store

pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod fixture;
pub mod proxy;
pub mod service;
pub mod storage;
pub mod traits;

pub use config::ProxyConfig;
pub use dispatcher::WriteDispatcher;
pub use executor::{QueryExecutor, SearchPlan};
pub use proxy::AppProxy;
pub use storage::MemoryStore;
pub use traits::{ReadQuery, RecordStore};
