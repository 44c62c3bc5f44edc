//! App proxy core: native value types, entity schemas, the JSON envelope
//! codec, domain translation, field reflection and value normalization.
//!
//! Everything here is synchronous and store-agnostic. The async bridge that
//! drives a record store lives in the `app-proxy` crate.

pub mod domain;
pub mod envelope;
pub mod error;
pub mod normalize;
pub mod reflector;
pub mod schema;
pub mod types;

pub use domain::{Condition, Domain};
pub use envelope::{
    JsonRecord, SearchGroup, SearchRequest, WriteEntry, WriteGroup, WriteRequest, ACK,
};
pub use error::{BridgeError, BridgeResult};
pub use reflector::UnknownFieldPolicy;
pub use schema::{EntitySchema, FieldDef, FieldType, OrderTerm, SortDirection, ID_FIELD};
pub use types::{Record, RecordId, Value};
