use std::sync::Arc;

use app_proxy_core::{Domain, EntitySchema, OrderTerm, Record, RecordId};
use async_trait::async_trait;

/// Everything a store needs to answer one read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadQuery {
    /// Conjunctive filter. Empty matches every record.
    pub domain: Domain,
    /// Attribute names or one-hop dotted paths to project. Empty means every
    /// declared attribute.
    pub fields: Vec<String>,
    pub offset: usize,
    /// `None` means no limit.
    pub limit: Option<usize>,
    /// Resolved ordering; never empty when built by the bridge.
    pub order: Vec<OrderTerm>,
}

/// Capability interface of a backing record store, implemented once per
/// backend.
///
/// Failures are reported as `anyhow::Error`; the bridge attaches the entity
/// type and classifies them as query or write failures.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Looks up the schema of an entity type. `None` if the type is unknown.
    fn resolve_entity_type(&self, name: &str) -> Option<Arc<EntitySchema>>;

    /// Reads the records matching `query`, projected to `query.fields`.
    async fn read(&self, entity_type: &str, query: &ReadQuery) -> anyhow::Result<Vec<Record>>;

    /// Writes `values` to every record in `ids`. Every identifier must exist.
    async fn update(
        &self,
        entity_type: &str,
        ids: &[RecordId],
        values: &Record,
    ) -> anyhow::Result<()>;

    /// Creates one record per value map and returns the created records,
    /// identifier included, in submission order.
    async fn create(&self, entity_type: &str, values: Vec<Record>) -> anyhow::Result<Vec<Record>>;
}
