//! Write dispatch for one entity-type group: identifier-sign classification,
//! whitelisting, inbound normalization and batched store calls.

use std::sync::Arc;

use anyhow::anyhow;
use app_proxy_core::normalize::inbound_values;
use app_proxy_core::reflector::{whitelist_write, UnknownFieldPolicy};
use app_proxy_core::{
    BridgeError, BridgeResult, EntitySchema, Record, RecordId, WriteGroup, ID_FIELD,
};
use tracing::debug;

use crate::traits::RecordStore;

/// Updates and creations of one group, already whitelisted and normalized.
#[derive(Debug, Default, PartialEq)]
struct Partition {
    /// Consecutive updates with identical values share one entry.
    updates: Vec<(Vec<RecordId>, Record)>,
    creations: Vec<Record>,
}

/// Applies write groups to a [`RecordStore`].
#[derive(Clone)]
pub struct WriteDispatcher {
    store: Arc<dyn RecordStore>,
    policy: UnknownFieldPolicy,
}

impl WriteDispatcher {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, policy: UnknownFieldPolicy) -> Self {
        Self { store, policy }
    }

    /// Applies one group and returns the identifiers it created, in request order.
    ///
    /// Every value map is whitelisted before the first store call, so a
    /// rejected field leaves the group untouched. Updates run before
    /// creations; a failing update aborts the rest of the group without
    /// undoing earlier ones.
    ///
    /// # Errors
    ///
    /// - `UnknownEntityType` if the store does not know the entity type.
    /// - `RejectedField` for a non-writable field under the strict policy.
    /// - `StoreWriteFailure` if an update or the create call fails, or the
    ///   store returns a different number of created records than requested.
    pub async fn apply(&self, group: WriteGroup) -> BridgeResult<Vec<RecordId>> {
        let schema = self
            .store
            .resolve_entity_type(&group.entity_type)
            .ok_or_else(|| BridgeError::UnknownEntityType {
                name: group.entity_type.clone(),
            })?;
        let partition = self.partition(&schema, group)?;
        let entity_type = schema.name.as_str();
        let failure = |source: anyhow::Error| BridgeError::StoreWriteFailure {
            entity_type: entity_type.to_string(),
            source,
        };

        for (ids, values) in &partition.updates {
            self.store
                .update(entity_type, ids, values)
                .await
                .map_err(failure)?;
        }
        debug!(entity_type, calls = partition.updates.len(), "updates applied");

        if partition.creations.is_empty() {
            return Ok(Vec::new());
        }
        let requested = partition.creations.len();
        let created = self
            .store
            .create(entity_type, partition.creations)
            .await
            .map_err(failure)?;
        if created.len() != requested {
            return Err(failure(anyhow!(
                "store created {} records, {requested} were requested",
                created.len()
            )));
        }
        let ids = created
            .iter()
            .map(|record| {
                record
                    .get(ID_FIELD)
                    .and_then(app_proxy_core::Value::as_i64)
                    .ok_or_else(|| failure(anyhow!("created record carries no identifier")))
            })
            .collect::<BridgeResult<Vec<_>>>()?;
        debug!(entity_type, created = ids.len(), "records created");
        Ok(ids)
    }

    fn partition(&self, schema: &EntitySchema, group: WriteGroup) -> BridgeResult<Partition> {
        let mut partition = Partition::default();
        for entry in group.entries {
            let creation = entry.is_creation();
            let values = whitelist_write(schema, entry.values, self.policy)?;
            let values = inbound_values(schema, values);
            match entry.id {
                Some(id) if !creation => match partition.updates.last_mut() {
                    Some((ids, previous)) if *previous == values => ids.push(id),
                    _ => partition.updates.push((vec![id], values)),
                },
                _ => partition.creations.push(values),
            }
        }
        Ok(partition)
    }
}
