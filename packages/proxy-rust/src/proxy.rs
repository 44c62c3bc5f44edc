//! Batch orchestration: the `search` and `write` entry points.

use std::collections::BTreeMap;
use std::sync::Arc;

use app_proxy_core::envelope::{self, decode_search, decode_write};
use app_proxy_core::normalize::outbound_record;
use app_proxy_core::{BridgeError, BridgeResult, JsonRecord, Record, RecordId};
use futures_util::{stream, StreamExt, TryStreamExt};
use serde_json::Value as JsonValue;
use tracing::{debug, info_span, Instrument};

use crate::config::ProxyConfig;
use crate::dispatcher::WriteDispatcher;
use crate::executor::{QueryExecutor, SearchPlan};
use crate::traits::RecordStore;

/// Schema-agnostic JSON bridge over a [`RecordStore`].
///
/// Stateless between calls. Groups of one request run concurrently up to
/// [`ProxyConfig::max_concurrent_groups`]; results are keyed by entity type so
/// the response does not depend on completion order.
pub struct AppProxy {
    config: Arc<ProxyConfig>,
    executor: QueryExecutor,
    dispatcher: WriteDispatcher,
}

impl AppProxy {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, config: ProxyConfig) -> Self {
        Self {
            executor: QueryExecutor::new(Arc::clone(&store)),
            dispatcher: WriteDispatcher::new(store, config.unknown_field_policy),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    fn concurrency(&self) -> usize {
        self.config.max_concurrent_groups.max(1)
    }

    /// Runs a search request and returns the encoded result.
    ///
    /// Every group is decoded and its domain translated before the store is
    /// called, so malformed input never reaches the store. When the same
    /// entity type appears twice, the later group wins.
    ///
    /// # Errors
    ///
    /// - `MalformedEnvelope` for invalid request text or domains.
    /// - `EmptyResult` when no group produced a record.
    /// - Any store or serialization failure of a group; no partial result is
    ///   returned.
    pub async fn search(&self, raw: &str) -> BridgeResult<String> {
        let request = decode_search(raw)?;
        let plans = request
            .groups
            .into_iter()
            .map(SearchPlan::from_group)
            .collect::<BridgeResult<Vec<_>>>()?;

        let span = info_span!("search", groups = plans.len());
        async move {
            let groups: Vec<(String, Vec<JsonRecord>)> = stream::iter(plans)
                .map(|plan| async move {
                    let entity_type = plan.entity_type.clone();
                    let records = self.executor.execute(plan).await?;
                    debug!(%entity_type, records = records.len(), "group searched");
                    Ok::<_, BridgeError>((entity_type, records))
                })
                .buffered(self.concurrency())
                .try_collect()
                .await?;
            let result: BTreeMap<String, Vec<JsonRecord>> = groups.into_iter().collect();
            envelope::encode_search_result(result)
        }
        .instrument(span)
        .await
    }

    /// Runs a write request and returns the created identifiers per entity
    /// type, or [`app_proxy_core::ACK`] when nothing was created.
    ///
    /// # Errors
    ///
    /// - `MalformedEnvelope` for invalid request text.
    /// - `UnknownEntityType`, `RejectedField` or `StoreWriteFailure` from any
    ///   group. Groups already applied are not rolled back.
    pub async fn write(&self, raw: &str) -> BridgeResult<String> {
        let request = decode_write(raw)?;

        let span = info_span!("write", groups = request.groups.len());
        async move {
            let groups: Vec<(String, Vec<RecordId>)> = stream::iter(request.groups)
                .map(|group| async move {
                    let entity_type = group.entity_type.clone();
                    let entries = group.entries.len();
                    let created = self.dispatcher.apply(group).await?;
                    debug!(%entity_type, entries, created = created.len(), "group written");
                    Ok::<_, BridgeError>((entity_type, created))
                })
                .buffered(self.concurrency())
                .try_collect()
                .await?;
            let created: BTreeMap<String, Vec<RecordId>> = groups
                .into_iter()
                .filter(|(_, ids)| !ids.is_empty())
                .collect();
            envelope::encode_created(created)
        }
        .instrument(span)
        .await
    }

    /// Normalizes native records and encodes them as a JSON array.
    ///
    /// For endpoints that build their own records; an empty slice encodes as
    /// `[]` rather than failing.
    ///
    /// # Errors
    ///
    /// Returns `SerializationFailure` if a value has no JSON-safe form.
    pub fn dump_values(&self, records: &[Record]) -> BridgeResult<String> {
        let values = records
            .iter()
            .map(|record| outbound_record(record).map(JsonValue::Object))
            .collect::<BridgeResult<Vec<_>>>()?;
        envelope::encode(&JsonValue::Array(values))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
