//! JSON fixtures: entity schemas, seed records and bridge configuration.
//!
//! ```text
//! {
//!   "entities": [{"name": "party", "fields": [{"name": "name", "type": "char"}]}],
//!   "records": {"party": [{"name": "Acme"}]},
//!   "config": {"unknown_field_policy": "reject"}
//! }
//! ```
//!
//! Records are created in the order the entity types are declared, each type
//! numbered from 1, so relations may refer to records of earlier types (or
//! earlier records of the same type) by position.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context};
use app_proxy_core::normalize::inbound_values;
use app_proxy_core::reflector::{whitelist_write, UnknownFieldPolicy};
use app_proxy_core::{EntitySchema, JsonRecord};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ProxyConfig;
use crate::storage::MemoryStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub entities: Vec<EntitySchema>,
    /// Seed records per entity type, as JSON value maps.
    #[serde(default)]
    pub records: BTreeMap<String, Vec<JsonRecord>>,
    #[serde(default)]
    pub config: ProxyConfig,
}

impl Fixture {
    /// Parses fixture text.
    ///
    /// # Errors
    ///
    /// Returns an error if `text` is not a valid fixture document.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid fixture document")
    }

    /// Builds a [`MemoryStore`] holding the fixture's schemas and records.
    ///
    /// # Errors
    ///
    /// Returns an error if the schemas are inconsistent, records name an
    /// undeclared entity type or attribute, or a record fails validation.
    pub fn build_store(&self) -> anyhow::Result<MemoryStore> {
        let store = MemoryStore::new(self.entities.iter().cloned())?;
        if let Some(unknown) = self
            .records
            .keys()
            .find(|name| !self.entities.iter().any(|schema| &schema.name == *name))
        {
            return Err(anyhow!("records given for undeclared entity type {unknown}"));
        }
        for schema in &self.entities {
            let Some(rows) = self.records.get(&schema.name) else {
                continue;
            };
            for (position, row) in rows.iter().enumerate() {
                let values = whitelist_write(schema, row.clone(), UnknownFieldPolicy::Reject)
                    .with_context(|| format!("record {position} of {}", schema.name))?;
                store
                    .insert(&schema.name, vec![inbound_values(schema, values)])
                    .with_context(|| format!("record {position} of {}", schema.name))?;
            }
        }
        Ok(store)
    }
}

/// Reads a fixture file and builds its store.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the fixture is invalid.
pub async fn load_fixture(path: &Path) -> anyhow::Result<(MemoryStore, ProxyConfig)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture = Fixture::from_json(&text)?;
    let store = fixture.build_store()?;
    info!(
        path = %path.display(),
        entity_types = fixture.entities.len(),
        records = fixture.records.values().map(Vec::len).sum::<usize>(),
        "fixture loaded"
    );
    Ok((store, fixture.config))
}
