//! Field reflection: which attribute names a caller may read or write.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::envelope::JsonRecord;
use crate::error::{BridgeError, BridgeResult};
use crate::schema::{EntitySchema, ID_FIELD};

/// What to do with write attributes that are not writable on the entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFieldPolicy {
    /// Silently ignore them.
    #[default]
    Drop,
    /// Fail the write with `BridgeError::RejectedField`.
    Reject,
}

/// All direct attribute names of an entity type, the identifier included.
#[must_use]
pub fn legal_fields(schema: &EntitySchema) -> BTreeSet<&str> {
    schema.declared_attributes().map(|(name, _)| name).collect()
}

/// Filters a requested read field list.
///
/// Keeps direct attributes and dotted relation paths (resolved by the store),
/// drops everything else, removes duplicates, and appends the identifier when
/// the caller omitted it.
#[must_use]
pub fn read_fields(schema: &EntitySchema, requested: &[String]) -> Vec<String> {
    let legal = legal_fields(schema);
    let mut accepted: Vec<String> = Vec::with_capacity(requested.len() + 1);
    for name in requested {
        if accepted.contains(name) {
            continue;
        }
        if legal.contains(name.as_str()) || name.contains('.') {
            accepted.push(name.clone());
        } else {
            warn!(entity_type = %schema.name, field = %name, "excluding unknown read field");
        }
    }
    if !accepted.iter().any(|name| name == ID_FIELD) {
        accepted.push(ID_FIELD.to_string());
    }
    accepted
}

/// Keeps only the writable attributes of a value map.
///
/// Writable means a direct, declared attribute other than the identifier.
///
/// # Errors
///
/// Returns `BridgeError::RejectedField` for the first non-writable attribute
/// when `policy` is [`UnknownFieldPolicy::Reject`].
pub fn whitelist_write(
    schema: &EntitySchema,
    values: JsonRecord,
    policy: UnknownFieldPolicy,
) -> BridgeResult<JsonRecord> {
    let mut kept = JsonRecord::new();
    for (name, value) in values {
        if name != ID_FIELD && schema.field(&name).is_some() {
            kept.insert(name, value);
            continue;
        }
        match policy {
            UnknownFieldPolicy::Drop => {
                warn!(entity_type = %schema.name, field = %name, "dropping non-writable field");
            }
            UnknownFieldPolicy::Reject => {
                return Err(BridgeError::RejectedField {
                    entity_type: schema.name.clone(),
                    field: name,
                });
            }
        }
    }
    Ok(kept)
}
