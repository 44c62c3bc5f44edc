//! Attribute paths and their resolution against table snapshots.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use app_proxy_core::{EntitySchema, FieldType, Record, RecordId, Value, ID_FIELD};

static ID_TYPE: FieldType = FieldType::Integer;

/// A validated attribute name or one-hop dotted path.
#[derive(Debug, Clone)]
pub(crate) enum FieldPath {
    /// An attribute of the record itself.
    Direct { name: String, field_type: FieldType },
    /// An attribute of the record(s) referenced by a relation attribute.
    Related {
        relation: String,
        relation_type: FieldType,
        target: Arc<EntitySchema>,
        name: String,
        field_type: FieldType,
    },
}

impl FieldPath {
    /// Validates `path` against `schema`, looking relation targets up with `lookup`.
    pub(crate) fn compile(
        schema: &EntitySchema,
        path: &str,
        lookup: impl Fn(&str) -> Option<Arc<EntitySchema>>,
    ) -> anyhow::Result<Self> {
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default();
        let tail = parts.next();
        if parts.next().is_some() {
            bail!("path {path} on {} follows more than one relation", schema.name);
        }
        let head_type = schema
            .field_type(head)
            .ok_or_else(|| anyhow!("{} has no attribute {head}", schema.name))?
            .clone();
        let Some(tail) = tail else {
            return Ok(Self::Direct {
                name: head.to_string(),
                field_type: head_type,
            });
        };
        let target_name = head_type
            .relation_target()
            .ok_or_else(|| anyhow!("{}.{head} is not a relation", schema.name))?;
        let target = lookup(target_name).ok_or_else(|| {
            anyhow!(
                "{}.{head} targets unknown entity type {target_name}",
                schema.name
            )
        })?;
        let field_type = target
            .field_type(tail)
            .ok_or_else(|| anyhow!("{target_name} has no attribute {tail}"))?
            .clone();
        Ok(Self::Related {
            relation: head.to_string(),
            relation_type: head_type,
            target,
            name: tail.to_string(),
            field_type,
        })
    }

    /// Whether the path can yield several values per record.
    pub(crate) fn is_to_many(&self) -> bool {
        match self {
            Self::Direct { field_type, .. } => is_to_many(field_type),
            Self::Related {
                relation_type,
                field_type,
                ..
            } => is_to_many(relation_type) || is_to_many(field_type),
        }
    }

    /// Declared type of a single value reached by this path. To-many
    /// attributes hold identifiers.
    pub(crate) fn element_type(&self) -> &FieldType {
        let field_type = match self {
            Self::Direct { field_type, .. } | Self::Related { field_type, .. } => field_type,
        };
        if is_to_many(field_type) {
            &ID_TYPE
        } else {
            field_type
        }
    }

    /// Tables other than the record's own that resolving this path reads.
    pub(crate) fn tables(&self) -> Vec<&str> {
        let mut tables = Vec::new();
        match self {
            Self::Direct { field_type, .. } => {
                if let FieldType::One2Many { target, .. } = field_type {
                    tables.push(target.as_str());
                }
            }
            Self::Related {
                target, field_type, ..
            } => {
                tables.push(target.name.as_str());
                if let FieldType::One2Many { target, .. } = field_type {
                    tables.push(target.as_str());
                }
            }
        }
        tables
    }
}

fn is_to_many(field_type: &FieldType) -> bool {
    matches!(
        field_type,
        FieldType::One2Many { .. } | FieldType::Many2Many { .. }
    )
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time copies of the tables a read touches, so that paths resolve
/// without holding any lock.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    tables: HashMap<String, BTreeMap<RecordId, Record>>,
}

impl Snapshot {
    pub(crate) fn insert(&mut self, entity_type: &str, rows: BTreeMap<RecordId, Record>) {
        self.tables.insert(entity_type.to_string(), rows);
    }

    pub(crate) fn contains(&self, entity_type: &str) -> bool {
        self.tables.contains_key(entity_type)
    }

    pub(crate) fn rows(&self, entity_type: &str) -> impl Iterator<Item = (&RecordId, &Record)> {
        self.tables.get(entity_type).into_iter().flatten()
    }

    fn row(&self, entity_type: &str, id: RecordId) -> Option<&Record> {
        self.tables.get(entity_type).and_then(|rows| rows.get(&id))
    }

    /// Value of a direct attribute. Missing scalars read as `Null`, missing
    /// to-many attributes as an empty list.
    fn attribute(&self, id: RecordId, row: &Record, name: &str, field_type: &FieldType) -> Value {
        if name == ID_FIELD {
            return Value::Int(id);
        }
        match field_type {
            FieldType::One2Many { target, field } => Value::List(
                self.rows(target)
                    .filter(|(_, other)| other.get(field).and_then(Value::as_i64) == Some(id))
                    .map(|(other_id, _)| Value::Int(*other_id))
                    .collect(),
            ),
            FieldType::Many2Many { .. } => {
                row.get(name).cloned().unwrap_or(Value::List(Vec::new()))
            }
            _ => row.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    /// Resolves `path` for the record `id`.
    pub(crate) fn resolve(&self, id: RecordId, row: &Record, path: &FieldPath) -> Value {
        match path {
            FieldPath::Direct { name, field_type } => self.attribute(id, row, name, field_type),
            FieldPath::Related {
                relation,
                relation_type,
                target,
                name,
                field_type,
            } => {
                let follow = |related: RecordId| {
                    self.row(&target.name, related)
                        .map_or(Value::Null, |other| {
                            self.attribute(related, other, name, field_type)
                        })
                };
                match self.attribute(id, row, relation, relation_type) {
                    Value::Int(related) => follow(related),
                    Value::List(related) => {
                        let mut values = Vec::new();
                        for value in related.iter().filter_map(Value::as_i64).map(follow) {
                            match value {
                                Value::List(nested) => values.extend(nested),
                                Value::Null => {}
                                other => values.push(other),
                            }
                        }
                        Value::List(values)
                    }
                    _ => Value::Null,
                }
            }
        }
    }
}
