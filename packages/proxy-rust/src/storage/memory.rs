//! In-memory [`RecordStore`] with relations, validation and SQL-like filtering.
//!
//! The schema registry is fixed at construction. Each entity type owns one
//! table behind a `parking_lot::RwLock`; reads copy the tables they touch and
//! evaluate without holding any lock, so no two locks are ever held at once.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use app_proxy_core::{EntitySchema, FieldType, Record, RecordId, SortDirection, Value, ID_FIELD};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::path::{FieldPath, Snapshot};
use super::predicate::Predicate;
use crate::traits::{ReadQuery, RecordStore};

#[derive(Debug)]
struct Table {
    rows: BTreeMap<RecordId, Record>,
    next_id: RecordId,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }
}

/// Record store held entirely in memory. Identifiers are assigned
/// sequentially from 1 per entity type.
#[derive(Debug)]
pub struct MemoryStore {
    schemas: HashMap<String, Arc<EntitySchema>>,
    tables: HashMap<String, RwLock<Table>>,
}

impl MemoryStore {
    /// Builds a store for the given entity types.
    ///
    /// # Errors
    ///
    /// Returns an error if two schemas share a name, a relation targets an
    /// undeclared entity type, or a one-to-many attribute does not mirror a
    /// many-to-one attribute of its target.
    pub fn new(schemas: impl IntoIterator<Item = EntitySchema>) -> anyhow::Result<Self> {
        let mut registry = HashMap::new();
        for schema in schemas {
            let name = schema.name.clone();
            if registry.insert(name.clone(), Arc::new(schema)).is_some() {
                bail!("entity type {name} is declared twice");
            }
        }
        for schema in registry.values() {
            for field in &schema.fields {
                let Some(target) = field.field_type.relation_target() else {
                    continue;
                };
                let target_schema = registry.get(target).ok_or_else(|| {
                    anyhow!("{}.{} targets unknown entity type {target}", schema.name, field.name)
                })?;
                if let FieldType::One2Many { field: inverse, .. } = &field.field_type {
                    let mirrored = matches!(
                        target_schema.field_type(inverse),
                        Some(FieldType::Many2One { target }) if *target == schema.name
                    );
                    if !mirrored {
                        bail!(
                            "{}.{} expects {target}.{inverse} to reference {}",
                            schema.name,
                            field.name,
                            schema.name
                        );
                    }
                }
            }
        }
        let tables = registry
            .keys()
            .map(|name| (name.clone(), RwLock::new(Table::default())))
            .collect();
        Ok(Self {
            schemas: registry,
            tables,
        })
    }

    /// Names of all registered entity types, sorted.
    #[must_use]
    pub fn entity_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of stored records of an entity type, or `None` if it is unknown.
    #[must_use]
    pub fn count(&self, entity_type: &str) -> Option<usize> {
        self.tables.get(entity_type).map(|table| table.read().rows.len())
    }

    /// Creates records synchronously. Used for seeding and by [`RecordStore::create`].
    ///
    /// # Errors
    ///
    /// Returns an error if any value map fails validation; nothing is created then.
    pub fn insert(&self, entity_type: &str, values: Vec<Record>) -> anyhow::Result<Vec<Record>> {
        let schema = self.schema(entity_type)?;
        for row in &values {
            self.validate(&schema, row, true)?;
        }
        let mut table = self.table(entity_type)?.write();
        let mut created = Vec::with_capacity(values.len());
        for row in values {
            let id = table.next_id;
            table.next_id += 1;
            let mut record = row.clone();
            record.insert(ID_FIELD.to_string(), Value::Int(id));
            table.rows.insert(id, row);
            created.push(record);
        }
        debug!(entity_type, created = created.len(), "records created");
        Ok(created)
    }

    fn schema(&self, entity_type: &str) -> anyhow::Result<Arc<EntitySchema>> {
        self.schemas
            .get(entity_type)
            .cloned()
            .ok_or_else(|| anyhow!("unknown entity type {entity_type}"))
    }

    fn table(&self, entity_type: &str) -> anyhow::Result<&RwLock<Table>> {
        self.tables
            .get(entity_type)
            .ok_or_else(|| anyhow!("unknown entity type {entity_type}"))
    }

    fn lookup(&self) -> impl Fn(&str) -> Option<Arc<EntitySchema>> + '_ {
        move |name: &str| self.schemas.get(name).cloned()
    }

    /// Checks a value map against the schema. With `creating`, required
    /// attributes must be present and non-null.
    fn validate(&self, schema: &EntitySchema, row: &Record, creating: bool) -> anyhow::Result<()> {
        for (name, value) in row {
            let field = schema
                .field(name)
                .ok_or_else(|| anyhow!("{} has no writable attribute {name}", schema.name))?;
            if matches!(field.field_type, FieldType::One2Many { .. }) {
                bail!("{}.{name} is computed and cannot be written", schema.name);
            }
            if !field.field_type.accepts(value) {
                bail!(
                    "{}.{name} cannot hold a {} value",
                    schema.name,
                    value.type_name()
                );
            }
            if field.required && value.is_null() {
                bail!("{}.{name} is required", schema.name);
            }
            if let Some(target) = field.field_type.relation_target() {
                let referenced: Vec<RecordId> = match value {
                    Value::Int(id) => vec![*id],
                    Value::List(ids) => ids.iter().filter_map(Value::as_i64).collect(),
                    _ => Vec::new(),
                };
                let table = self.table(target)?.read();
                if let Some(missing) = referenced.iter().find(|id| !table.rows.contains_key(*id)) {
                    bail!("{}.{name} references missing {target} {missing}", schema.name);
                }
            }
        }
        if creating {
            if let Some(field) = schema
                .fields
                .iter()
                .find(|f| f.required && row.get(&f.name).map_or(true, Value::is_null))
            {
                bail!("{}.{} is required", schema.name, field.name);
            }
        }
        Ok(())
    }

    fn snapshot(&self, entity_type: &str, paths: &[&FieldPath]) -> anyhow::Result<Snapshot> {
        let mut needed = BTreeSet::from([entity_type]);
        for path in paths {
            needed.extend(path.tables());
        }
        let mut snapshot = Snapshot::default();
        for name in needed {
            if !snapshot.contains(name) {
                let rows = self.table(name)?.read().rows.clone();
                snapshot.insert(name, rows);
            }
        }
        Ok(snapshot)
    }

    fn select(&self, entity_type: &str, query: &ReadQuery) -> anyhow::Result<Vec<Record>> {
        let schema = self.schema(entity_type)?;
        let predicates = query
            .domain
            .iter()
            .map(|condition| {
                Predicate::compile(&schema, condition, self.lookup())
                    .with_context(|| format!("invalid condition on {}", condition.field))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let projection: Vec<(String, FieldPath)> = if query.fields.is_empty() {
            schema
                .declared_attributes()
                .map(|(name, field_type)| {
                    let path = FieldPath::Direct {
                        name: name.to_string(),
                        field_type: field_type.clone(),
                    };
                    (name.to_string(), path)
                })
                .collect()
        } else {
            query
                .fields
                .iter()
                .map(|name| {
                    let path = FieldPath::compile(&schema, name, self.lookup())?;
                    Ok::<_, anyhow::Error>((name.clone(), path))
                })
                .collect::<anyhow::Result<_>>()?
        };
        let ordering = query
            .order
            .iter()
            .map(|term| {
                let path = FieldPath::compile(&schema, &term.field, self.lookup())?;
                if path.is_to_many() {
                    bail!("cannot order {} by to-many path {}", schema.name, term.field);
                }
                Ok((path, term.direction))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let paths: Vec<&FieldPath> = predicates
            .iter()
            .map(|p| &p.path)
            .chain(projection.iter().map(|(_, path)| path))
            .chain(ordering.iter().map(|(path, _)| path))
            .collect();
        let snapshot = self.snapshot(entity_type, &paths)?;

        let mut matched: Vec<(RecordId, &Record, Vec<Value>)> = snapshot
            .rows(entity_type)
            .filter(|(id, row)| {
                predicates
                    .iter()
                    .all(|p| p.matches(&snapshot.resolve(**id, row, &p.path)))
            })
            .map(|(id, row)| {
                let keys = ordering
                    .iter()
                    .map(|(path, _)| snapshot.resolve(*id, row, path))
                    .collect();
                (*id, row, keys)
            })
            .collect();
        matched.sort_by(|(_, _, a), (_, _, b)| compare_keys(a, b, &ordering));

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .map(|(id, row, _)| {
                projection
                    .iter()
                    .map(|(name, path)| (name.clone(), snapshot.resolve(id, row, path)))
                    .collect()
            })
            .collect())
    }

    fn modify(&self, entity_type: &str, ids: &[RecordId], values: &Record) -> anyhow::Result<()> {
        let schema = self.schema(entity_type)?;
        self.validate(&schema, values, false)?;
        let mut table = self.table(entity_type)?.write();
        if let Some(missing) = ids.iter().find(|id| !table.rows.contains_key(*id)) {
            bail!("{entity_type} {missing} does not exist");
        }
        for id in ids {
            if let Some(row) = table.rows.get_mut(id) {
                row.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        debug!(entity_type, updated = ids.len(), "records updated");
        Ok(())
    }
}

/// Compares sort keys term by term. Nulls sort after every other value in
/// ascending order and before them in descending order.
fn compare_keys(a: &[Value], b: &[Value], ordering: &[(FieldPath, SortDirection)]) -> Ordering {
    for ((x, y), (_, direction)) in a.iter().zip(b).zip(ordering) {
        let cmp = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => x.compare(y).unwrap_or(Ordering::Equal),
        };
        let cmp = match direction {
            SortDirection::Asc => cmp,
            SortDirection::Desc => cmp.reverse(),
        };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn resolve_entity_type(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.schemas.get(name).cloned()
    }

    async fn read(&self, entity_type: &str, query: &ReadQuery) -> anyhow::Result<Vec<Record>> {
        self.select(entity_type, query)
    }

    async fn update(
        &self,
        entity_type: &str,
        ids: &[RecordId],
        values: &Record,
    ) -> anyhow::Result<()> {
        self.modify(entity_type, ids, values)
    }

    async fn create(&self, entity_type: &str, values: Vec<Record>) -> anyhow::Result<Vec<Record>> {
        self.insert(entity_type, values)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use app_proxy_core::{Condition, Domain, OrderTerm};
    use serde_json::json;

    use super::*;

    fn store() -> MemoryStore {
        let party = EntitySchema::new("party")
            .with_required_field("name", FieldType::Char)
            .with_field("code", FieldType::Char)
            .with_field(
                "addresses",
                FieldType::One2Many {
                    target: "address".to_string(),
                    field: "party".to_string(),
                },
            )
            .with_default_order(vec![OrderTerm::asc("name")]);
        let address = EntitySchema::new("address")
            .with_field("street", FieldType::Char)
            .with_field("city", FieldType::Char)
            .with_required_field(
                "party",
                FieldType::Many2One {
                    target: "party".to_string(),
                },
            );
        let store = MemoryStore::new([party, address]).unwrap();
        store
            .insert(
                "party",
                vec![
                    Record::from([
                        ("name".to_string(), Value::from("Zeta")),
                        ("code".to_string(), Value::from("Z1")),
                    ]),
                    Record::from([("name".to_string(), Value::from("Alpha"))]),
                ],
            )
            .unwrap();
        store
            .insert(
                "address",
                vec![Record::from([
                    ("street".to_string(), Value::from("1 Main St")),
                    ("city".to_string(), Value::from("City")),
                    ("party".to_string(), Value::Int(1)),
                ])],
            )
            .unwrap();
        store
    }

    fn by_identifier() -> Vec<OrderTerm> {
        vec![OrderTerm::asc(ID_FIELD)]
    }

    fn query(domain: Domain, fields: &[&str], order: Vec<OrderTerm>) -> ReadQuery {
        ReadQuery {
            domain,
            fields: fields.iter().map(ToString::to_string).collect(),
            offset: 0,
            limit: None,
            order,
        }
    }

    #[test]
    fn rejects_dangling_relations_at_construction() {
        let broken = EntitySchema::new("address").with_field(
            "party",
            FieldType::Many2One {
                target: "party".to_string(),
            },
        );
        assert!(MemoryStore::new([broken]).is_err());
        let twice = [EntitySchema::new("party"), EntitySchema::new("party")];
        assert!(MemoryStore::new(twice).is_err());
    }

    #[tokio::test]
    async fn reads_filter_project_and_order() {
        let store = store();
        let records = store
            .read("party", &query(Domain::all(), &["name", "id"], vec![OrderTerm::asc("name")]))
            .await
            .unwrap();
        let names: Vec<&Value> = records.iter().map(|r| &r["name"]).collect();
        assert_eq!(names, vec![&Value::from("Alpha"), &Value::from("Zeta")]);
        assert_eq!(records[0].len(), 2);

        let domain = Domain::all().and(Condition::new("city", "=", json!("City")));
        let records = store
            .read("address", &query(domain, &["street", "party.name"], by_identifier()))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["party.name"], Value::from("Zeta"));
    }

    #[tokio::test]
    async fn nulls_sort_last_ascending() {
        let store = store();
        let records = store
            .read("party", &query(Domain::all(), &["code"], vec![OrderTerm::asc("code")]))
            .await
            .unwrap();
        assert_eq!(records[0]["code"], Value::from("Z1"));
        assert_eq!(records[1]["code"], Value::Null);
        let records = store
            .read("party", &query(Domain::all(), &["code"], vec![OrderTerm::desc("code")]))
            .await
            .unwrap();
        assert_eq!(records[0]["code"], Value::Null);
    }

    #[tokio::test]
    async fn offset_and_limit_apply_after_ordering() {
        let store = store();
        let mut q = query(Domain::all(), &["name"], by_identifier());
        q.offset = 1;
        q.limit = Some(5);
        let records = store.read("party", &q).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], Value::from("Alpha"));
    }

    #[tokio::test]
    async fn computed_one_to_many_and_domain_through_it() {
        let store = store();
        let domain = Domain::all().and(Condition::new("addresses.city", "ilike", json!("ci%")));
        let records = store
            .read("party", &query(domain, &["addresses"], by_identifier()))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["addresses"], Value::List(vec![Value::Int(1)]));
    }

    #[tokio::test]
    async fn empty_field_list_projects_every_attribute() {
        let store = store();
        let records = store
            .read("address", &query(Domain::all(), &[], by_identifier()))
            .await
            .unwrap();
        let keys: Vec<&str> = records[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["city", "id", "party", "street"]);
    }

    #[tokio::test]
    async fn updates_are_all_or_nothing() {
        let store = store();
        let values = Record::from([("code".to_string(), Value::from("NEW"))]);
        let err = store.update("party", &[1, 99], &values).await.unwrap_err();
        assert!(err.to_string().contains("99"));
        let records = store
            .read("party", &query(Domain::all(), &["code"], by_identifier()))
            .await
            .unwrap();
        assert_eq!(records[0]["code"], Value::from("Z1"));

        store.update("party", &[1, 2], &values).await.unwrap();
        let records = store
            .read("party", &query(Domain::all(), &["code"], by_identifier()))
            .await
            .unwrap();
        assert!(records.iter().all(|r| r["code"] == Value::from("NEW")));
    }

    #[tokio::test]
    async fn creation_validates_types_required_fields_and_references() {
        let store = store();
        let missing_name = Record::from([("code".to_string(), Value::from("X"))]);
        assert!(store.create("party", vec![missing_name]).await.is_err());

        let wrong_type = Record::from([("name".to_string(), Value::Int(3))]);
        assert!(store.create("party", vec![wrong_type]).await.is_err());

        let dangling = Record::from([("party".to_string(), Value::Int(42))]);
        assert!(store.create("address", vec![dangling]).await.is_err());

        let computed = Record::from([
            ("name".to_string(), Value::from("Beta")),
            ("addresses".to_string(), Value::List(vec![])),
        ]);
        assert!(store.create("party", vec![computed]).await.is_err());
        assert_eq!(store.count("party"), Some(2));
    }

    #[tokio::test]
    async fn creation_assigns_sequential_identifiers_in_order() {
        let store = store();
        let created = store
            .create(
                "party",
                vec![
                    Record::from([("name".to_string(), Value::from("New A"))]),
                    Record::from([("name".to_string(), Value::from("New B"))]),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<Value> = created.iter().map(|r| r[ID_FIELD].clone()).collect();
        assert_eq!(ids, vec![Value::Int(3), Value::Int(4)]);
        assert_eq!(created[1]["name"], Value::from("New B"));
    }

    #[tokio::test]
    async fn unknown_entity_types_and_paths_fail() {
        let store = store();
        assert!(store.resolve_entity_type("ghost").is_none());
        assert!(store
            .read("ghost", &query(Domain::all(), &[], by_identifier()))
            .await
            .is_err());
        assert!(store
            .read("party", &query(Domain::all(), &["ghost.name"], by_identifier()))
            .await
            .is_err());
        assert!(store
            .read("party", &query(Domain::all(), &["name"], vec![OrderTerm::asc("addresses")]))
            .await
            .is_err());
    }
}
