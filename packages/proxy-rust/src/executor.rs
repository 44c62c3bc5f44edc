//! Query execution for one entity-type group of a search.

use std::sync::Arc;

use app_proxy_core::domain::{self, Domain};
use app_proxy_core::normalize::outbound_record;
use app_proxy_core::reflector::read_fields;
use app_proxy_core::{BridgeError, BridgeResult, JsonRecord, OrderTerm, SearchGroup};
use tracing::debug;

use crate::traits::{ReadQuery, RecordStore};

/// A search group whose domain has already been translated.
///
/// Building every plan before executing any of them guarantees that a
/// malformed domain anywhere in the request fails before the store is called.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub entity_type: String,
    pub domain: Domain,
    pub fields: Vec<String>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub order: Option<Vec<OrderTerm>>,
}

impl SearchPlan {
    /// Translates the group's domain.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::MalformedEnvelope` for malformed domain triples.
    pub fn from_group(group: SearchGroup) -> BridgeResult<Self> {
        Ok(Self {
            domain: domain::translate(&group.domain)?,
            entity_type: group.entity_type,
            fields: group.fields,
            offset: group.offset,
            limit: group.limit,
            order: group.order,
        })
    }
}

/// Runs search plans against a [`RecordStore`] and normalizes the results.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn RecordStore>,
}

impl QueryExecutor {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Reads the records of one plan.
    ///
    /// Filters the field list to legal attributes plus the identifier, falls
    /// back to the entity type's default ordering, and converts every value to
    /// its JSON-safe form.
    ///
    /// # Errors
    ///
    /// - `UnknownEntityType` if the store does not know the entity type.
    /// - `StoreQueryFailure` if the store read fails.
    /// - `SerializationFailure` if a value has no JSON-safe form.
    pub async fn execute(&self, plan: SearchPlan) -> BridgeResult<Vec<JsonRecord>> {
        let schema = self
            .store
            .resolve_entity_type(&plan.entity_type)
            .ok_or_else(|| BridgeError::UnknownEntityType {
                name: plan.entity_type.clone(),
            })?;
        let query = ReadQuery {
            fields: read_fields(&schema, &plan.fields),
            order: plan
                .order
                .unwrap_or_else(|| schema.default_order().to_vec()),
            domain: plan.domain,
            offset: plan.offset,
            limit: plan.limit,
        };
        let records = self
            .store
            .read(&plan.entity_type, &query)
            .await
            .map_err(|source| BridgeError::StoreQueryFailure {
                entity_type: plan.entity_type.clone(),
                source,
            })?;
        debug!(
            entity_type = %plan.entity_type,
            conditions = query.domain.conditions().len(),
            records = records.len(),
            "group read"
        );
        records.iter().map(outbound_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use app_proxy_core::{EntitySchema, FieldType, Record, Value};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        let product = EntitySchema::new("product")
            .with_field("name", FieldType::Char)
            .with_field("price", FieldType::Numeric)
            .with_field("available", FieldType::Date)
            .with_default_order(vec![OrderTerm::desc("price")]);
        let store = MemoryStore::new([product]).unwrap();
        let row = |name: &str, cents: i64| {
            Record::from([
                ("name".to_string(), Value::from(name)),
                ("price".to_string(), Value::Decimal(Decimal::new(cents, 2))),
                (
                    "available".to_string(),
                    Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()),
                ),
            ])
        };
        store
            .insert("product", vec![row("Pen", 110), row("Desk", 10_000)])
            .unwrap();
        Arc::new(store)
    }

    fn plan(raw: &str) -> SearchPlan {
        let request = app_proxy_core::envelope::decode_search(raw).unwrap();
        SearchPlan::from_group(request.groups.into_iter().next().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn normalizes_values_and_appends_identifier() {
        let executor = QueryExecutor::new(store());
        let records = executor
            .execute(plan(r#"[{"product": [[], ["name", "price", "available"]]}]"#))
            .await
            .unwrap();
        assert_eq!(
            serde_json::Value::Object(records[0].clone()),
            json!({"id": 2, "name": "Desk", "price": 100.0, "available": "2024-05-01"})
        );
        assert_eq!(records[1]["price"], json!(1.1));
    }

    #[tokio::test]
    async fn explicit_order_overrides_default() {
        let executor = QueryExecutor::new(store());
        let records = executor
            .execute(plan(r#"[{"product": [[], ["name"], 0, 1, [["name", "ASC"]]]}]"#))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["name"], json!("Desk"));
    }

    #[tokio::test]
    async fn unknown_entity_type_is_reported() {
        let executor = QueryExecutor::new(store());
        let err = executor
            .execute(plan(r#"[{"ghost": [[], ["name"]]}]"#))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownEntityType { ref name } if name == "ghost"));
    }

    #[tokio::test]
    async fn store_errors_become_query_failures() {
        let executor = QueryExecutor::new(store());
        let err = executor
            .execute(plan(r#"[{"product": [[["name", "child_of", 1]], ["name"]]}]"#))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::StoreQueryFailure { ref entity_type, .. } if entity_type == "product"
        ));
    }

    #[test]
    fn malformed_domain_fails_while_planning() {
        let request =
            app_proxy_core::envelope::decode_search(r#"[{"product": [[["name", "="]], []]}]"#)
                .unwrap();
        let group = request.groups.into_iter().next().unwrap();
        assert!(matches!(
            SearchPlan::from_group(group),
            Err(BridgeError::MalformedEnvelope { .. })
        ));
    }
}
