//! Domain translation: structural coercion of `[field, operator, value]`
//! triples into typed conditions.
//!
//! Operators are passed through verbatim; which ones exist is up to the store.

use serde_json::Value as JsonValue;

use crate::error::{BridgeError, BridgeResult};

/// A single filter condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Attribute name or one-hop dotted path.
    pub field: String,
    /// Store-defined operator, e.g. `"="`, `"in"`, `"ilike"`.
    pub operator: String,
    /// Operand, still JSON-safe. The store interprets it against the
    /// attribute's declared type.
    pub value: JsonValue,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value,
        }
    }
}

/// Conjunction of conditions. An empty domain matches every record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Domain {
    conditions: Vec<Condition>,
}

impl Domain {
    /// Domain that matches everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a condition (AND).
    #[must_use]
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.conditions.iter()
    }
}

impl<'a> IntoIterator for &'a Domain {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.conditions.iter()
    }
}

/// Translates raw JSON triples into a [`Domain`], preserving order.
///
/// # Errors
///
/// Returns `BridgeError::MalformedEnvelope` when an element is not a
/// three-element array or its field/operator are not strings.
pub fn translate(raw: &[JsonValue]) -> BridgeResult<Domain> {
    raw.iter()
        .enumerate()
        .map(|(position, element)| match element {
            JsonValue::Array(triple) => match triple.as_slice() {
                [JsonValue::String(field), JsonValue::String(operator), value] => {
                    Ok(Condition::new(field.as_str(), operator.as_str(), value.clone()))
                }
                [_, _, _] => Err(BridgeError::malformed(format!(
                    "domain condition {position} must start with a field and an operator name"
                ))),
                other => Err(BridgeError::malformed(format!(
                    "domain condition {position} must have 3 elements, found {}",
                    other.len()
                ))),
            },
            other => Err(BridgeError::malformed(format!(
                "domain condition {position} must be an array, found {other}"
            ))),
        })
        .collect::<BridgeResult<Vec<_>>>()
        .map(|conditions| Domain { conditions })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_domain_matches_all() {
        let domain = translate(&[]).unwrap();
        assert!(domain.is_empty());
        assert_eq!(domain, Domain::all());
    }

    #[test]
    fn preserves_order_and_operands() {
        let domain = translate(&[
            json!(["city", "=", "City"]),
            json!(["id", "in", [1, 2]]),
            json!(["party.name", "ilike", "%par%"]),
        ])
        .unwrap();
        let fields: Vec<&str> = domain.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["city", "id", "party.name"]);
        assert_eq!(domain.conditions()[1].value, json!([1, 2]));
        assert_eq!(domain.conditions()[2].operator, "ilike");
    }

    #[test]
    fn operators_pass_through_unvalidated() {
        let domain = translate(&[json!(["name", "child_of", 3])]).unwrap();
        assert_eq!(domain.conditions()[0].operator, "child_of");
    }

    #[test]
    fn malformed_triples_are_rejected_not_panicking() {
        for raw in [
            json!("name"),
            json!(["name", "="]),
            json!(["name", "=", 1, 2]),
            json!([1, "=", 1]),
            json!(["name", null, 1]),
            json!({"field": "name"}),
        ] {
            let err = translate(&[raw.clone()]).unwrap_err();
            assert!(matches!(err, BridgeError::MalformedEnvelope { .. }), "{raw}");
        }
    }
}
