//! Compiled domain conditions for the in-memory store.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use app_proxy_core::normalize::inbound;
use app_proxy_core::{Condition, EntitySchema, Value};
use regex::Regex;
use serde_json::Value as JsonValue;

use super::path::FieldPath;

/// Comparison operators understood by the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
}

impl Operator {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "like" => Self::Like,
            "not like" => Self::NotLike,
            "ilike" => Self::ILike,
            "not ilike" => Self::NotILike,
            _ => bail!("unsupported operator {raw:?}"),
        })
    }

    fn is_negated(self) -> bool {
        matches!(self, Self::Ne | Self::NotIn | Self::NotLike | Self::NotILike)
    }

    /// The positive counterpart of a negated operator.
    fn positive(self) -> Self {
        match self {
            Self::Ne => Self::Eq,
            Self::NotIn => Self::In,
            Self::NotLike => Self::Like,
            Self::NotILike => Self::ILike,
            other => other,
        }
    }
}

#[derive(Debug)]
enum Operand {
    Scalar(Value),
    Set(Vec<Value>),
    Pattern(Regex),
}

/// A condition validated against an entity schema, ready to evaluate.
#[derive(Debug)]
pub(crate) struct Predicate {
    pub(crate) path: FieldPath,
    operator: Operator,
    operand: Operand,
}

impl Predicate {
    /// Validates `condition` and converts its operand to the declared type.
    pub(crate) fn compile(
        schema: &EntitySchema,
        condition: &Condition,
        lookup: impl Fn(&str) -> Option<Arc<EntitySchema>>,
    ) -> anyhow::Result<Self> {
        let path = FieldPath::compile(schema, &condition.field, lookup)?;
        let operator = Operator::parse(&condition.operator)?;
        let element_type = path.element_type();
        let positive = operator.positive();
        let operand = match positive {
            Operator::In => match &condition.value {
                JsonValue::Array(items) => Operand::Set(
                    items
                        .iter()
                        .map(|item| inbound(element_type, item.clone()))
                        .collect(),
                ),
                other => bail!(
                    "operator {} on {} expects a list, found {other}",
                    condition.operator,
                    condition.field
                ),
            },
            Operator::Like | Operator::ILike => match &condition.value {
                JsonValue::String(pattern) => {
                    Operand::Pattern(like_to_regex(pattern, positive == Operator::ILike)?)
                }
                other => bail!(
                    "operator {} on {} expects a string pattern, found {other}",
                    condition.operator,
                    condition.field
                ),
            },
            _ => Operand::Scalar(inbound(element_type, condition.value.clone())),
        };
        Ok(Self {
            path,
            operator,
            operand,
        })
    }

    /// Evaluates the predicate against a resolved value.
    ///
    /// To-many values match a positive operator when any element matches, and
    /// a negated operator when no element matches its positive counterpart.
    pub(crate) fn matches(&self, value: &Value) -> bool {
        if self.path.is_to_many() {
            let items = match value {
                Value::List(items) => items.as_slice(),
                _ => &[],
            };
            if let Operand::Scalar(Value::Null) = self.operand {
                return match self.operator {
                    Operator::Eq => items.is_empty(),
                    Operator::Ne => !items.is_empty(),
                    _ => false,
                };
            }
            let any = items
                .iter()
                .any(|item| self.matches_scalar(self.operator.positive(), item));
            return any != self.operator.is_negated();
        }
        let positive = self.matches_scalar(self.operator.positive(), value);
        positive != self.operator.is_negated()
    }

    fn matches_scalar(&self, operator: Operator, value: &Value) -> bool {
        match (&self.operand, operator) {
            (Operand::Scalar(Value::Null), Operator::Eq) => value.is_null(),
            (Operand::Scalar(expected), Operator::Eq) => value.loosely_equals(expected),
            (Operand::Scalar(bound), Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge) => {
                if value.is_null() || bound.is_null() {
                    return false;
                }
                match value.compare(bound) {
                    Some(Ordering::Less) => matches!(operator, Operator::Lt | Operator::Le),
                    Some(Ordering::Equal) => matches!(operator, Operator::Le | Operator::Ge),
                    Some(Ordering::Greater) => matches!(operator, Operator::Gt | Operator::Ge),
                    None => false,
                }
            }
            (Operand::Set(members), Operator::In) => {
                members.iter().any(|member| match member {
                    Value::Null => value.is_null(),
                    member => value.loosely_equals(member),
                })
            }
            (Operand::Pattern(regex), Operator::Like | Operator::ILike) => {
                value.as_str().is_some_and(|text| regex.is_match(text))
            }
            _ => false,
        }
    }
}

/// Converts an SQL `LIKE` pattern to an anchored regex. `%` matches any run of
/// characters, `_` a single character, and `\` escapes the next character.
fn like_to_regex(pattern: &str, case_insensitive: bool) -> anyhow::Result<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    if case_insensitive {
        source.push_str("(?i)");
    }
    source.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            '\\' => {
                // A trailing escape stands for itself.
                let escaped = chars.next().unwrap_or('\\');
                source.push_str(&regex::escape(escaped.encode_utf8(&mut [0; 4])));
            }
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|err| anyhow!("invalid pattern {pattern:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use app_proxy_core::FieldType;
    use serde_json::json;

    use super::*;

    fn schemas() -> HashMap<String, Arc<EntitySchema>> {
        let party = EntitySchema::new("party")
            .with_field("name", FieldType::Char)
            .with_field("balance", FieldType::Numeric)
            .with_field("since", FieldType::Date)
            .with_field(
                "tags",
                FieldType::Many2Many {
                    target: "tag".to_string(),
                },
            );
        let tag = EntitySchema::new("tag").with_field("label", FieldType::Char);
        [party, tag]
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect()
    }

    fn predicate(field: &str, operator: &str, value: JsonValue) -> anyhow::Result<Predicate> {
        let schemas = schemas();
        Predicate::compile(
            &schemas["party"],
            &Condition::new(field, operator, value),
            |name| schemas.get(name).cloned(),
        )
    }

    #[test]
    fn like_patterns_are_anchored() {
        let p = predicate("name", "like", json!("Ac%")).unwrap();
        assert!(p.matches(&Value::from("Acme")));
        assert!(!p.matches(&Value::from("The Acme")));
        let p = predicate("name", "ilike", json!("%acme%")).unwrap();
        assert!(p.matches(&Value::from("The ACME company")));
        let p = predicate("name", "like", json!("a_c")).unwrap();
        assert!(p.matches(&Value::from("abc")));
        assert!(!p.matches(&Value::from("abbc")));
        let p = predicate("name", "like", json!(r"100\%")).unwrap();
        assert!(p.matches(&Value::from("100%")));
        assert!(!p.matches(&Value::from("1000")));
    }

    #[test]
    fn trailing_escape_matches_a_backslash() {
        let p = predicate("name", "like", json!(r"abc\")).unwrap();
        assert!(p.matches(&Value::from(r"abc\")));
        assert!(!p.matches(&Value::from("abc")));
    }

    #[test]
    fn negated_operators_invert_the_match() {
        let p = predicate("name", "not ilike", json!("a%")).unwrap();
        assert!(p.matches(&Value::from("Bob")));
        assert!(!p.matches(&Value::from("alice")));
        let p = predicate("name", "!=", json!("x")).unwrap();
        assert!(p.matches(&Value::Null));
    }

    #[test]
    fn comparisons_use_declared_types() {
        let p = predicate("balance", ">=", json!(1.1)).unwrap();
        assert!(p.matches(&Value::Decimal(rust_decimal::Decimal::new(11, 1))));
        assert!(!p.matches(&Value::Decimal(rust_decimal::Decimal::new(109, 2))));
        assert!(!p.matches(&Value::Null));
        let p = predicate("since", "<", json!("2024-01-01")).unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert!(p.matches(&Value::Date(date)));
    }

    #[test]
    fn membership_and_null_equality() {
        let p = predicate("id", "in", json!([1, 3])).unwrap();
        assert!(p.matches(&Value::Int(3)));
        assert!(!p.matches(&Value::Int(2)));
        let p = predicate("id", "not in", json!([1, 3])).unwrap();
        assert!(p.matches(&Value::Int(2)));
        let p = predicate("name", "=", JsonValue::Null).unwrap();
        assert!(p.matches(&Value::Null));
        assert!(!p.matches(&Value::from("x")));
    }

    #[test]
    fn to_many_values_match_any_element() {
        let tags = Value::List(vec![Value::Int(2), Value::Int(5)]);
        assert!(predicate("tags", "=", json!(5)).unwrap().matches(&tags));
        assert!(!predicate("tags", "!=", json!(5)).unwrap().matches(&tags));
        assert!(predicate("tags", "not in", json!([7])).unwrap().matches(&tags));
        let empty = Value::List(Vec::new());
        assert!(predicate("tags", "=", JsonValue::Null).unwrap().matches(&empty));
        assert!(!predicate("tags", "=", JsonValue::Null).unwrap().matches(&tags));
    }

    #[test]
    fn rejects_bad_conditions() {
        assert!(predicate("name", "child_of", json!(1)).is_err());
        assert!(predicate("ghost", "=", json!(1)).is_err());
        assert!(predicate("id", "in", json!(1)).is_err());
        assert!(predicate("name", "like", json!(1)).is_err());
    }
}
