//! Envelope codec: decodes request text into typed requests and encodes
//! normalized responses back to text.
//!
//! Search request:
//!
//! ```text
//! [{"party": [domain, fields, offset, limit, order]}, {"address": [...]}]
//! ```
//!
//! Only `domain` and `fields` are mandatory; trailing elements may be omitted.
//!
//! Write request:
//!
//! ```text
//! {"party": [[1, {"name": "x"}], [-1, {"name": "new"}]]}
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use crate::error::{BridgeError, BridgeResult};
use crate::schema::{OrderTerm, SortDirection};
pub use crate::types::RecordId;

/// Acknowledgement returned by `write` when nothing was created.
pub const ACK: &str = "AK";

/// A flat, JSON-safe result record.
pub type JsonRecord = Map<String, JsonValue>;

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// One entity-type group of a search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchGroup {
    /// Entity-type name.
    pub entity_type: String,
    /// Raw filter triples, translated later by [`crate::domain::translate`].
    pub domain: Vec<JsonValue>,
    /// Requested attribute names, possibly dotted.
    pub fields: Vec<String>,
    /// Number of matching records to skip.
    pub offset: usize,
    /// Maximum number of records to return. `None` means no limit.
    pub limit: Option<usize>,
    /// Requested ordering. `None` means the entity type's default ordering.
    pub order: Option<Vec<OrderTerm>>,
}

/// A decoded search request, groups in request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchRequest {
    pub groups: Vec<SearchGroup>,
}

/// Decodes the text of a search request.
///
/// # Errors
///
/// Returns `BridgeError::MalformedEnvelope` if `raw` is not JSON or any group
/// does not have the `{name: [domain, fields, offset?, limit?, order?]}` shape.
pub fn decode_search(raw: &str) -> BridgeResult<SearchRequest> {
    let parsed: JsonValue = serde_json::from_str(raw)?;
    let JsonValue::Array(elements) = parsed else {
        return Err(BridgeError::malformed(
            "search request must be an array of single-key objects",
        ));
    };

    let mut groups = Vec::with_capacity(elements.len());
    for (position, element) in elements.into_iter().enumerate() {
        groups.push(decode_search_group(position, element)?);
    }
    Ok(SearchRequest { groups })
}

fn decode_search_group(position: usize, element: JsonValue) -> BridgeResult<SearchGroup> {
    let JsonValue::Object(object) = element else {
        return Err(BridgeError::malformed(format!(
            "search group {position} must be an object"
        )));
    };
    if object.len() != 1 {
        return Err(BridgeError::malformed(format!(
            "search group {position} must have exactly one entity type, found {}",
            object.len()
        )));
    }
    let Some((entity_type, params)) = object.into_iter().next() else {
        return Err(BridgeError::malformed(format!(
            "search group {position} is empty"
        )));
    };
    let JsonValue::Array(params) = params else {
        return Err(BridgeError::malformed(format!(
            "parameters of {entity_type} must be an array"
        )));
    };
    if !(2..=5).contains(&params.len()) {
        return Err(BridgeError::malformed(format!(
            "parameters of {entity_type} must hold 2 to 5 elements, found {}",
            params.len()
        )));
    }

    let mut params = params.into_iter();
    let domain = match params.next() {
        Some(JsonValue::Array(triples)) => triples,
        Some(JsonValue::Null) | None => Vec::new(),
        Some(other) => {
            return Err(BridgeError::malformed(format!(
                "domain of {entity_type} must be an array, found {other}"
            )))
        }
    };
    let fields = decode_fields(&entity_type, params.next().unwrap_or(JsonValue::Null))?;
    let offset = coerce_offset(&entity_type, &params.next().unwrap_or(JsonValue::Null))?;
    let limit = coerce_limit(&entity_type, &params.next().unwrap_or(JsonValue::Null))?;
    let order = coerce_order(&entity_type, &params.next().unwrap_or(JsonValue::Null))?;

    Ok(SearchGroup {
        entity_type,
        domain,
        fields,
        offset,
        limit,
        order,
    })
}

fn decode_fields(entity_type: &str, raw: JsonValue) -> BridgeResult<Vec<String>> {
    match raw {
        JsonValue::Null => Ok(Vec::new()),
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(name) => Ok(name),
                other => Err(BridgeError::malformed(format!(
                    "field names of {entity_type} must be strings, found {other}"
                ))),
            })
            .collect(),
        other => Err(BridgeError::malformed(format!(
            "fields of {entity_type} must be an array, found {other}"
        ))),
    }
}

/// Reads an integer-like JSON value: integer, integral float, or integer string.
fn integer_like(raw: &JsonValue) -> Option<i64> {
    match raw {
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// Integral floats below 2^63 in magnitude convert exactly.
#[allow(clippy::cast_possible_truncation)]
fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18).then(|| f as i64)
}

/// Whether a JSON value is falsy in the protocol's sense.
fn is_falsy(raw: &JsonValue) -> bool {
    match raw {
        JsonValue::Null => true,
        JsonValue::Bool(b) => !b,
        JsonValue::Number(n) => n.as_f64() == Some(0.0),
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
    }
}

/// Coerces the offset element to a non-negative integer. Falsy means 0.
///
/// # Errors
///
/// Returns `BridgeError::MalformedEnvelope` for non-integer or negative offsets.
pub fn coerce_offset(entity_type: &str, raw: &JsonValue) -> BridgeResult<usize> {
    if is_falsy(raw) {
        return Ok(0);
    }
    integer_like(raw)
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| {
            BridgeError::malformed(format!(
                "offset of {entity_type} must be a non-negative integer, found {raw}"
            ))
        })
}

/// Coerces the limit element. Falsy (absent, `null`, `""`, `0`, `false`) means no limit.
///
/// # Errors
///
/// Returns `BridgeError::MalformedEnvelope` for non-integer or negative limits.
pub fn coerce_limit(entity_type: &str, raw: &JsonValue) -> BridgeResult<Option<usize>> {
    if is_falsy(raw) {
        return Ok(None);
    }
    integer_like(raw)
        .and_then(|i| usize::try_from(i).ok())
        .map(Some)
        .ok_or_else(|| {
            BridgeError::malformed(format!(
                "limit of {entity_type} must be a non-negative integer, found {raw}"
            ))
        })
}

/// Coerces the order element. Falsy means "use the default ordering".
///
/// Accepts a list of `[field, "ASC" | "DESC"]` pairs (direction optional,
/// case-insensitive), bare field names, or a single `"field dir, field dir"`
/// string.
///
/// # Errors
///
/// Returns `BridgeError::MalformedEnvelope` for unrecognized shapes or directions.
pub fn coerce_order(entity_type: &str, raw: &JsonValue) -> BridgeResult<Option<Vec<OrderTerm>>> {
    if is_falsy(raw) {
        return Ok(None);
    }
    let terms = match raw {
        JsonValue::String(spec) => spec
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut words = part.split_whitespace();
                let field = words.next().unwrap_or_default();
                parse_term(entity_type, field, words.next())
            })
            .collect::<BridgeResult<Vec<_>>>()?,
        JsonValue::Array(items) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(field) => parse_term(entity_type, field, None),
                JsonValue::Array(pair) => match pair.as_slice() {
                    [JsonValue::String(field)] => parse_term(entity_type, field, None),
                    [JsonValue::String(field), JsonValue::String(dir)] => {
                        parse_term(entity_type, field, Some(dir))
                    }
                    [JsonValue::String(field), JsonValue::Null] => {
                        parse_term(entity_type, field, None)
                    }
                    _ => Err(BridgeError::malformed(format!(
                        "order term of {entity_type} must be [field, direction], found {item}"
                    ))),
                },
                other => Err(BridgeError::malformed(format!(
                    "order term of {entity_type} must be [field, direction], found {other}"
                ))),
            })
            .collect::<BridgeResult<Vec<_>>>()?,
        other => {
            return Err(BridgeError::malformed(format!(
                "order of {entity_type} must be an array, found {other}"
            )))
        }
    };
    Ok(Some(terms))
}

fn parse_term(entity_type: &str, field: &str, direction: Option<&str>) -> BridgeResult<OrderTerm> {
    let direction = match direction.map(str::to_ascii_lowercase).as_deref() {
        None | Some("asc") => SortDirection::Asc,
        Some("desc") => SortDirection::Desc,
        Some(other) => {
            return Err(BridgeError::malformed(format!(
                "order direction of {entity_type}.{field} must be ASC or DESC, found {other}"
            )))
        }
    };
    Ok(OrderTerm {
        field: field.to_string(),
        direction,
    })
}

// ---------------------------------------------------------------------------
// Write
// ---------------------------------------------------------------------------

/// One `(identifier, value-map)` element of a write batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEntry {
    /// Target identifier. `None` when absent or falsy-empty.
    pub id: Option<RecordId>,
    /// Attribute values as sent by the client.
    pub values: JsonRecord,
}

impl WriteEntry {
    /// A negative or absent identifier requests a creation.
    #[must_use]
    pub fn is_creation(&self) -> bool {
        self.id.map_or(true, |id| id < 0)
    }
}

/// All write entries of one entity type, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteGroup {
    pub entity_type: String,
    pub entries: Vec<WriteEntry>,
}

/// A decoded write request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteRequest {
    pub groups: Vec<WriteGroup>,
}

/// Decodes the text of a write request.
///
/// # Errors
///
/// Returns `BridgeError::MalformedEnvelope` if `raw` is not JSON or does not
/// have the `{name: [[id, {values}], ...]}` shape.
pub fn decode_write(raw: &str) -> BridgeResult<WriteRequest> {
    let parsed: JsonValue = serde_json::from_str(raw)?;
    let JsonValue::Object(object) = parsed else {
        return Err(BridgeError::malformed(
            "write request must be an object keyed by entity type",
        ));
    };

    let mut groups = Vec::with_capacity(object.len());
    for (entity_type, batch) in object {
        let JsonValue::Array(batch) = batch else {
            return Err(BridgeError::malformed(format!(
                "write batch of {entity_type} must be an array"
            )));
        };
        let entries = batch
            .into_iter()
            .enumerate()
            .map(|(position, element)| decode_write_entry(&entity_type, position, element))
            .collect::<BridgeResult<Vec<_>>>()?;
        groups.push(WriteGroup {
            entity_type,
            entries,
        });
    }
    Ok(WriteRequest { groups })
}

fn decode_write_entry(
    entity_type: &str,
    position: usize,
    element: JsonValue,
) -> BridgeResult<WriteEntry> {
    let JsonValue::Array(pair) = element else {
        return Err(BridgeError::malformed(format!(
            "write entry {position} of {entity_type} must be [id, values]"
        )));
    };
    let [raw_id, raw_values]: [JsonValue; 2] = pair.try_into().map_err(|pair: Vec<JsonValue>| {
        BridgeError::malformed(format!(
            "write entry {position} of {entity_type} must hold 2 elements, found {}",
            pair.len()
        ))
    })?;

    let id = match &raw_id {
        JsonValue::Null => None,
        JsonValue::String(s) if s.is_empty() => None,
        other => Some(integer_like(other).ok_or_else(|| {
            BridgeError::malformed(format!(
                "identifier of write entry {position} of {entity_type} is not an integer: {other}"
            ))
        })?),
    };
    let values = match raw_values {
        JsonValue::Object(values) => values,
        JsonValue::Null => JsonRecord::new(),
        other => {
            return Err(BridgeError::malformed(format!(
                "values of write entry {position} of {entity_type} must be an object, found {other}"
            )))
        }
    };
    Ok(WriteEntry { id, values })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes an arbitrary JSON-safe value as newline-free text.
///
/// # Errors
///
/// Returns `BridgeError::SerializationFailure` if serialization fails.
pub fn encode(value: &JsonValue) -> BridgeResult<String> {
    serde_json::to_string(value).map_err(|err| BridgeError::serialization(err.to_string()))
}

/// Encodes the aggregated result of a search.
///
/// # Errors
///
/// Returns `BridgeError::EmptyResult` when there are no groups or every group
/// is empty, and `BridgeError::SerializationFailure` if encoding fails.
pub fn encode_search_result(result: BTreeMap<String, Vec<JsonRecord>>) -> BridgeResult<String> {
    if result.values().all(Vec::is_empty) {
        return Err(BridgeError::EmptyResult);
    }
    let object: Map<String, JsonValue> = result
        .into_iter()
        .map(|(entity_type, records)| {
            let records = records.into_iter().map(JsonValue::Object).collect();
            (entity_type, JsonValue::Array(records))
        })
        .collect();
    encode(&JsonValue::Object(object))
}

/// Encodes the created-identifier map, or returns [`ACK`] when it is empty.
///
/// # Errors
///
/// Returns `BridgeError::SerializationFailure` if encoding fails.
pub fn encode_created(created: BTreeMap<String, Vec<RecordId>>) -> BridgeResult<String> {
    if created.is_empty() {
        return Ok(ACK.to_string());
    }
    let object: Map<String, JsonValue> = created
        .into_iter()
        .map(|(entity_type, ids)| {
            let ids = ids.into_iter().map(JsonValue::from).collect();
            (entity_type, JsonValue::Array(ids))
        })
        .collect();
    encode(&JsonValue::Object(object))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_four_element_search_groups() {
        let request = decode_search(
            r#"[{"party":[[["id","=",1]],["name","code"],0,""]},
                {"address":[[["city","=","City"]],["street","party.name"],0,""]}]"#,
        )
        .unwrap();
        assert_eq!(request.groups.len(), 2);
        let party = &request.groups[0];
        assert_eq!(party.entity_type, "party");
        assert_eq!(party.domain, vec![json!(["id", "=", 1])]);
        assert_eq!(party.fields, vec!["name", "code"]);
        assert_eq!(party.offset, 0);
        assert_eq!(party.limit, None);
        assert_eq!(party.order, None);
        assert_eq!(request.groups[1].fields, vec!["street", "party.name"]);
    }

    #[test]
    fn decodes_full_five_element_group() {
        let request =
            decode_search(r#"[{"party":[[], ["name"], "5", 10, [["name","DESC"],["id"]]]}]"#)
                .unwrap();
        let group = &request.groups[0];
        assert_eq!(group.offset, 5);
        assert_eq!(group.limit, Some(10));
        assert_eq!(
            group.order,
            Some(vec![OrderTerm::desc("name"), OrderTerm::asc("id")])
        );
    }

    #[test]
    fn order_accepts_comma_separated_string() {
        let order = coerce_order("party", &json!("name desc, code")).unwrap();
        assert_eq!(order, Some(vec![OrderTerm::desc("name"), OrderTerm::asc("code")]));
    }

    #[test]
    fn falsy_limit_means_unlimited() {
        for raw in [json!(null), json!(""), json!(0), json!(false)] {
            assert_eq!(coerce_limit("party", &raw).unwrap(), None, "{raw}");
        }
        assert_eq!(coerce_limit("party", &json!(3.0)).unwrap(), Some(3));
    }

    #[test]
    fn rejects_non_json_text() {
        let err = decode_search("this is not json").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedEnvelope { .. }));
    }

    #[test]
    fn rejects_structurally_invalid_groups() {
        for raw in [
            r#"{"party": []}"#,
            r#"[{"party": [[]], "address": [[], []]}]"#,
            r#"[{"party": [[]]}]"#,
            r#"[{"party": "nope"}]"#,
            r#"[{"party": [[], [1, 2]]}]"#,
            r#"[{"party": [[], [], -1]}]"#,
            r#"[{"party": [[], [], 0, "ten"]}]"#,
            r#"[{"party": [[], [], 0, 0, [["name", "sideways"]]]}]"#,
        ] {
            let err = decode_search(raw).unwrap_err();
            assert!(matches!(err, BridgeError::MalformedEnvelope { .. }), "{raw}");
        }
    }

    #[test]
    fn decodes_write_batches_with_identifier_forms() {
        let request = decode_write(
            r#"{"party":[[1,{"name":"Test write"}],[-1,{"name":"New A"}],[null,{"name":"New B"}],["7",{}]]}"#,
        )
        .unwrap();
        let entries = &request.groups[0].entries;
        assert_eq!(entries[0].id, Some(1));
        assert!(!entries[0].is_creation());
        assert!(entries[1].is_creation());
        assert_eq!(entries[2].id, None);
        assert!(entries[2].is_creation());
        assert_eq!(entries[3].id, Some(7));
        assert_eq!(entries[1].values["name"], json!("New A"));
    }

    #[test]
    fn identifier_zero_is_an_update() {
        let request = decode_write(r#"{"party":[[0,{"name":"Zero"}],[0.0,{}],["0",{}]]}"#).unwrap();
        for entry in &request.groups[0].entries {
            assert_eq!(entry.id, Some(0));
            assert!(!entry.is_creation());
        }
    }

    #[test]
    fn rejects_malformed_write_entries() {
        for raw in [
            "[]",
            r#"{"party": {"name": "x"}}"#,
            r#"{"party": [[1]]}"#,
            r#"{"party": [["one", {}]]}"#,
            r#"{"party": [[1, "name"]]}"#,
        ] {
            let err = decode_write(raw).unwrap_err();
            assert!(matches!(err, BridgeError::MalformedEnvelope { .. }), "{raw}");
        }
    }

    #[test]
    fn empty_search_result_is_an_error() {
        assert!(matches!(
            encode_search_result(BTreeMap::new()),
            Err(BridgeError::EmptyResult)
        ));
        let mut all_empty = BTreeMap::new();
        all_empty.insert("party".to_string(), Vec::new());
        assert!(matches!(
            encode_search_result(all_empty),
            Err(BridgeError::EmptyResult)
        ));
    }

    #[test]
    fn partially_empty_search_result_keeps_empty_groups() {
        let mut result = BTreeMap::new();
        result.insert("address".to_string(), Vec::new());
        let mut record = JsonRecord::new();
        record.insert("id".to_string(), json!(1));
        result.insert("party".to_string(), vec![record]);
        let text = encode_search_result(result).unwrap();
        let parsed: JsonValue = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"address": [], "party": [{"id": 1}]}));
    }

    #[test]
    fn nothing_created_encodes_acknowledgement() {
        assert_eq!(encode_created(BTreeMap::new()).unwrap(), ACK);
        let mut created = BTreeMap::new();
        created.insert("party".to_string(), vec![2, 3]);
        assert_eq!(encode_created(created).unwrap(), r#"{"party":[2,3]}"#);
    }
}
