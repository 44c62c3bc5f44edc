use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Name of the identifier attribute implicitly declared on every entity type.
pub const ID_FIELD: &str = "id";

static ID_TYPE: FieldType = FieldType::Integer;

/// Declared type of an entity attribute.
///
/// Drives inbound normalization and store-side validation. Serialized with an
/// internal `type` tag so fixtures read as `{"name": "party", "type": "many2one",
/// "target": "party"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    /// Fixed-point decimal.
    Numeric,
    Char,
    Text,
    Date,
    #[serde(rename = "datetime")]
    DateTime,
    /// Reference to a single record of `target`; stored as its identifier.
    #[serde(rename = "many2one")]
    Many2One { target: String },
    /// Reverse of a `Many2One` named `field` on `target`. Computed on read.
    #[serde(rename = "one2many")]
    One2Many { target: String, field: String },
    /// Set of identifiers of `target`.
    #[serde(rename = "many2many")]
    Many2Many { target: String },
    /// Arbitrary JSON document.
    Json,
}

impl FieldType {
    /// The entity type referenced by a relation field.
    #[must_use]
    pub fn relation_target(&self) -> Option<&str> {
        match self {
            Self::Many2One { target }
            | Self::One2Many { target, .. }
            | Self::Many2Many { target } => Some(target),
            _ => None,
        }
    }

    /// Whether `value` has a native shape this attribute can hold.
    ///
    /// `Null` is accepted by every type; required-ness is checked separately.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (Self::Json, _) => true,
            (Self::Boolean, Value::Bool(_))
            | (Self::Integer | Self::Many2One { .. }, Value::Int(_))
            | (Self::Float, Value::Float(_) | Value::Int(_))
            | (Self::Numeric, Value::Decimal(_))
            | (Self::Char | Self::Text, Value::String(_))
            | (Self::Date, Value::Date(_))
            | (Self::DateTime, Value::DateTime(_)) => true,
            (Self::One2Many { .. } | Self::Many2Many { .. }, Value::List(items)) => {
                items.iter().all(|item| matches!(item, Value::Int(_)))
            }
            _ => false,
        }
    }
}

/// Single attribute definition within an entity schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Attribute name.
    pub name: String,
    /// Declared type.
    #[serde(flatten)]
    pub field_type: FieldType,
    /// Whether a non-null value must be supplied on creation.
    #[serde(default)]
    pub required: bool,
}

/// Sort direction for an ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One term of an ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTerm {
    /// Attribute name or one-hop dotted path.
    pub field: String,
    pub direction: SortDirection,
}

impl OrderTerm {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

fn default_order() -> Vec<OrderTerm> {
    vec![OrderTerm::asc(ID_FIELD)]
}

/// Schema of one entity type: its declared attributes and default ordering.
///
/// The identifier attribute ([`ID_FIELD`]) is implicit and never listed in
/// `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity-type name, e.g. `"party"`.
    pub name: String,
    /// Declared attributes, excluding the identifier.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Ordering applied when a read supplies none.
    #[serde(default = "default_order")]
    pub default_order: Vec<OrderTerm>,
}

impl EntitySchema {
    /// Creates a schema with no attributes, ordered by identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            default_order: default_order(),
        }
    }

    /// Adds an optional attribute.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            required: false,
        });
        self
    }

    /// Adds an attribute that must be non-null on creation.
    #[must_use]
    pub fn with_required_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            field_type,
            required: true,
        });
        self
    }

    /// Replaces the default ordering.
    #[must_use]
    pub fn with_default_order(mut self, order: Vec<OrderTerm>) -> Self {
        self.default_order = order;
        self
    }

    /// Looks up a declared attribute by name (the identifier excluded).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared type of a direct attribute, the identifier included.
    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        if name == ID_FIELD {
            return Some(&ID_TYPE);
        }
        self.field(name).map(|f| &f.field_type)
    }

    /// All declared attributes with their types, the identifier first.
    pub fn declared_attributes(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        std::iter::once((ID_FIELD, &ID_TYPE))
            .chain(self.fields.iter().map(|f| (f.name.as_str(), &f.field_type)))
    }

    #[must_use]
    pub fn default_order(&self) -> &[OrderTerm] {
        &self.default_order
    }
}
