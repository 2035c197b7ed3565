//! Loosely typed stream tuples plus the typed views the percolate stage works with.

use serde::{Deserialize, Serialize};

use crate::error::FieldError;

/// Runtime-assigned identifier used to ack or fail a tuple.
pub type MessageId = u64;

/// Field name holding the candidate document body.
pub const SOURCE_FIELD: &str = "source";
/// Field name holding the target index.
pub const INDEX_FIELD: &str = "index";
/// Field name holding the target document type.
pub const TYPE_FIELD: &str = "type";
/// Single field declared on emitted tuples.
pub const ID_FIELD: &str = "id";

/// A single field value carried by a tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// UTF-8 string value.
    Str(String),
    /// Nested JSON array or object.
    Json(serde_json::Value),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "a bool",
            Self::Int(_) => "an integer",
            Self::Float(_) => "a float",
            Self::Str(_) => "a string",
            Self::Json(serde_json::Value::Array(_)) => "an array",
            Self::Json(_) => "an object",
        }
    }

    fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Str(s),
            other => Self::Json(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered list of declared field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fields(Vec<String>);

impl Fields {
    /// Declares fields in order.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Position of `name`, if declared.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|field| field == name)
    }

    /// Declared names in order.
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

/// An input record delivered by the runtime: named fields, their values, and a message id.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    id: MessageId,
    fields: Fields,
    values: Vec<Value>,
}

impl Tuple {
    /// Builds a tuple from `(name, value)` pairs.
    pub fn new<I, S, V>(id: MessageId, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        let (names, values): (Vec<String>, Vec<Value>) = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .unzip();
        Self {
            id,
            fields: Fields(names),
            values,
        }
    }

    /// Parses one JSON object line into a tuple; field order follows the object.
    pub fn from_json_line(id: MessageId, line: &str) -> Result<Self, serde_json::Error> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)?;
        Ok(Self::from_json_object(id, object))
    }

    /// Builds a tuple from a decoded JSON object. Arrays and objects stay [`Value::Json`].
    pub fn from_json_object(
        id: MessageId,
        object: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::new(
            id,
            object
                .into_iter()
                .map(|(name, value)| (name, Value::from_json(value))),
        )
    }

    /// Runtime message id.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Declared fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Value stored under `name`.
    pub fn get_by_field(&self, name: &str) -> Result<&Value, FieldError> {
        self.fields
            .index_of(name)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| FieldError::Missing(name.to_string()))
    }

    /// String stored under `name`; any other value type is rejected.
    pub fn get_string_by_field(&self, name: &str) -> Result<&str, FieldError> {
        match self.get_by_field(name)? {
            Value::Str(s) => Ok(s),
            other => Err(FieldError::WrongType {
                field: name.to_string(),
                expected: "a string",
                found: other.type_name(),
            }),
        }
    }
}

/// Validated view of an input tuple: everything needed to issue one percolate query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PercolateRequest<'a> {
    /// Candidate document body (JSON text).
    pub source: &'a str,
    /// Target index.
    pub index: &'a str,
    /// Target document type.
    pub doc_type: &'a str,
}

impl<'a> TryFrom<&'a Tuple> for PercolateRequest<'a> {
    type Error = FieldError;

    fn try_from(tuple: &'a Tuple) -> Result<Self, Self::Error> {
        Ok(Self {
            source: tuple.get_string_by_field(SOURCE_FIELD)?,
            index: tuple.get_string_by_field(INDEX_FIELD)?,
            doc_type: tuple.get_string_by_field(TYPE_FIELD)?,
        })
    }
}

/// Identifier of a stored query that matched the candidate document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub String);

impl From<&str> for MatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Tuple emitted downstream, one per match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Matching query id.
    pub id: String,
}

impl From<MatchId> for OutputRecord {
    fn from(value: MatchId) -> Self {
        Self { id: value.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn percolate_tuple() -> Tuple {
        Tuple::new(
            7,
            [
                (SOURCE_FIELD, Value::from("{\"f\":1}")),
                (INDEX_FIELD, Value::from("docs")),
                (TYPE_FIELD, Value::from("q")),
            ],
        )
    }

    #[test]
    fn extracts_request_fields() {
        let tuple = percolate_tuple();
        let request = PercolateRequest::try_from(&tuple).expect("well formed");
        assert_eq!(request.source, "{\"f\":1}");
        assert_eq!(request.index, "docs");
        assert_eq!(request.doc_type, "q");
    }

    #[test]
    fn missing_type_is_rejected() {
        let tuple = Tuple::new(1, [(SOURCE_FIELD, "{}"), (INDEX_FIELD, "docs")]);
        let err = PercolateRequest::try_from(&tuple).expect_err("type missing");
        assert_eq!(err, FieldError::Missing("type".to_string()));
    }

    #[test]
    fn non_string_index_is_rejected() {
        let tuple = Tuple::new(
            1,
            [
                (SOURCE_FIELD, Value::from("{}")),
                (INDEX_FIELD, Value::Int(3)),
                (TYPE_FIELD, Value::from("q")),
            ],
        );
        match PercolateRequest::try_from(&tuple).expect_err("wrong type") {
            FieldError::WrongType { field, found, .. } => {
                assert_eq!(field, "index");
                assert_eq!(found, "an integer");
            }
            other => panic!("expected wrong type error, got {other:?}"),
        }
    }

    #[test]
    fn json_line_keeps_field_order_and_nested_values() {
        let tuple = Tuple::from_json_line(
            3,
            r#"{"index":"docs","source":{"f":1},"type":"q","extra":2}"#,
        )
        .expect("valid json");
        assert_eq!(tuple.id(), 3);
        assert_eq!(tuple.fields().names(), ["index", "source", "type", "extra"]);
        assert_eq!(
            tuple.get_by_field("source").unwrap(),
            &Value::Json(serde_json::json!({"f": 1}))
        );
        assert_eq!(tuple.get_by_field("extra").unwrap(), &Value::Int(2));
    }

    #[test]
    fn nested_json_in_index_or_type_is_rejected() {
        let tuple = Tuple::from_json_line(1, r#"{"source":"{}","index":["a","b"],"type":"q"}"#)
            .expect("valid json");
        match PercolateRequest::try_from(&tuple).expect_err("array index") {
            FieldError::WrongType { field, found, .. } => {
                assert_eq!(field, "index");
                assert_eq!(found, "an array");
            }
            other => panic!("expected wrong type error, got {other:?}"),
        }

        let tuple = Tuple::from_json_line(2, r#"{"source":"{}","index":"docs","type":{"x":1}}"#)
            .expect("valid json");
        match PercolateRequest::try_from(&tuple).expect_err("object type") {
            FieldError::WrongType { field, found, .. } => {
                assert_eq!(field, "type");
                assert_eq!(found, "an object");
            }
            other => panic!("expected wrong type error, got {other:?}"),
        }
    }

    #[test]
    fn nested_json_source_is_not_a_string() {
        let tuple = Tuple::from_json_line(4, r#"{"source":{"f":1},"index":"docs","type":"q"}"#)
            .expect("valid json");
        assert!(matches!(
            PercolateRequest::try_from(&tuple),
            Err(FieldError::WrongType { .. })
        ));
    }
}
