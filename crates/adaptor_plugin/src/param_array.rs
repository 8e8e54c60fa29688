//! Typed, one-dimensional arrays of records carried inside a single
//! envelope parameter slot.
//!
//! A schema is a short tag string, one character per field:
//! `n` (number), `b` (bool) and `s` (string). Every row must have exactly
//! one value per tag, of the matching kind.
//!
//! On the wire an array is a JSON array of row objects keyed by the
//! 1-based field position:
//!
//! ```text
//! [{"1":"alice","2":true},{"1":"bob","2":false}]
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{MessageError, MessageResult, ParamValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Number,
    Bool,
    String,
}

impl ParamType {
    pub const fn as_tag(self) -> char {
        match self {
            ParamType::Number => 'n',
            ParamType::Bool => 'b',
            ParamType::String => 's',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'n' => Some(ParamType::Number),
            'b' => Some(ParamType::Bool),
            's' => Some(ParamType::String),
            _ => None,
        }
    }

    /// Kind of a JSON value as seen by the array decoder.
    /// Only integers count as numbers.
    pub fn of_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) if n.is_i64() => Some(ParamType::Number),
            Value::Bool(_) => Some(ParamType::Bool),
            Value::String(_) => Some(ParamType::String),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamType::Number => "number",
            ParamType::Bool => "bool",
            ParamType::String => "string",
        }
    }

    fn matches(self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamType::Number, ParamValue::Number(_))
                | (ParamType::Bool, ParamValue::Bool(_))
                | (ParamType::String, ParamValue::String(_))
        )
    }
}

/// Parse a tag string such as `"sbn"` into a schema.
pub fn parse_schema(tags: &str) -> MessageResult<Vec<ParamType>> {
    if tags.is_empty() {
        return Err(MessageError::InvalidArgument("empty array schema".into()));
    }
    tags.chars()
        .map(|tag| {
            ParamType::from_tag(tag).ok_or_else(|| {
                MessageError::InvalidArgument(format!("unknown type tag `{tag}` in schema `{tags}`"))
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamArray {
    schema: Vec<ParamType>,
    rows: Vec<Vec<ParamValue>>,
}

impl ParamArray {
    /// Create an empty array for the given tag string.
    pub fn create(tags: &str) -> MessageResult<Self> {
        Ok(Self {
            schema: parse_schema(tags)?,
            rows: Vec::new(),
        })
    }

    pub fn with_schema(schema: Vec<ParamType>) -> MessageResult<Self> {
        if schema.is_empty() {
            return Err(MessageError::InvalidArgument("empty array schema".into()));
        }
        Ok(Self { schema, rows: Vec::new() })
    }

    // Decoded from an empty wire array: no schema to recover, no rows.
    fn empty() -> Self {
        Self { schema: Vec::new(), rows: Vec::new() }
    }

    pub fn destroy(self) {}

    pub fn schema(&self) -> &[ParamType] {
        &self.schema
    }

    pub fn schema_tags(&self) -> String {
        self.schema.iter().map(|t| t.as_tag()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append one row. Arity and kinds are checked against the schema.
    pub fn add_element(&mut self, row: Vec<ParamValue>) -> MessageResult<()> {
        if self.schema.is_empty() {
            return Err(MessageError::InvalidArgument("array has no schema".into()));
        }
        if row.len() != self.schema.len() {
            return Err(MessageError::InvalidArgument(format!(
                "row has {} values, schema `{}` expects {}",
                row.len(),
                self.schema_tags(),
                self.schema.len()
            )));
        }
        for (ty, value) in self.schema.iter().zip(row.iter()) {
            if !ty.matches(value) {
                return Err(MessageError::TypeMismatch {
                    expected: ty.name().into(),
                    found: value.kind().into(),
                });
            }
        }
        self.rows.push(row);
        Ok(())
    }

    /// Fetch a row by its 1-based index.
    pub fn get_element(&self, row_index: usize) -> MessageResult<&[ParamValue]> {
        if row_index == 0 || row_index > self.rows.len() {
            return Err(MessageError::OutOfRange {
                index: row_index,
                len: self.rows.len(),
            });
        }
        Ok(&self.rows[row_index - 1])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[ParamValue]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub(crate) fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let fields: Map<String, Value> = row
                        .iter()
                        .enumerate()
                        .map(|(i, v)| ((i + 1).to_string(), v.to_json()))
                        .collect();
                    Value::Object(fields)
                })
                .collect(),
        )
    }

    /// Rebuild an array from its wire rows. The schema is sniffed from the
    /// first row (see [`infer_schema`]); later rows must agree with it.
    pub(crate) fn from_json_rows(rows: &[Value]) -> MessageResult<Self> {
        let guess = infer_schema(rows);
        if rows.is_empty() {
            return Ok(Self::empty());
        }
        let schema = guess.known().ok_or_else(|| {
            MessageError::ParseError("array row holds a value that is not a number, bool or string".into())
        })?;

        let mut array = Self { schema, rows: Vec::with_capacity(rows.len()) };
        for row in rows {
            let fields = row
                .as_object()
                .ok_or_else(|| MessageError::ParseError("array row is not an object".into()))?;
            if fields.len() != array.schema.len() {
                return Err(MessageError::ParseError(format!(
                    "array row has {} fields, first row has {}",
                    fields.len(),
                    array.schema.len()
                )));
            }
            let mut values = Vec::with_capacity(array.schema.len());
            for (i, ty) in array.schema.iter().enumerate() {
                let key = (i + 1).to_string();
                let raw = fields
                    .get(&key)
                    .ok_or_else(|| MessageError::ParseError(format!("array row is missing field {key}")))?;
                let value = ParamValue::from_json(raw)?;
                if !ty.matches(&value) {
                    return Err(MessageError::TypeMismatch {
                        expected: ty.name().into(),
                        found: value.kind().into(),
                    });
                }
                values.push(value);
            }
            array.rows.push(values);
        }
        Ok(array)
    }
}

/// Best-effort schema recovered from serialized rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaGuess {
    /// One entry per field of the first row; `None` for kinds outside
    /// number/bool/string.
    pub fields: Vec<Option<ParamType>>,
}

impl SchemaGuess {
    /// An empty guess (no rows to look at) or one with unknown fields
    /// cannot be trusted.
    pub fn is_lossy(&self) -> bool {
        self.fields.is_empty() || self.fields.iter().any(Option::is_none)
    }

    pub fn known(&self) -> Option<Vec<ParamType>> {
        if self.fields.is_empty() {
            return None;
        }
        self.fields.iter().copied().collect()
    }
}

/// Sniff the row schema from the first row only: its field count and the
/// JSON kind of each field. Rows are assumed homogeneous.
pub fn infer_schema(rows: &[Value]) -> SchemaGuess {
    let Some(Value::Object(first)) = rows.first() else {
        return SchemaGuess::default();
    };
    let fields = (1..=first.len())
        .map(|i| first.get(&i.to_string()).and_then(ParamType::of_json))
        .collect();
    SchemaGuess { fields }
}
