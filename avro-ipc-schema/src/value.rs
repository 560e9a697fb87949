use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::{binary::MAX_DEPTH, schema::Names, Error, Result, Schema};

/// A dynamically typed Avro datum.
///
/// Union values are not tagged with their branch. When a value is written with a union
/// schema, the first branch it conforms to is used.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Fixed(Vec<u8>),
    /// An enum symbol.
    Enum(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Record fields, in schema order when decoded. Any order is accepted when encoding.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Build a record from `(field, value)` pairs.
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }

    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// True when this value can be written with `schema`.
    pub fn conforms(&self, schema: &Schema, names: &Names) -> bool {
        self.conforms_within(schema, names, 0)
    }

    fn conforms_within(&self, schema: &Schema, names: &Names, depth: usize) -> bool {
        if MAX_DEPTH < depth {
            return false;
        }
        let depth = depth + 1;
        let schema = match names.resolve(schema) {
            Ok(schema) => schema,
            Err(_) => return false,
        };
        match (schema, self) {
            (Schema::Null, Value::Null) => true,
            (Schema::Boolean, Value::Boolean(_)) => true,
            (Schema::Int, Value::Int(_)) => true,
            (Schema::Long, Value::Int(_) | Value::Long(_)) => true,
            (Schema::Float, Value::Int(_) | Value::Long(_) | Value::Float(_)) => true,
            (
                Schema::Double,
                Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_),
            ) => true,
            (Schema::Bytes, Value::Bytes(_)) => true,
            (Schema::String, Value::String(_)) => true,
            (Schema::Fixed(fixed), Value::Fixed(bytes)) => bytes.len() == fixed.size,
            (Schema::Enum(schema), Value::Enum(symbol)) => schema.symbols.contains(symbol),
            (Schema::Array(items), Value::Array(values)) => {
                values.iter().all(|value| value.conforms_within(items, names, depth))
            }
            (Schema::Map(values_schema), Value::Map(values)) => values
                .values()
                .all(|value| value.conforms_within(values_schema, names, depth)),
            (Schema::Record(record), Value::Record(_)) => record.fields.iter().all(|field| {
                match self.field(&field.name) {
                    Some(value) => value.conforms_within(&field.schema, names, depth),
                    None => field.default.is_some(),
                }
            }),
            (Schema::Union(branches), value) => {
                branches.iter().any(|branch| value.conforms_within(branch, names, depth))
            }
            _ => false,
        }
    }

    /// Convert JSON to a value of `schema`. Bytes and fixed are read from strings whose
    /// code points are byte values, the way Avro writes them in JSON.
    pub fn from_json(json: &Json, schema: &Schema, names: &Names) -> Result<Self> {
        let mismatch = || Error::Encode(format!("{json} is not a {}", schema.kind()));
        let resolved = names.resolve(schema)?;
        Ok(match resolved {
            Schema::Null => match json {
                Json::Null => Value::Null,
                _ => return Err(mismatch()),
            },
            Schema::Boolean => Value::Boolean(json.as_bool().ok_or_else(mismatch)?),
            Schema::Int => Value::Int(
                json.as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .ok_or_else(mismatch)?,
            ),
            Schema::Long => Value::Long(json.as_i64().ok_or_else(mismatch)?),
            Schema::Float => Value::Float(json.as_f64().ok_or_else(mismatch)? as f32),
            Schema::Double => Value::Double(json.as_f64().ok_or_else(mismatch)?),
            Schema::Bytes => Value::Bytes(json_bytes(json).ok_or_else(mismatch)?),
            Schema::String => Value::String(json.as_str().ok_or_else(mismatch)?.to_string()),
            Schema::Fixed(fixed) => {
                let bytes = json_bytes(json).ok_or_else(mismatch)?;
                if bytes.len() != fixed.size {
                    return Err(mismatch());
                }
                Value::Fixed(bytes)
            }
            Schema::Enum(schema) => {
                let symbol = json.as_str().ok_or_else(mismatch)?;
                if !schema.symbols.iter().any(|s| s == symbol) {
                    return Err(mismatch());
                }
                Value::Enum(symbol.to_string())
            }
            Schema::Array(items) => Value::Array(
                json.as_array()
                    .ok_or_else(mismatch)?
                    .iter()
                    .map(|item| Value::from_json(item, items, names))
                    .collect::<Result<_>>()?,
            ),
            Schema::Map(values) => Value::Map(
                json.as_object()
                    .ok_or_else(mismatch)?
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), Value::from_json(value, values, names)?)))
                    .collect::<Result<_>>()?,
            ),
            Schema::Record(record) => {
                let object = json.as_object().ok_or_else(mismatch)?;
                let mut fields = Vec::with_capacity(record.fields.len());
                for field in &record.fields {
                    let field_json = object
                        .get(&field.name)
                        .or(field.default.as_ref())
                        .ok_or_else(|| {
                            Error::Encode(format!("{} is missing field {}", record.name, field.name))
                        })?;
                    fields.push((
                        field.name.clone(),
                        Value::from_json(field_json, &field.schema, names)?,
                    ));
                }
                Value::Record(fields)
            }
            Schema::Union(branches) => branches
                .iter()
                .find_map(|branch| Value::from_json(json, branch, names).ok())
                .ok_or_else(mismatch)?,
            Schema::Ref(name) => return Err(Error::UnknownType(name.fullname())),
        })
    }
}

fn json_bytes(json: &Json) -> Option<Vec<u8>> {
    json.as_str()?
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect()
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}
