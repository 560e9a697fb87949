use std::collections::HashMap;

use serde_json::{Map, Value as Json};

use crate::{Error, Result};

const PRIMITIVES: [&str; 8] = [
    "null", "boolean", "int", "long", "float", "double", "bytes", "string",
];

/// The name of a named type: a record, error, enum or fixed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    name: String,
    namespace: Option<String>,
}

impl Name {
    /// Create a name. A dotted `name` carries its own namespace; otherwise `namespace`
    /// is used, falling back to the `enclosing` namespace.
    pub fn new(name: &str, namespace: Option<&str>, enclosing: Option<&str>) -> Result<Self> {
        let (namespace, name) = match name.rsplit_once('.') {
            Some((namespace, name)) => (Some(namespace), name),
            None => (namespace.or(enclosing), name),
        };
        let namespace = namespace.filter(|namespace| !namespace.is_empty());
        validate_identifier(name)?;
        if let Some(namespace) = namespace {
            for component in namespace.split('.') {
                validate_identifier(component)?;
            }
        }
        Ok(Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
        })
    }

    /// The simple name, without namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// `namespace.name`, or just `name` in the null namespace.
    pub fn fullname(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.fullname())
    }
}

pub(crate) fn validate_identifier(identifier: &str) -> Result<()> {
    let mut chars = identifier.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSchema(format!("invalid name: {identifier:?}")))
    }
}

/// An Avro schema.
///
/// Named types are kept in a [`Names`] table and referenced with `Ref`, so a schema tree
/// never owns a named definition. This keeps recursive types finite.
#[derive(Clone, Debug, PartialEq)]
pub enum Schema {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Record(RecordSchema),
    Enum(EnumSchema),
    Fixed(FixedSchema),
    Array(Box<Schema>),
    Map(Box<Schema>),
    Union(Vec<Schema>),
    Ref(Name),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordSchema {
    pub name: Name,
    pub fields: Vec<RecordField>,
    /// Declared with `"type": "error"`; only these may be thrown by messages.
    pub is_error: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub schema: Schema,
    /// JSON default, used when a value omits the field.
    pub default: Option<Json>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumSchema {
    pub name: Name,
    pub symbols: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FixedSchema {
    pub name: Name,
    pub size: usize,
}

impl Schema {
    /// Short description for error messages.
    pub fn kind(&self) -> String {
        match self {
            Schema::Null => "null".to_string(),
            Schema::Boolean => "boolean".to_string(),
            Schema::Int => "int".to_string(),
            Schema::Long => "long".to_string(),
            Schema::Float => "float".to_string(),
            Schema::Double => "double".to_string(),
            Schema::Bytes => "bytes".to_string(),
            Schema::String => "string".to_string(),
            Schema::Record(record) => format!("record {}", record.name),
            Schema::Enum(schema) => format!("enum {}", schema.name),
            Schema::Fixed(schema) => format!("fixed {}", schema.name),
            Schema::Array(_) => "array".to_string(),
            Schema::Map(_) => "map".to_string(),
            Schema::Union(_) => "union".to_string(),
            Schema::Ref(name) => name.fullname(),
        }
    }
}

/// Named type definitions, in the order they were declared.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Names {
    order: Vec<Name>,
    schemas: HashMap<Name, Schema>,
}

impl Names {
    pub fn get(&self, name: &Name) -> Option<&Schema> {
        self.schemas.get(name)
    }

    /// Follow a `Ref` to its definition. Other schemas resolve to themselves.
    pub fn resolve<'a>(&'a self, schema: &'a Schema) -> Result<&'a Schema> {
        match schema {
            Schema::Ref(name) => self
                .schemas
                .get(name)
                .ok_or_else(|| Error::UnknownType(name.fullname())),
            other => Ok(other),
        }
    }

    /// Definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Schema)> {
        self.order
            .iter()
            .filter_map(|name| self.schemas.get(name).map(|schema| (name, schema)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Claim a name before its definition is complete, so a record can refer to itself.
    fn reserve(&mut self, name: &Name, placeholder: Schema) -> Result<()> {
        if self.schemas.contains_key(name) {
            return Err(Error::DuplicateType(name.fullname()));
        }
        self.order.push(name.clone());
        self.schemas.insert(name.clone(), placeholder);
        Ok(())
    }

    fn define(&mut self, name: &Name, schema: Schema) {
        self.schemas.insert(name.clone(), schema);
    }
}

/// Parses schema JSON, registering every named type it defines.
pub(crate) struct SchemaParser<'a> {
    names: &'a mut Names,
}

impl<'a> SchemaParser<'a> {
    pub(crate) fn new(names: &'a mut Names) -> Self {
        Self { names }
    }

    pub(crate) fn parse(&mut self, json: &Json, enclosing: Option<&str>) -> Result<Schema> {
        match json {
            Json::String(name) => self.parse_reference(name, enclosing),
            Json::Array(branches) => self.parse_union(branches, enclosing),
            Json::Object(object) => self.parse_object(object, enclosing),
            other => Err(Error::InvalidSchema(format!("not a schema: {other}"))),
        }
    }

    fn parse_reference(&mut self, name: &str, enclosing: Option<&str>) -> Result<Schema> {
        if let Some(primitive) = primitive(name) {
            return Ok(primitive);
        }
        let qualified = Name::new(name, None, enclosing)?;
        if self.names.get(&qualified).is_some() {
            return Ok(Schema::Ref(qualified));
        }
        // unqualified names may also refer to the null namespace
        let unqualified = Name::new(name, None, None)?;
        if self.names.get(&unqualified).is_some() {
            return Ok(Schema::Ref(unqualified));
        }
        Err(Error::UnknownType(qualified.fullname()))
    }

    fn parse_union(&mut self, branches: &[Json], enclosing: Option<&str>) -> Result<Schema> {
        let mut parsed: Vec<Schema> = Vec::with_capacity(branches.len());
        for branch in branches {
            let schema = self.parse(branch, enclosing)?;
            if matches!(schema, Schema::Union(_)) {
                return Err(Error::InvalidSchema(
                    "unions may not immediately contain unions".to_string(),
                ));
            }
            let kind = schema.kind();
            if parsed.iter().any(|existing| existing.kind() == kind) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate {kind} in union"
                )));
            }
            parsed.push(schema);
        }
        Ok(Schema::Union(parsed))
    }

    fn parse_object(&mut self, object: &Map<String, Json>, enclosing: Option<&str>) -> Result<Schema> {
        let schema_type = object
            .get("type")
            .ok_or_else(|| Error::InvalidSchema("schema object without type".to_string()))?;
        let type_name = match schema_type {
            Json::String(type_name) => type_name.as_str(),
            nested => return self.parse(nested, enclosing),
        };
        match type_name {
            "record" | "error" => self.parse_record(object, enclosing, type_name == "error"),
            "enum" => self.parse_enum(object, enclosing),
            "fixed" => self.parse_fixed(object, enclosing),
            "array" => {
                let items = object
                    .get("items")
                    .ok_or_else(|| Error::InvalidSchema("array without items".to_string()))?;
                Ok(Schema::Array(Box::new(self.parse(items, enclosing)?)))
            }
            "map" => {
                let values = object
                    .get("values")
                    .ok_or_else(|| Error::InvalidSchema("map without values".to_string()))?;
                Ok(Schema::Map(Box::new(self.parse(values, enclosing)?)))
            }
            other => self.parse_reference(other, enclosing),
        }
    }

    fn named(object: &Map<String, Json>, enclosing: Option<&str>) -> Result<Name> {
        let name = object
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::InvalidSchema("named type without name".to_string()))?;
        if is_primitive_name(name) {
            return Err(Error::InvalidSchema(format!(
                "{name} is a primitive type name"
            )));
        }
        let namespace = object.get("namespace").and_then(Json::as_str);
        Name::new(name, namespace, enclosing)
    }

    fn parse_record(
        &mut self,
        object: &Map<String, Json>,
        enclosing: Option<&str>,
        is_error: bool,
    ) -> Result<Schema> {
        let name = Self::named(object, enclosing)?;
        let placeholder = Schema::Record(RecordSchema {
            name: name.clone(),
            fields: Vec::new(),
            is_error,
        });
        self.names.reserve(&name, placeholder)?;

        let fields_json = object
            .get("fields")
            .and_then(Json::as_array)
            .ok_or_else(|| Error::InvalidSchema(format!("record {name} without fields")))?;
        let fields = self.parse_fields(fields_json, name.namespace())?;
        let record = Schema::Record(RecordSchema {
            name: name.clone(),
            fields,
            is_error,
        });
        self.names.define(&name, record);
        Ok(Schema::Ref(name))
    }

    /// Record fields, also used for message parameter lists.
    pub(crate) fn parse_fields(
        &mut self,
        fields_json: &[Json],
        enclosing: Option<&str>,
    ) -> Result<Vec<RecordField>> {
        let mut fields: Vec<RecordField> = Vec::with_capacity(fields_json.len());
        for field in fields_json {
            let field = field
                .as_object()
                .ok_or_else(|| Error::InvalidSchema("field is not an object".to_string()))?;
            let field_name = field
                .get("name")
                .and_then(Json::as_str)
                .ok_or_else(|| Error::InvalidSchema("field without name".to_string()))?;
            validate_identifier(field_name)?;
            if fields.iter().any(|existing| existing.name == field_name) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate field {field_name}"
                )));
            }
            let field_type = field
                .get("type")
                .ok_or_else(|| Error::InvalidSchema(format!("field {field_name} without type")))?;
            fields.push(RecordField {
                name: field_name.to_string(),
                schema: self.parse(field_type, enclosing)?,
                default: field.get("default").cloned(),
            });
        }
        Ok(fields)
    }

    fn parse_enum(&mut self, object: &Map<String, Json>, enclosing: Option<&str>) -> Result<Schema> {
        let name = Self::named(object, enclosing)?;
        let symbols_json = object
            .get("symbols")
            .and_then(Json::as_array)
            .ok_or_else(|| Error::InvalidSchema(format!("enum {name} without symbols")))?;
        let mut symbols: Vec<String> = Vec::with_capacity(symbols_json.len());
        for symbol in symbols_json {
            let symbol = symbol
                .as_str()
                .ok_or_else(|| Error::InvalidSchema(format!("enum {name} symbol is not a string")))?;
            validate_identifier(symbol)?;
            if symbols.iter().any(|existing| existing == symbol) {
                return Err(Error::InvalidSchema(format!(
                    "enum {name} repeats symbol {symbol}"
                )));
            }
            symbols.push(symbol.to_string());
        }
        let schema = Schema::Enum(EnumSchema {
            name: name.clone(),
            symbols,
        });
        self.names.reserve(&name, schema)?;
        Ok(Schema::Ref(name))
    }

    fn parse_fixed(&mut self, object: &Map<String, Json>, enclosing: Option<&str>) -> Result<Schema> {
        let name = Self::named(object, enclosing)?;
        let size = object
            .get("size")
            .and_then(Json::as_u64)
            .ok_or_else(|| Error::InvalidSchema(format!("fixed {name} without size")))?;
        let schema = Schema::Fixed(FixedSchema {
            name: name.clone(),
            size: size as usize,
        });
        self.names.reserve(&name, schema)?;
        Ok(Schema::Ref(name))
    }
}

fn primitive(name: &str) -> Option<Schema> {
    Some(match name {
        "null" => Schema::Null,
        "boolean" => Schema::Boolean,
        "int" => Schema::Int,
        "long" => Schema::Long,
        "float" => Schema::Float,
        "double" => Schema::Double,
        "bytes" => Schema::Bytes,
        "string" => Schema::String,
        _ => return None,
    })
}

/// Writes schemas back to JSON. Each named type is written in full where it is first
/// encountered and by fullname afterwards, which reproduces the declaration order.
/// Definitions always carry an explicit namespace so they reparse to the same name.
pub(crate) struct SchemaWriter<'a> {
    names: &'a Names,
    written: Vec<Name>,
}

impl<'a> SchemaWriter<'a> {
    pub(crate) fn new(names: &'a Names) -> Self {
        Self {
            names,
            written: Vec::new(),
        }
    }

    pub(crate) fn is_written(&self, name: &Name) -> bool {
        self.written.contains(name)
    }

    pub(crate) fn write(&mut self, schema: &Schema) -> Json {
        match schema {
            Schema::Null => Json::from("null"),
            Schema::Boolean => Json::from("boolean"),
            Schema::Int => Json::from("int"),
            Schema::Long => Json::from("long"),
            Schema::Float => Json::from("float"),
            Schema::Double => Json::from("double"),
            Schema::Bytes => Json::from("bytes"),
            Schema::String => Json::from("string"),
            Schema::Array(items) => {
                let mut object = Map::new();
                object.insert("type".to_string(), Json::from("array"));
                object.insert("items".to_string(), self.write(items));
                Json::Object(object)
            }
            Schema::Map(values) => {
                let mut object = Map::new();
                object.insert("type".to_string(), Json::from("map"));
                object.insert("values".to_string(), self.write(values));
                Json::Object(object)
            }
            Schema::Union(branches) => {
                Json::Array(branches.iter().map(|branch| self.write(branch)).collect())
            }
            Schema::Ref(name) => {
                if self.is_written(name) {
                    return Json::from(name.fullname());
                }
                let names = self.names;
                match names.get(name) {
                    Some(definition) => self.write_definition(definition),
                    None => Json::from(name.fullname()),
                }
            }
            definition => self.write_definition(definition),
        }
    }

    fn write_definition(&mut self, definition: &Schema) -> Json {
        let mut object = Map::new();
        match definition {
            Schema::Record(record) => {
                self.written.push(record.name.clone());
                let type_name = if record.is_error { "error" } else { "record" };
                object.insert("type".to_string(), Json::from(type_name));
                object.insert("name".to_string(), Json::from(record.name.name()));
                object.insert(
                    "namespace".to_string(),
                    Json::from(record.name.namespace().unwrap_or_default()),
                );
                object.insert("fields".to_string(), self.write_fields(&record.fields));
            }
            Schema::Enum(schema) => {
                self.written.push(schema.name.clone());
                object.insert("type".to_string(), Json::from("enum"));
                object.insert("name".to_string(), Json::from(schema.name.name()));
                object.insert(
                    "namespace".to_string(),
                    Json::from(schema.name.namespace().unwrap_or_default()),
                );
                object.insert("symbols".to_string(), Json::from(schema.symbols.clone()));
            }
            Schema::Fixed(schema) => {
                self.written.push(schema.name.clone());
                object.insert("type".to_string(), Json::from("fixed"));
                object.insert("name".to_string(), Json::from(schema.name.name()));
                object.insert(
                    "namespace".to_string(),
                    Json::from(schema.name.namespace().unwrap_or_default()),
                );
                object.insert("size".to_string(), Json::from(schema.size));
            }
            other => return self.write(other),
        }
        Json::Object(object)
    }

    pub(crate) fn write_fields(&mut self, fields: &[RecordField]) -> Json {
        Json::Array(
            fields
                .iter()
                .map(|field| {
                    let mut object = Map::new();
                    object.insert("name".to_string(), Json::from(field.name.clone()));
                    object.insert("type".to_string(), self.write(&field.schema));
                    if let Some(default) = &field.default {
                        object.insert("default".to_string(), default.clone());
                    }
                    Json::Object(object)
                })
                .collect(),
        )
    }
}

/// Compact JSON with object keys sorted, independent of serde_json's map ordering.
pub(crate) fn write_canonical_json(json: &Json, out: &mut String) {
    match json {
        Json::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if 0 < i {
                    out.push(',');
                }
                out.push_str(&Json::from(key.as_str()).to_string());
                out.push(':');
                write_canonical_json(&object[key], out);
            }
            out.push('}');
        }
        Json::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if 0 < i {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn is_primitive_name(name: &str) -> bool {
    PRIMITIVES.contains(&name)
}
