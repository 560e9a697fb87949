use std::{collections::BTreeMap, path::Path};

use serde_json::{Map, Value as Json};

use crate::{
    schema::{
        validate_identifier, write_canonical_json, Names, RecordSchema, SchemaParser, SchemaWriter,
    },
    Error, Name, Result, Schema,
};

/// MD5 of a protocol's canonical form. This is the protocol's version in handshakes.
pub type Md5 = [u8; 16];

/// A named rpc of a protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    name: String,
    request: Schema,
    response: Schema,
    errors: Schema,
    one_way: bool,
}

impl Message {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parameters, as a record with one field per parameter.
    pub fn request(&self) -> &Schema {
        &self.request
    }

    pub fn response(&self) -> &Schema {
        &self.response
    }

    /// A union of `string` (the generic fault) followed by the declared error types.
    pub fn errors(&self) -> &Schema {
        &self.errors
    }

    /// The declared error types, without the generic fault.
    pub fn declared_errors(&self) -> &[Schema] {
        match &self.errors {
            Schema::Union(branches) => branches.get(1..).unwrap_or_default(),
            _ => &[],
        }
    }

    /// One-way messages get no response at all.
    pub fn is_one_way(&self) -> bool {
        self.one_way
    }

    fn parameters(&self) -> &[crate::RecordField] {
        match &self.request {
            Schema::Record(record) => &record.fields,
            _ => &[],
        }
    }
}

/// An Avro protocol: named types plus the messages that use them.
///
/// Protocols are immutable once parsed. The canonical form and its MD5 are computed once,
/// at parse time.
#[derive(Clone, Debug)]
pub struct Protocol {
    name: Name,
    types: Names,
    messages: BTreeMap<String, Message>,
    canonical: String,
    md5: Md5,
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        self.md5 == other.md5
    }
}

impl Eq for Protocol {}

impl Protocol {
    /// Parse a JSON protocol declaration.
    pub fn parse(text: &str) -> Result<Self> {
        let json: Json = serde_json::from_str(text)?;
        let object = json
            .as_object()
            .ok_or_else(|| Error::InvalidSchema("protocol is not an object".to_string()))?;
        let protocol_name = object
            .get("protocol")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::InvalidSchema("protocol without a name".to_string()))?;
        let name = Name::new(
            protocol_name,
            object.get("namespace").and_then(Json::as_str),
            None,
        )?;
        let namespace = name.namespace();

        let mut types = Names::default();
        let mut messages = BTreeMap::new();
        {
            let mut parser = SchemaParser::new(&mut types);
            if let Some(types_json) = object.get("types") {
                let types_json = types_json
                    .as_array()
                    .ok_or_else(|| Error::InvalidSchema("types is not a list".to_string()))?;
                for type_json in types_json {
                    if !matches!(parser.parse(type_json, namespace)?, Schema::Ref(_)) {
                        return Err(Error::InvalidSchema(format!(
                            "protocol types must be named: {type_json}"
                        )));
                    }
                }
            }
            if let Some(messages_json) = object.get("messages") {
                let messages_json = messages_json
                    .as_object()
                    .ok_or_else(|| Error::InvalidSchema("messages is not an object".to_string()))?;
                for (message_name, message_json) in messages_json {
                    let message = parse_message(&mut parser, message_name, message_json, namespace)?;
                    messages.insert(message_name.clone(), message);
                }
            }
        }
        for message in messages.values() {
            validate_message(message, &types)?;
        }

        let mut protocol = Self {
            name,
            types,
            messages,
            canonical: String::new(),
            md5: [0; 16],
        };
        write_canonical_json(&protocol.to_json(), &mut protocol.canonical);
        protocol.md5 = md5::compute(protocol.canonical.as_bytes()).0;
        log::trace!("parsed protocol {} {:x?}", protocol.name, protocol.md5);
        Ok(protocol)
    }

    /// Read and parse a protocol declaration file, conventionally `*.avpr`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn name(&self) -> &str {
        self.name.name()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.name.namespace()
    }

    pub fn fullname(&self) -> String {
        self.name.fullname()
    }

    /// The named types of this protocol. Needed to encode and decode its schemas.
    pub fn names(&self) -> &Names {
        &self.types
    }

    /// A reference to a named type, by fullname.
    pub fn named(&self, fullname: &str) -> Option<Schema> {
        let name = Name::new(fullname, None, None).ok()?;
        self.types.get(&name).map(|_| Schema::Ref(name))
    }

    pub fn message(&self, name: &str) -> Option<&Message> {
        self.messages.get(name)
    }

    /// Messages, ordered by name.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn md5(&self) -> Md5 {
        self.md5
    }

    /// Compact JSON with sorted keys, fullnames, and every named type defined once.
    /// This is the text that travels in handshakes.
    pub fn canonical_form(&self) -> &str {
        &self.canonical
    }

    fn to_json(&self) -> Json {
        let mut writer = SchemaWriter::new(&self.types);
        let mut types = Vec::new();
        for (name, _) in self.types.iter() {
            if !writer.is_written(name) {
                types.push(writer.write(&Schema::Ref(name.clone())));
            }
        }

        let mut messages = Map::new();
        for message in self.messages.values() {
            let mut object = Map::new();
            object.insert("request".to_string(), writer.write_fields(message.parameters()));
            object.insert("response".to_string(), writer.write(&message.response));
            let declared = message.declared_errors();
            if !declared.is_empty() {
                object.insert(
                    "errors".to_string(),
                    Json::Array(declared.iter().map(|error| writer.write(error)).collect()),
                );
            }
            if message.one_way {
                object.insert("one-way".to_string(), Json::Bool(true));
            }
            messages.insert(message.name.clone(), Json::Object(object));
        }

        let mut object = Map::new();
        object.insert("protocol".to_string(), Json::from(self.name.name()));
        if let Some(namespace) = self.name.namespace() {
            object.insert("namespace".to_string(), Json::from(namespace));
        }
        object.insert("types".to_string(), Json::Array(types));
        object.insert("messages".to_string(), Json::Object(messages));
        Json::Object(object)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn parse_message(
    parser: &mut SchemaParser<'_>,
    message_name: &str,
    json: &Json,
    namespace: Option<&str>,
) -> Result<Message> {
    validate_identifier(message_name)?;
    let object = json
        .as_object()
        .ok_or_else(|| Error::InvalidSchema(format!("message {message_name} is not an object")))?;
    let request_json = object
        .get("request")
        .and_then(Json::as_array)
        .ok_or_else(|| Error::InvalidSchema(format!("message {message_name} without request")))?;
    let request = Schema::Record(RecordSchema {
        name: Name::new(message_name, None, namespace)?,
        fields: parser.parse_fields(request_json, namespace)?,
        is_error: false,
    });
    let response_json = object
        .get("response")
        .ok_or_else(|| Error::InvalidSchema(format!("message {message_name} without response")))?;
    let response = parser.parse(response_json, namespace)?;

    let mut errors = vec![Schema::String];
    if let Some(errors_json) = object.get("errors") {
        let errors_json = errors_json
            .as_array()
            .ok_or_else(|| Error::InvalidSchema(format!("message {message_name} errors is not a list")))?;
        for error_json in errors_json {
            errors.push(parser.parse(error_json, namespace)?);
        }
    }
    let one_way = object.get("one-way").and_then(Json::as_bool).unwrap_or(false);

    Ok(Message {
        name: message_name.to_string(),
        request,
        response,
        errors: Schema::Union(errors),
        one_way,
    })
}

fn validate_message(message: &Message, names: &Names) -> Result<()> {
    if message.one_way && (message.response != Schema::Null || !message.declared_errors().is_empty())
    {
        return Err(Error::InvalidSchema(format!(
            "one-way message {} must have a null response and no errors",
            message.name
        )));
    }
    for error in message.declared_errors() {
        match names.resolve(error)? {
            Schema::Record(record) if record.is_error => {}
            other => {
                return Err(Error::InvalidSchema(format!(
                    "message {} declares {} as an error",
                    message.name,
                    other.kind()
                )))
            }
        }
    }
    Ok(())
}
