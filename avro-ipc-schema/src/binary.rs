//! Avro binary encoding.
//!
//! The primitive readers and writers are public so that protocol envelopes (handshakes,
//! call headers) can be written directly without building a schema for them.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut};

use crate::{
    schema::{Names, RecordSchema},
    Error, Result, Schema, Value,
};

/// A varint never needs more than 10 bytes for 64 bits.
const MAX_VARINT_LENGTH: usize = 10;
/// Upper bound on items of zero-sized types in one decoded value, across all its arrays.
const MAX_ZERO_SIZED_ITEMS: usize = 1 << 16;
/// Deepest nesting of records, arrays, maps and unions that is written or read.
pub const MAX_DEPTH: usize = 128;

/// Write `value` with `schema`.
pub fn encode<B: BufMut>(
    value: &Value,
    schema: &Schema,
    names: &Names,
    buffer: &mut B,
) -> Result<()> {
    write_value(value, schema, names, buffer, 0)
}

fn write_value<B: BufMut>(
    value: &Value,
    schema: &Schema,
    names: &Names,
    buffer: &mut B,
    depth: usize,
) -> Result<()> {
    if MAX_DEPTH < depth {
        return Err(Error::Encode(format!("value is nested deeper than {MAX_DEPTH}")));
    }
    let depth = depth + 1;
    let schema = names.resolve(schema)?;
    match (schema, value) {
        (Schema::Null, Value::Null) => {}
        (Schema::Boolean, Value::Boolean(b)) => write_boolean(buffer, *b),
        (Schema::Int, Value::Int(i)) => write_int(buffer, *i),
        (Schema::Long, Value::Int(i)) => write_long(buffer, i64::from(*i)),
        (Schema::Long, Value::Long(l)) => write_long(buffer, *l),
        (Schema::Float, Value::Int(i)) => buffer.put_f32_le(*i as f32),
        (Schema::Float, Value::Long(l)) => buffer.put_f32_le(*l as f32),
        (Schema::Float, Value::Float(f)) => buffer.put_f32_le(*f),
        (Schema::Double, Value::Int(i)) => buffer.put_f64_le(f64::from(*i)),
        (Schema::Double, Value::Long(l)) => buffer.put_f64_le(*l as f64),
        (Schema::Double, Value::Float(f)) => buffer.put_f64_le(f64::from(*f)),
        (Schema::Double, Value::Double(d)) => buffer.put_f64_le(*d),
        (Schema::Bytes, Value::Bytes(bytes)) => write_bytes(buffer, bytes),
        (Schema::String, Value::String(s)) => write_string(buffer, s),
        (Schema::Fixed(fixed), Value::Fixed(bytes)) if bytes.len() == fixed.size => {
            buffer.put_slice(bytes)
        }
        (Schema::Enum(schema), Value::Enum(symbol)) => {
            let index = schema
                .symbols
                .iter()
                .position(|s| s == symbol)
                .ok_or_else(|| Error::Encode(format!("{symbol} is not a symbol of {}", schema.name)))?;
            write_long(buffer, index as i64);
        }
        (Schema::Array(items), Value::Array(values)) => {
            if !values.is_empty() {
                write_long(buffer, values.len() as i64);
                for value in values {
                    write_value(value, items, names, buffer, depth)?;
                }
            }
            write_long(buffer, 0);
        }
        (Schema::Map(values_schema), Value::Map(values)) => {
            if !values.is_empty() {
                write_long(buffer, values.len() as i64);
                for (key, value) in values {
                    write_string(buffer, key);
                    write_value(value, values_schema, names, buffer, depth)?;
                }
            }
            write_long(buffer, 0);
        }
        (Schema::Record(record), Value::Record(_)) => {
            for field in &record.fields {
                match value.field(&field.name) {
                    Some(field_value) => {
                        write_value(field_value, &field.schema, names, buffer, depth)?
                    }
                    None => {
                        let default = field.default.as_ref().ok_or_else(|| {
                            Error::Encode(format!("{} is missing field {}", record.name, field.name))
                        })?;
                        let field_value = Value::from_json(default, &field.schema, names)?;
                        write_value(&field_value, &field.schema, names, buffer, depth)?;
                    }
                }
            }
        }
        (Schema::Union(branches), value) => {
            let index = branches
                .iter()
                .position(|branch| value.conforms(branch, names))
                .ok_or_else(|| Error::Encode(format!("{value:?} matches no union branch")))?;
            write_long(buffer, index as i64);
            write_value(value, &branches[index], names, buffer, depth)?;
        }
        (schema, value) => {
            return Err(Error::Encode(format!(
                "{value:?} is not a {}",
                schema.kind()
            )))
        }
    }
    Ok(())
}

/// Read a value of `schema`.
pub fn decode<B: Buf>(schema: &Schema, names: &Names, buffer: &mut B) -> Result<Value> {
    Decoder::new(names, names).read(schema, schema, buffer, 0)
}

/// Read a value that was written with `writer` as a value of `reader`.
///
/// Record fields are matched by name: fields only the writer has are skipped, and fields
/// only the reader has take their default. Numbers are promoted (`int` to `long`, `float`
/// or `double`, `long` to `float` or `double`, `float` to `double`), and `string` and
/// `bytes` read as each other. A writer's union branch is read as the first matching
/// branch of a reader's union. Anything else that differs is a decode error.
pub fn decode_resolved<B: Buf>(
    writer: &Schema,
    writer_names: &Names,
    reader: &Schema,
    reader_names: &Names,
    buffer: &mut B,
) -> Result<Value> {
    Decoder::new(writer_names, reader_names).read(writer, reader, buffer, 0)
}

struct Decoder<'a> {
    writer_names: &'a Names,
    reader_names: &'a Names,
    zero_sized_items: usize,
}

impl<'a> Decoder<'a> {
    fn new(writer_names: &'a Names, reader_names: &'a Names) -> Self {
        Self {
            writer_names,
            reader_names,
            zero_sized_items: 0,
        }
    }

    fn read<B: Buf>(
        &mut self,
        writer: &Schema,
        reader: &Schema,
        buffer: &mut B,
        depth: usize,
    ) -> Result<Value> {
        if MAX_DEPTH < depth {
            log::debug!("value is nested deeper than {MAX_DEPTH}");
            return Err(Error::Decode(format!("value is nested deeper than {MAX_DEPTH}")));
        }
        let depth = depth + 1;
        let writer = self.writer_names.resolve(writer)?;
        let reader = self.reader_names.resolve(reader)?;
        Ok(match (writer, reader) {
            (Schema::Union(w), Schema::Union(r)) if std::ptr::eq(w, r) => {
                let index = read_long(buffer)?;
                let branch = usize::try_from(index)
                    .ok()
                    .and_then(|index| w.get(index))
                    .ok_or_else(|| Error::Decode(format!("{index} is not a union branch")))?;
                return self.read(branch, branch, buffer, depth);
            }
            (Schema::Union(branches), reader) => {
                let index = read_long(buffer)?;
                let branch = usize::try_from(index)
                    .ok()
                    .and_then(|index| branches.get(index))
                    .ok_or_else(|| Error::Decode(format!("{index} is not a union branch")))?;
                return self.read(branch, reader, buffer, depth);
            }
            (writer, Schema::Union(branches)) => {
                let branch = self.select_branch(writer, branches)?;
                return self.read(writer, branch, buffer, depth);
            }
            (Schema::Null, Schema::Null) => Value::Null,
            (Schema::Boolean, Schema::Boolean) => Value::Boolean(read_boolean(buffer)?),
            (Schema::Int, Schema::Int) => Value::Int(read_int(buffer)?),
            (Schema::Int, Schema::Long) => Value::Long(i64::from(read_int(buffer)?)),
            (Schema::Int, Schema::Float) => Value::Float(read_int(buffer)? as f32),
            (Schema::Int, Schema::Double) => Value::Double(f64::from(read_int(buffer)?)),
            (Schema::Long, Schema::Long) => Value::Long(read_long(buffer)?),
            (Schema::Long, Schema::Float) => Value::Float(read_long(buffer)? as f32),
            (Schema::Long, Schema::Double) => Value::Double(read_long(buffer)? as f64),
            (Schema::Float, Schema::Float) => Value::Float(read_float(buffer)?),
            (Schema::Float, Schema::Double) => Value::Double(f64::from(read_float(buffer)?)),
            (Schema::Double, Schema::Double) => {
                ensure_remaining(buffer, 8)?;
                Value::Double(buffer.get_f64_le())
            }
            (Schema::Bytes | Schema::String, Schema::Bytes) => Value::Bytes(read_bytes(buffer)?),
            (Schema::Bytes | Schema::String, Schema::String) => Value::String(read_string(buffer)?),
            (Schema::Fixed(w), Schema::Fixed(r))
                if w.name.name() == r.name.name() && w.size == r.size =>
            {
                Value::Fixed(read_fixed(buffer, w.size)?)
            }
            (Schema::Enum(w), Schema::Enum(r)) if w.name.name() == r.name.name() => {
                let index = read_long(buffer)?;
                let symbol = usize::try_from(index)
                    .ok()
                    .and_then(|index| w.symbols.get(index))
                    .ok_or_else(|| Error::Decode(format!("{index} is not an index of {}", w.name)))?;
                if !r.symbols.contains(symbol) {
                    return Err(Error::Decode(format!("{symbol} is not a symbol of {}", r.name)));
                }
                Value::Enum(symbol.clone())
            }
            (Schema::Array(w), Schema::Array(r)) => {
                let zero_sized = is_zero_sized(w, self.writer_names, 0);
                let mut values = Vec::new();
                loop {
                    let limit = if zero_sized {
                        MAX_ZERO_SIZED_ITEMS - self.zero_sized_items
                    } else {
                        buffer.remaining()
                    };
                    let Some(count) = read_block_count(buffer, limit)? else {
                        break;
                    };
                    if zero_sized {
                        self.zero_sized_items += count;
                    }
                    values.reserve(count.min(buffer.remaining()));
                    for _ in 0..count {
                        values.push(self.read(w, r, buffer, depth)?);
                    }
                }
                Value::Array(values)
            }
            (Schema::Map(w), Schema::Map(r)) => {
                let mut values = BTreeMap::new();
                loop {
                    // Every key takes at least its length byte.
                    let limit = buffer.remaining();
                    let Some(count) = read_block_count(buffer, limit)? else {
                        break;
                    };
                    for _ in 0..count {
                        let key = read_string(buffer)?;
                        let value = self.read(w, r, buffer, depth)?;
                        values.insert(key, value);
                    }
                }
                Value::Map(values)
            }
            (Schema::Record(w), Schema::Record(r)) if std::ptr::eq(w, r) => {
                let mut fields = Vec::with_capacity(r.fields.len());
                for field in &r.fields {
                    let value = self.read(&field.schema, &field.schema, buffer, depth)?;
                    fields.push((field.name.clone(), value));
                }
                Value::Record(fields)
            }
            (Schema::Record(w), Schema::Record(r)) if w.name.name() == r.name.name() => {
                self.read_record(w, r, buffer, depth)?
            }
            (writer, reader) => {
                return Err(Error::Decode(format!(
                    "{} can not be read as {}",
                    writer.kind(),
                    reader.kind()
                )))
            }
        })
    }

    fn read_record<B: Buf>(
        &mut self,
        writer: &RecordSchema,
        reader: &RecordSchema,
        buffer: &mut B,
        depth: usize,
    ) -> Result<Value> {
        let mut read = Vec::with_capacity(writer.fields.len());
        for field in &writer.fields {
            match reader.fields.iter().find(|r| r.name == field.name) {
                Some(reader_field) => {
                    let value = self.read(&field.schema, &reader_field.schema, buffer, depth)?;
                    read.push((field.name.as_str(), value));
                }
                None => {
                    log::trace!("skipping {}.{}", writer.name, field.name);
                    let mut skipper = Decoder {
                        writer_names: self.writer_names,
                        reader_names: self.writer_names,
                        zero_sized_items: self.zero_sized_items,
                    };
                    skipper.read(&field.schema, &field.schema, buffer, depth)?;
                    self.zero_sized_items = skipper.zero_sized_items;
                }
            }
        }

        let mut fields = Vec::with_capacity(reader.fields.len());
        for field in &reader.fields {
            let value = match read.iter().position(|(name, _)| *name == field.name) {
                Some(index) => read.swap_remove(index).1,
                None => {
                    let default = field.default.as_ref().ok_or_else(|| {
                        Error::Decode(format!(
                            "{} has neither a value nor a default for {}",
                            reader.name, field.name
                        ))
                    })?;
                    Value::from_json(default, &field.schema, self.reader_names)?
                }
            };
            fields.push((field.name.clone(), value));
        }
        Ok(Value::Record(fields))
    }

    /// The reader branch for a writer's (non-union) schema: the same type if the union has
    /// it, else the first one the writer's type promotes to.
    fn select_branch<'s>(&self, writer: &Schema, branches: &'s [Schema]) -> Result<&'s Schema> {
        let matching = |test: fn(&Schema, &Schema) -> bool| {
            branches.iter().find(|branch| {
                self.reader_names
                    .resolve(branch)
                    .is_ok_and(|branch| test(writer, branch))
            })
        };
        matching(same_type)
            .or_else(|| matching(promotes))
            .ok_or_else(|| {
                Error::Decode(format!("{} matches no branch of the union", writer.kind()))
            })
    }
}

fn same_type(writer: &Schema, reader: &Schema) -> bool {
    match (writer, reader) {
        (Schema::Record(w), Schema::Record(r)) => w.name.name() == r.name.name(),
        (Schema::Enum(w), Schema::Enum(r)) => w.name.name() == r.name.name(),
        (Schema::Fixed(w), Schema::Fixed(r)) => w.name.name() == r.name.name(),
        (Schema::Union(_), _) | (_, Schema::Union(_)) => false,
        (writer, reader) => std::mem::discriminant(writer) == std::mem::discriminant(reader),
    }
}

fn promotes(writer: &Schema, reader: &Schema) -> bool {
    matches!(
        (writer, reader),
        (Schema::Int, Schema::Long | Schema::Float | Schema::Double)
            | (Schema::Long, Schema::Float | Schema::Double)
            | (Schema::Float, Schema::Double)
            | (Schema::String, Schema::Bytes)
            | (Schema::Bytes, Schema::String)
    )
}

/// Number of items in the next block, or None at the end of the array or map.
/// Negative counts are followed by the block's size in bytes, which is skipped.
fn read_block_count<B: Buf>(buffer: &mut B, limit: usize) -> Result<Option<usize>> {
    let count = read_long(buffer)?;
    if count == 0 {
        return Ok(None);
    }
    if count < 0 {
        let _block_size = read_long(buffer)?;
    }
    let count = usize::try_from(count.unsigned_abs()).map_err(|_| Error::Truncated)?;
    if limit < count {
        log::debug!(
            "block of {count} items exceeds {limit}, with {} bytes remaining",
            buffer.remaining()
        );
        return Err(Error::Truncated);
    }
    Ok(Some(count))
}

fn is_zero_sized(schema: &Schema, names: &Names, depth: usize) -> bool {
    if MAX_DEPTH < depth {
        return false;
    }
    match names.resolve(schema) {
        Ok(Schema::Null) => true,
        Ok(Schema::Fixed(fixed)) => fixed.size == 0,
        Ok(Schema::Record(record)) => record
            .fields
            .iter()
            .all(|field| is_zero_sized(&field.schema, names, depth + 1)),
        _ => false,
    }
}

fn read_float<B: Buf>(buffer: &mut B) -> Result<f32> {
    ensure_remaining(buffer, 4)?;
    Ok(buffer.get_f32_le())
}

fn ensure_remaining<B: Buf>(buffer: &B, length: usize) -> Result<()> {
    if buffer.remaining() < length {
        Err(Error::Truncated)
    } else {
        Ok(())
    }
}

pub fn write_boolean<B: BufMut>(buffer: &mut B, value: bool) {
    buffer.put_u8(u8::from(value));
}

pub fn read_boolean<B: Buf>(buffer: &mut B) -> Result<bool> {
    ensure_remaining(buffer, 1)?;
    match buffer.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::Decode(format!("{other} is not a boolean"))),
    }
}

pub fn write_int<B: BufMut>(buffer: &mut B, value: i32) {
    write_long(buffer, i64::from(value));
}

pub fn read_int<B: Buf>(buffer: &mut B) -> Result<i32> {
    let value = read_long(buffer)?;
    i32::try_from(value).map_err(|_| Error::Decode(format!("{value} does not fit an int")))
}

/// Zig-zag varint.
pub fn write_long<B: BufMut>(buffer: &mut B, value: i64) {
    let mut n = ((value << 1) ^ (value >> 63)) as u64;
    while 0x7f < n {
        buffer.put_u8((n as u8 & 0x7f) | 0x80);
        n >>= 7;
    }
    buffer.put_u8(n as u8);
}

pub fn read_long<B: Buf>(buffer: &mut B) -> Result<i64> {
    let mut n: u64 = 0;
    for i in 0..MAX_VARINT_LENGTH {
        ensure_remaining(buffer, 1)?;
        let byte = buffer.get_u8();
        n |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(((n >> 1) as i64) ^ -((n & 1) as i64));
        }
    }
    Err(Error::Decode("varint is too long".to_string()))
}

pub fn write_bytes<B: BufMut>(buffer: &mut B, bytes: &[u8]) {
    write_long(buffer, bytes.len() as i64);
    buffer.put_slice(bytes);
}

pub fn read_bytes<B: Buf>(buffer: &mut B) -> Result<Vec<u8>> {
    let length = read_long(buffer)?;
    let length = usize::try_from(length)
        .map_err(|_| Error::Decode(format!("{length} is not a length")))?;
    read_fixed(buffer, length)
}

pub fn write_string<B: BufMut>(buffer: &mut B, s: &str) {
    write_bytes(buffer, s.as_bytes());
}

pub fn read_string<B: Buf>(buffer: &mut B) -> Result<String> {
    String::from_utf8(read_bytes(buffer)?)
        .map_err(|e| Error::Decode(format!("string is not utf-8: {e}")))
}

/// Exactly `size` raw bytes. The length is checked before allocating.
pub fn read_fixed<B: Buf>(buffer: &mut B, size: usize) -> Result<Vec<u8>> {
    ensure_remaining(buffer, size)?;
    let mut bytes = vec![0; size];
    buffer.copy_to_slice(&mut bytes);
    Ok(bytes)
}
