//! Declarative layouts for fixed-size binary records.
//!
//! A [`RecordSchema`] is compiled once from an ordered table of
//! [`FieldSpec`]s.  Compilation resolves every field to a fixed byte offset
//! and width, so decoding is a single pass over the input slice with no
//! per-record bookkeeping.
//!
//! # Format codes
//! Field widths use the compact notation of fixed-layout record tables:
//!
//! | code | type          | width |
//! |------|---------------|-------|
//! | `x`  | pad (omitted) | 1     |
//! | `c`  | raw char      | 1     |
//! | `b` / `B` | i8 / u8  | 1     |
//! | `?`  | bool          | 1     |
//! | `h` / `H` | i16 / u16 | 2    |
//! | `i` / `I` (`l` / `L`) | i32 / u32 | 4 |
//! | `q` / `Q` | i64 / u64 | 8    |
//! | `f` / `d` | f32 / f64 | 4 / 8 |
//! | `Ns` | byte string   | N     |
//!
//! A leading count (`4d`) turns a primitive into a list of `N` values.  No
//! alignment padding is ever inserted between fields.
//!
//! # Endianness
//! Offsets and widths are independent of byte order; only multi-byte numeric
//! fields are read differently.  [`RecordSchema::decode`] dispatches once to
//! a decoder monomorphised for the requested order.

pub mod records;

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

// ── Endian ───────────────────────────────────────────────────────────────────

/// Byte order of multi-byte numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn read_i32<R: Read>(self, mut reader: R) -> io::Result<i32> {
        match self {
            Endian::Little => reader.read_i32::<LittleEndian>(),
            Endian::Big    => reader.read_i32::<BigEndian>(),
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Little => f.write_str("little-endian"),
            Endian::Big    => f.write_str("big-endian"),
        }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unsupported format code {code:?} for field '{field}'")]
    UnsupportedFormat { field: String, code: String },
    #[error("Schema '{schema}' compiles to {actual} bytes, expected {expected}")]
    SizeMismatch { schema: String, expected: usize, actual: usize },
    #[error("Schema '{0}' is too large to address")]
    TooLarge(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Record '{schema}' needs exactly {expected} bytes, got {actual}")]
    LengthMismatch { schema: String, expected: usize, actual: usize },
    #[error("Schema '{0}' describes a repeated record, not a single record")]
    NotARecord(String),
    #[error("Field '{0}' is not present in the record")]
    MissingField(String),
    #[error("Field '{field}' does not hold {expected}")]
    FieldType { field: String, expected: &'static str },
}

// ── Primitive ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Pad,
    Char,
    I8,
    U8,
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Primitive {
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            'x'       => Primitive::Pad,
            'c'       => Primitive::Char,
            'b'       => Primitive::I8,
            'B'       => Primitive::U8,
            '?'       => Primitive::Bool,
            'h'       => Primitive::I16,
            'H'       => Primitive::U16,
            'i' | 'l' => Primitive::I32,
            'I' | 'L' => Primitive::U32,
            'q'       => Primitive::I64,
            'Q'       => Primitive::U64,
            'f'       => Primitive::F32,
            'd'       => Primitive::F64,
            _         => return None,
        })
    }

    #[inline]
    pub fn width(self) -> usize {
        match self {
            Primitive::Pad | Primitive::Char | Primitive::I8 | Primitive::U8 | Primitive::Bool => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
        }
    }

    fn read<B: byteorder::ByteOrder>(self, buf: &[u8]) -> Value {
        match self {
            Primitive::Pad | Primitive::Char | Primitive::U8 => Value::UInt(buf[0] as u64),
            Primitive::I8  => Value::Int(buf[0] as i8 as i64),
            Primitive::Bool => Value::Bool(buf[0] != 0),
            Primitive::I16 => Value::Int(B::read_i16(buf) as i64),
            Primitive::U16 => Value::UInt(B::read_u16(buf) as u64),
            Primitive::I32 => Value::Int(B::read_i32(buf) as i64),
            Primitive::U32 => Value::UInt(B::read_u32(buf) as u64),
            Primitive::I64 => Value::Int(B::read_i64(buf)),
            Primitive::U64 => Value::UInt(B::read_u64(buf)),
            Primitive::F32 => Value::Float(B::read_f32(buf) as f64),
            Primitive::F64 => Value::Float(B::read_f64(buf)),
        }
    }

    fn write<B: byteorder::ByteOrder>(self, field: &str, value: &Value, buf: &mut [u8]) -> Result<(), DecodeError> {
        let int = || value.as_i64().ok_or_else(|| type_err(field, "an integer"));
        match self {
            Primitive::Pad => {}
            Primitive::Char | Primitive::U8 | Primitive::I8 | Primitive::Bool => buf[0] = int()? as u8,
            Primitive::I16 => B::write_i16(buf, int()? as i16),
            Primitive::U16 => B::write_u16(buf, int()? as u16),
            Primitive::I32 => B::write_i32(buf, int()? as i32),
            Primitive::U32 => B::write_u32(buf, int()? as u32),
            Primitive::I64 => B::write_i64(buf, int()?),
            Primitive::U64 => B::write_u64(buf, int()? as u64),
            Primitive::F32 => B::write_f32(buf, float(field, value)? as f32),
            Primitive::F64 => B::write_f64(buf, float(field, value)?),
        }
        Ok(())
    }
}

fn float(field: &str, value: &Value) -> Result<f64, DecodeError> {
    value.as_f64().ok_or_else(|| type_err(field, "a number"))
}

fn type_err(field: &str, expected: &'static str) -> DecodeError {
    DecodeError::FieldType { field: field.to_owned(), expected }
}

// ── FieldFormat / Transform / FieldSpec ──────────────────────────────────────

/// Resolved layout of one field.
#[derive(Debug, Clone)]
pub enum FieldFormat {
    Scalar(Primitive),
    Array(Primitive, usize),
    Bytes(usize),
    /// `Np`: one length byte followed by up to `N - 1` bytes of payload.
    Pascal(usize),
    Nested(Arc<RecordSchema>),
}

impl FieldFormat {
    /// Parse a compact format code such as `i`, `4d` or `32s`.
    pub fn parse(code: &str) -> Option<Self> {
        let kind = code.chars().last()?;
        let digits = &code[..code.len() - kind.len_utf8()];
        let count = if digits.is_empty() {
            None
        } else {
            Some(digits.parse::<usize>().ok()?)
        };
        match kind {
            's' => return Some(FieldFormat::Bytes(count.unwrap_or(1))),
            'p' => return Some(FieldFormat::Pascal(count.unwrap_or(1))),
            _ => {}
        }
        let prim = Primitive::from_code(kind)?;
        Some(match count {
            None    => FieldFormat::Scalar(prim),
            Some(n) => FieldFormat::Array(prim, n),
        })
    }

    /// Encoded width in bytes, `None` if it does not fit in `usize`.
    pub fn width(&self) -> Option<usize> {
        match self {
            FieldFormat::Scalar(p)   => Some(p.width()),
            FieldFormat::Array(p, n) => p.width().checked_mul(*n),
            FieldFormat::Bytes(n) | FieldFormat::Pascal(n) => Some(*n),
            FieldFormat::Nested(s)   => Some(s.size()),
        }
    }

    fn is_pad(&self) -> bool {
        matches!(self, FieldFormat::Scalar(Primitive::Pad) | FieldFormat::Array(Primitive::Pad, _))
    }
}

/// Post-decode treatment of a field value.
#[derive(Debug, Clone, Copy)]
pub enum Transform {
    Identity,
    /// Consume the bytes but leave the field out of the decoded record.
    Omit,
    /// Cut a byte string at its first NUL and decode it as text.
    CString,
    Custom(fn(Value) -> Value),
}

#[derive(Debug, Clone)]
pub enum FormatRef {
    Code(String),
    Schema(Arc<RecordSchema>),
}

/// One entry of a declarative record table.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name:      String,
    pub format:    FormatRef,
    pub transform: Transform,
}

/// A field given by a format code, e.g. `field("Mark", "i")`.
pub fn field(name: &str, code: &str) -> FieldSpec {
    FieldSpec {
        name:      name.to_owned(),
        format:    FormatRef::Code(code.to_owned()),
        transform: Transform::Identity,
    }
}

/// A field laid out by another schema (a sub-record or a repeated schema).
pub fn nested(name: &str, schema: Arc<RecordSchema>) -> FieldSpec {
    FieldSpec {
        name:      name.to_owned(),
        format:    FormatRef::Schema(schema),
        transform: Transform::Identity,
    }
}

impl FieldSpec {
    pub fn omit(mut self) -> Self {
        self.transform = Transform::Omit;
        self
    }

    pub fn text(mut self) -> Self {
        self.transform = Transform::CString;
        self
    }

    pub fn map(mut self, f: fn(Value) -> Value) -> Self {
        self.transform = Transform::Custom(f);
        self
    }
}

/// Decode a fixed-width byte buffer as C text: everything before the first
/// NUL, with undecodable bytes dropped.
pub fn cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Payload of a Pascal string field: the length byte is clamped to the
/// field width.
fn pascal(buf: &[u8]) -> &[u8] {
    match buf.split_first() {
        Some((&len, rest)) => &rest[..rest.len().min(len as usize)],
        None => &[],
    }
}

// ── Value / Record ───────────────────────────────────────────────────────────

/// A decoded field value.  Integers are widened to 64 bits and `f32` to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    List(Vec<Value>),
    Record(Record),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v)  => Some(*v),
            Value::UInt(v) => Some(*v as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v)   => Some(*v as f64),
            Value::UInt(v)  => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s)  => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

impl From<bool>    for Value { fn from(v: bool)    -> Self { Value::Bool(v) } }
impl From<i32>     for Value { fn from(v: i32)     -> Self { Value::Int(v as i64) } }
impl From<i64>     for Value { fn from(v: i64)     -> Self { Value::Int(v) } }
impl From<u8>      for Value { fn from(v: u8)      -> Self { Value::UInt(v as u64) } }
impl From<u32>     for Value { fn from(v: u32)     -> Self { Value::UInt(v as u64) } }
impl From<f64>     for Value { fn from(v: f64)     -> Self { Value::Float(v) } }
impl From<&str>    for Value { fn from(v: &str)    -> Self { Value::Text(v.to_owned()) } }
impl From<String>  for Value { fn from(v: String)  -> Self { Value::Text(v) } }
impl From<Vec<u8>> for Value { fn from(v: Vec<u8>) -> Self { Value::Bytes(v) } }
impl From<Record>  for Value { fn from(v: Record)  -> Self { Value::Record(v) } }
impl From<Vec<Value>> for Value { fn from(v: Vec<Value>) -> Self { Value::List(v) } }

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(v)   => s.serialize_bool(*v),
            Value::Int(v)    => s.serialize_i64(*v),
            Value::UInt(v)   => s.serialize_u64(*v),
            Value::Float(v)  => s.serialize_f64(*v),
            Value::Bytes(v)  => v.serialize(s),
            Value::Text(v)   => s.serialize_str(v),
            Value::List(v)   => v.serialize(s),
            Value::Record(v) => v.serialize(s),
        }
    }
}

/// Ordered field map produced by decoding a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Record::insert`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set `name`, replacing an existing value in place.
    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_owned(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn require(&self, name: &str) -> Result<&Value, DecodeError> {
        self.get(name).ok_or_else(|| DecodeError::MissingField(name.to_owned()))
    }

    pub fn i64(&self, name: &str) -> Result<i64, DecodeError> {
        self.require(name)?.as_i64().ok_or_else(|| type_err(name, "an integer"))
    }

    pub fn f64(&self, name: &str) -> Result<f64, DecodeError> {
        self.require(name)?.as_f64().ok_or_else(|| type_err(name, "a number"))
    }

    pub fn str(&self, name: &str) -> Result<&str, DecodeError> {
        self.require(name)?.as_str().ok_or_else(|| type_err(name, "text"))
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8], DecodeError> {
        self.require(name)?.as_bytes().ok_or_else(|| type_err(name, "a byte string"))
    }

    pub fn list(&self, name: &str) -> Result<&[Value], DecodeError> {
        self.require(name)?.as_list().ok_or_else(|| type_err(name, "a list"))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ── RecordSchema ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Slot {
    name:      String,
    format:    FieldFormat,
    transform: Transform,
    offset:    usize,
    width:     usize,
}

#[derive(Debug, Clone)]
enum Body {
    Fields(Vec<Slot>),
    Repeat { item: Arc<RecordSchema>, count: usize },
}

/// A compiled fixed-size record layout.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    name: String,
    body: Body,
    size: usize,
}

impl RecordSchema {
    /// Compile `fields` in order.  When `expected` is given the compiled size
    /// must match it exactly.
    pub fn build(
        name:     &str,
        fields:   impl IntoIterator<Item = FieldSpec>,
        expected: Option<usize>,
    ) -> Result<Arc<Self>, SchemaError> {
        let mut slots = Vec::new();
        let mut offset = 0usize;
        for spec in fields {
            let format = match spec.format {
                FormatRef::Schema(s) => FieldFormat::Nested(s),
                FormatRef::Code(code) => FieldFormat::parse(&code).ok_or_else(|| {
                    SchemaError::UnsupportedFormat { field: spec.name.clone(), code }
                })?,
            };
            let too_large = || SchemaError::TooLarge(name.to_owned());
            let width = format.width().ok_or_else(too_large)?;
            let transform = if format.is_pad() { Transform::Omit } else { spec.transform };
            slots.push(Slot { name: spec.name, format, transform, offset, width });
            offset = offset.checked_add(width).ok_or_else(too_large)?;
        }
        if let Some(expected) = expected {
            if expected != offset {
                return Err(SchemaError::SizeMismatch {
                    schema: name.to_owned(),
                    expected,
                    actual: offset,
                });
            }
        }
        Ok(Arc::new(Self { name: name.to_owned(), body: Body::Fields(slots), size: offset }))
    }

    /// A schema of `count` contiguous copies of `self`, decoding to a list.
    pub fn repeat(self: &Arc<Self>, count: usize) -> Result<Arc<RecordSchema>, SchemaError> {
        let name = format!("{}[{}]", self.name, count);
        let size = self.size.checked_mul(count).ok_or_else(|| SchemaError::TooLarge(name.clone()))?;
        Ok(Arc::new(Self {
            name,
            body: Body::Repeat { item: Arc::clone(self), count },
            size,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact byte length of one encoded record.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Field names in layout order, including omitted ones.
    pub fn field_names(&self) -> Vec<&str> {
        match &self.body {
            Body::Fields(slots) => slots.iter().map(|s| s.name.as_str()).collect(),
            Body::Repeat { .. } => Vec::new(),
        }
    }

    /// Byte offset of a field within one record.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        match &self.body {
            Body::Fields(slots) => slots.iter().find(|s| s.name == name).map(|s| s.offset),
            Body::Repeat { .. } => None,
        }
    }

    fn check_len(&self, len: usize) -> Result<(), DecodeError> {
        if len != self.size {
            return Err(DecodeError::LengthMismatch {
                schema:   self.name.clone(),
                expected: self.size,
                actual:   len,
            });
        }
        Ok(())
    }

    /// Decode exactly [`size`](Self::size) bytes.  Returns a
    /// [`Value::Record`], or a [`Value::List`] for repeated schemas.
    pub fn decode(&self, bytes: &[u8], endian: Endian) -> Result<Value, DecodeError> {
        self.check_len(bytes.len())?;
        Ok(match endian {
            Endian::Little => self.decode_exact::<LittleEndian>(bytes),
            Endian::Big    => self.decode_exact::<BigEndian>(bytes),
        })
    }

    /// Like [`decode`](Self::decode) but requires a single-record schema.
    pub fn decode_record(&self, bytes: &[u8], endian: Endian) -> Result<Record, DecodeError> {
        match self.decode(bytes, endian)? {
            Value::Record(r) => Ok(r),
            _ => Err(DecodeError::NotARecord(self.name.clone())),
        }
    }

    fn decode_exact<B: byteorder::ByteOrder>(&self, bytes: &[u8]) -> Value {
        match &self.body {
            Body::Repeat { item, count } => {
                let step = item.size;
                Value::List(
                    (0..*count)
                        .map(|i| item.decode_exact::<B>(&bytes[i * step..(i + 1) * step]))
                        .collect(),
                )
            }
            Body::Fields(slots) => {
                let mut record = Record { fields: Vec::with_capacity(slots.len()) };
                for slot in slots {
                    if let Transform::Omit = slot.transform {
                        continue;
                    }
                    let buf = &bytes[slot.offset..slot.offset + slot.width];
                    let value = match &slot.format {
                        FieldFormat::Scalar(p) => p.read::<B>(buf),
                        FieldFormat::Array(p, _) => {
                            Value::List(buf.chunks_exact(p.width()).map(|c| p.read::<B>(c)).collect())
                        }
                        FieldFormat::Bytes(_) => Value::Bytes(buf.to_vec()),
                        FieldFormat::Pascal(_) => Value::Bytes(pascal(buf).to_vec()),
                        FieldFormat::Nested(s) => s.decode_exact::<B>(buf),
                    };
                    let value = match slot.transform {
                        Transform::CString => match value {
                            Value::Bytes(b) => Value::Text(cstr(&b)),
                            other => other,
                        },
                        Transform::Custom(f) => f(value),
                        Transform::Identity | Transform::Omit => value,
                    };
                    record.fields.push((slot.name.clone(), value));
                }
                Value::Record(record)
            }
        }
    }

    /// Encode `value` into a zero-initialised buffer of [`size`](Self::size)
    /// bytes.  Fields absent from the record are left as zero bytes.
    pub fn encode(&self, value: &Value, endian: Endian) -> Result<Vec<u8>, DecodeError> {
        let mut out = vec![0u8; self.size];
        match endian {
            Endian::Little => self.encode_into::<LittleEndian>(value, &mut out)?,
            Endian::Big    => self.encode_into::<BigEndian>(value, &mut out)?,
        }
        Ok(out)
    }

    pub fn encode_record(&self, record: &Record, endian: Endian) -> Result<Vec<u8>, DecodeError> {
        self.encode(&Value::Record(record.clone()), endian)
    }

    fn encode_into<B: byteorder::ByteOrder>(&self, value: &Value, out: &mut [u8]) -> Result<(), DecodeError> {
        match &self.body {
            Body::Repeat { item, count } => {
                let items = value.as_list().ok_or_else(|| type_err(&self.name, "a list"))?;
                for (i, v) in items.iter().enumerate().take(*count) {
                    item.encode_into::<B>(v, &mut out[i * item.size..(i + 1) * item.size])?;
                }
            }
            Body::Fields(slots) => {
                let record = value.as_record().ok_or_else(|| type_err(&self.name, "a record"))?;
                for slot in slots {
                    let Some(v) = record.get(&slot.name) else { continue };
                    let buf = &mut out[slot.offset..slot.offset + slot.width];
                    match &slot.format {
                        FieldFormat::Scalar(p) => p.write::<B>(&slot.name, v, buf)?,
                        FieldFormat::Array(p, _) => {
                            let items = v.as_list().ok_or_else(|| type_err(&slot.name, "a list"))?;
                            for (chunk, item) in buf.chunks_exact_mut(p.width()).zip(items) {
                                p.write::<B>(&slot.name, item, chunk)?;
                            }
                        }
                        FieldFormat::Bytes(n) => {
                            let src = v.as_bytes().ok_or_else(|| type_err(&slot.name, "a byte string"))?;
                            let len = src.len().min(*n);
                            buf[..len].copy_from_slice(&src[..len]);
                        }
                        FieldFormat::Pascal(n) => {
                            let src = v.as_bytes().ok_or_else(|| type_err(&slot.name, "a byte string"))?;
                            if *n > 0 {
                                let len = src.len().min(*n - 1).min(u8::MAX as usize);
                                buf[0] = len as u8;
                                buf[1..=len].copy_from_slice(&src[..len]);
                            }
                        }
                        FieldFormat::Nested(s) => s.encode_into::<B>(v, buf)?,
                    }
                }
            }
        }
        Ok(())
    }
}
