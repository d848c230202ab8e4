//! Owned, decoded values
//!
//! The decoder copies a validated message into a [`Value`] tree and the
//! encoder consumes one. Handles inside the tree are owned: dropping a value
//! closes them, encoding moves them into the outgoing message.

use blinc_fuchsia_zircon::Handle;

/// A decoded value, shaped by the [`Type`](crate::Type) it was decoded with
#[derive(Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Handle(Option<Handle>),
    String(Option<String>),
    Vector(Option<Vec<Value>>),
    Array(Vec<Value>),
    /// Field values in declaration order
    Struct(Vec<Value>),
    Box(Option<Box<Value>>),
    Union(Option<Box<UnionValue>>),
    Table(Table),
}

/// Content of one envelope
#[derive(Debug, PartialEq)]
pub enum Variant {
    /// Member known to the decoding descriptor
    Known(Value),
    /// Member unknown to the decoding descriptor
    Unknown(UnknownData),
}

/// Raw content of an envelope whose type was not known at decode time
///
/// Only the bytes are kept. The handles the envelope carried were closed
/// during decoding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnknownData {
    pub bytes: Vec<u8>,
    pub handle_count: u32,
}

/// A selected union member
#[derive(Debug, PartialEq)]
pub struct UnionValue {
    pub ordinal: u64,
    pub variant: Variant,
}

/// Present table members, ordered by ordinal
#[derive(Debug, Default, PartialEq)]
pub struct Table {
    pub fields: Vec<(u64, Variant)>,
}

impl Value {
    /// Present string
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Some(s.into()))
    }

    /// Present vector
    pub fn vector(elements: Vec<Value>) -> Self {
        Value::Vector(Some(elements))
    }

    /// Present handle
    pub fn handle(handle: impl Into<Handle>) -> Self {
        Value::Handle(Some(handle.into()))
    }

    /// Present union holding a known member
    pub fn union(ordinal: u64, value: Value) -> Self {
        Value::Union(Some(Box::new(UnionValue {
            ordinal,
            variant: Variant::Known(value),
        })))
    }

    /// Present boxed struct
    pub fn boxed(fields: Vec<Value>) -> Self {
        Value::Box(Some(Box::new(Value::Struct(fields))))
    }

    /// Short name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U8(_) => "uint8",
            Value::I8(_) => "int8",
            Value::U16(_) => "uint16",
            Value::I16(_) => "int16",
            Value::U32(_) => "uint32",
            Value::I32(_) => "int32",
            Value::U64(_) => "uint64",
            Value::I64(_) => "int64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::Handle(_) => "handle",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
            Value::Box(_) => "box",
            Value::Union(_) => "union",
            Value::Table(_) => "table",
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(Some(s)) => Some(s),
            _ => None,
        }
    }

    /// Fields of an inline or boxed struct
    pub fn fields(&self) -> Option<&[Value]> {
        match self {
            Value::Struct(fields) => Some(fields),
            Value::Box(Some(inner)) => inner.fields(),
            _ => None,
        }
    }

    /// Take ownership of a struct's fields
    pub fn into_fields(self) -> Option<Vec<Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            Value::Box(Some(inner)) => inner.into_fields(),
            _ => None,
        }
    }

    /// Take the handle out of a handle value
    pub fn into_handle(self) -> Option<Handle> {
        match self {
            Value::Handle(handle) => handle,
            _ => None,
        }
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a known member
    pub fn with(mut self, ordinal: u64, value: Value) -> Self {
        self.insert(ordinal, value);
        self
    }

    /// Insert or replace a known member, keeping ordinal order
    pub fn insert(&mut self, ordinal: u64, value: Value) {
        match self.fields.binary_search_by_key(&ordinal, |(o, _)| *o) {
            Ok(i) => self.fields[i].1 = Variant::Known(value),
            Err(i) => self.fields.insert(i, (ordinal, Variant::Known(value))),
        }
    }

    /// Known member at `ordinal`
    pub fn get(&self, ordinal: u64) -> Option<&Value> {
        self.fields.iter().find_map(|(o, variant)| match variant {
            Variant::Known(value) if *o == ordinal => Some(value),
            _ => None,
        })
    }

    /// Members the decoder did not recognize
    pub fn unknown(&self) -> impl Iterator<Item = (u64, &UnknownData)> {
        self.fields.iter().filter_map(|(o, variant)| match variant {
            Variant::Unknown(data) => Some((*o, data)),
            Variant::Known(_) => None,
        })
    }
}
