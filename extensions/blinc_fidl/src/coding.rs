//! Coding tables
//!
//! A [`Type`] describes the wire shape of one value. Bindings declare them as
//! `static` tables, one per struct, union and table in a library, and hand a
//! reference to the encoder or decoder. Descriptors carry only what the codec
//! needs: sizes, field offsets, bounds, nullability, handle constraints and
//! member ordinals.
//!
//! ```ignore
//! static POINT: StructType = StructType {
//!     name: "geo/Point",
//!     size: 8,
//!     alignment: 4,
//!     fields: &[
//!         StructField { name: "x", offset: 0, ty: Type::I32 },
//!         StructField { name: "y", offset: 4, ty: Type::I32 },
//!     ],
//! };
//! ```

use blinc_fuchsia_zircon::Rights;

use crate::handle::ObjectType;
use crate::wire::{TABLE_SIZE, UNION_SIZE, VECTOR_HEADER_SIZE};

/// Bound used for unbounded strings and vectors
pub const MAX_BOUND: u32 = u32::MAX;

/// Wire shape of a value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
    /// Handle slot
    Handle {
        /// Required object type (`ObjectType::None` accepts any)
        object_type: ObjectType,
        /// Rights the handle is narrowed to (`SAME_RIGHTS` keeps them)
        rights: Rights,
        nullable: bool,
    },
    /// UTF-8 string with a byte bound
    String { max_len: u32, nullable: bool },
    /// Vector with an element bound
    Vector {
        element: &'static Type,
        max_len: u32,
        nullable: bool,
    },
    /// Fixed-size inline array
    Array { element: &'static Type, len: u32 },
    /// Inline struct
    Struct(&'static StructType),
    /// Optional out-of-line struct
    Box(&'static StructType),
    /// Union (ordinal + envelope)
    Union {
        union: &'static UnionType,
        nullable: bool,
    },
    /// Table (envelope vector)
    Table(&'static TableType),
}

/// Layout of a struct
#[derive(Debug, PartialEq, Eq)]
pub struct StructType {
    pub name: &'static str,
    /// Inline size including trailing padding
    pub size: u32,
    pub alignment: u32,
    /// Fields in offset order
    pub fields: &'static [StructField],
}

/// One struct member
#[derive(Debug, PartialEq, Eq)]
pub struct StructField {
    pub name: &'static str,
    pub offset: u32,
    pub ty: Type,
}

/// Members of a union
#[derive(Debug, PartialEq, Eq)]
pub struct UnionType {
    pub name: &'static str,
    pub members: &'static [UnionMember],
    /// Strict unions reject unknown ordinals
    pub strict: bool,
}

/// One union member
#[derive(Debug, PartialEq, Eq)]
pub struct UnionMember {
    pub ordinal: u64,
    pub name: &'static str,
    pub ty: Type,
}

/// Members of a table
#[derive(Debug, PartialEq, Eq)]
pub struct TableType {
    pub name: &'static str,
    /// Fields in ordinal order
    pub fields: &'static [TableField],
}

/// One table member
#[derive(Debug, PartialEq, Eq)]
pub struct TableField {
    pub ordinal: u64,
    pub name: &'static str,
    pub ty: Type,
}

impl Type {
    /// Any handle, rights unchanged
    pub const HANDLE: Type = Type::Handle {
        object_type: ObjectType::None,
        rights: Rights::SAME_RIGHTS,
        nullable: false,
    };

    /// Unbounded, non-nullable string
    pub const STRING: Type = Type::String {
        max_len: MAX_BOUND,
        nullable: false,
    };

    /// Size of the inline part
    pub fn inline_size(&self) -> usize {
        match self {
            Type::Bool | Type::U8 | Type::I8 => 1,
            Type::U16 | Type::I16 => 2,
            Type::U32 | Type::I32 | Type::F32 | Type::Handle { .. } => 4,
            Type::U64 | Type::I64 | Type::F64 => 8,
            Type::String { .. } | Type::Vector { .. } => VECTOR_HEADER_SIZE,
            Type::Array { element, len } => element.inline_size() * *len as usize,
            Type::Struct(s) => s.size as usize,
            Type::Box(_) => 8,
            Type::Union { .. } => UNION_SIZE,
            Type::Table(_) => TABLE_SIZE,
        }
    }

    /// Alignment of the inline part
    pub fn alignment(&self) -> usize {
        match self {
            Type::Array { element, .. } => element.alignment(),
            Type::Struct(s) => s.alignment as usize,
            Type::String { .. }
            | Type::Vector { .. }
            | Type::Box(_)
            | Type::Union { .. }
            | Type::Table(_) => 8,
            primitive => primitive.inline_size(),
        }
    }

    /// Short name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::U8 => "uint8",
            Type::I8 => "int8",
            Type::U16 => "uint16",
            Type::I16 => "int16",
            Type::U32 => "uint32",
            Type::I32 => "int32",
            Type::U64 => "uint64",
            Type::I64 => "int64",
            Type::F32 => "float32",
            Type::F64 => "float64",
            Type::Handle { .. } => "handle",
            Type::String { .. } => "string",
            Type::Vector { .. } => "vector",
            Type::Array { .. } => "array",
            Type::Struct(_) => "struct",
            Type::Box(_) => "box",
            Type::Union { .. } => "union",
            Type::Table(_) => "table",
        }
    }
}

impl StructType {
    /// Padding gaps as `(start, end)` ranges relative to the struct start
    pub(crate) fn padding(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let ends = self
            .fields
            .iter()
            .map(|f| f.offset as usize + f.ty.inline_size());
        let starts = self
            .fields
            .iter()
            .skip(1)
            .map(|f| f.offset as usize)
            .chain(std::iter::once(self.size as usize));
        let first = self.fields.first().map_or(self.size as usize, |f| f.offset as usize);
        std::iter::once((0, first))
            .chain(ends.zip(starts))
            .filter(|(start, end)| start < end)
    }
}

impl UnionType {
    /// Member for `ordinal`
    pub fn member(&self, ordinal: u64) -> Option<&UnionMember> {
        self.members.iter().find(|m| m.ordinal == ordinal)
    }
}

impl TableType {
    /// Field for `ordinal`
    pub fn field(&self, ordinal: u64) -> Option<&TableField> {
        self.fields.iter().find(|f| f.ordinal == ordinal)
    }
}
