//! FIDL message decoder
//!
//! Decoding is a single validating walk over the message bytes driven by a
//! [`Type`]. The primary object sits at offset 0 of the body; out-of-line
//! objects follow in depth-first order, each claimed from a cursor that only
//! moves forward. Every byte must be claimed exactly once and every handle
//! consumed exactly once, or the message is rejected.
//!
//! The decoder owns the handle array. Handles move into the value tree as
//! their slots are reached; on any error the partial tree and the unreached
//! handles are dropped together, so nothing leaks. Handles carried by
//! unknown envelopes go to a side buffer that is closed when decoding ends.

use blinc_fuchsia_zircon::Handle;
use smallvec::SmallVec;

use crate::coding::{StructType, TableType, Type, UnionType};
use crate::handle::{check_handle, HANDLE_ABSENT, HANDLE_PRESENT};
use crate::value::{Table, UnionValue, UnknownData, Value, Variant};
use crate::wire::{self, align8, ALLOC_ABSENT, ALLOC_PRESENT, ENVELOPE_SIZE};
use crate::{
    Error, MessageHeader, Result, MAX_HANDLES, MAX_MESSAGE_SIZE, MAX_RECURSION_DEPTH,
};

/// Decode a transactional message: header followed by a body of type `ty`
pub fn decode_message(bytes: &[u8], handles: Vec<Handle>, ty: &Type) -> Result<(MessageHeader, Value)> {
    let header = MessageHeader::decode(bytes)?;
    let value = decode(&bytes[MessageHeader::SIZE..], handles, ty)?;
    Ok((header, value))
}

/// Decode a non-transactional body of type `ty`
///
/// On error every handle in `handles` is closed.
pub fn decode(bytes: &[u8], handles: Vec<Handle>, ty: &Type) -> Result<Value> {
    Decoder::new(bytes, handles)?.decode_body(ty)
}

/// Bookkeeping for one open envelope
#[derive(Clone, Copy, Debug)]
struct EnvelopeFrame {
    /// Out-of-line cursor when the envelope was entered
    start_offset: usize,
    /// Handle index when the envelope was entered
    start_handle: usize,
    num_bytes: usize,
    num_handles: usize,
}

/// FIDL message decoder
///
/// Decodes a message body from bytes + handles received from a channel.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    /// Handles received with message; consumed slots are left invalid
    handles: Vec<Handle>,
    handle_index: usize,
    /// Start of the next out-of-line object
    next_out_of_line: usize,
    /// Out-of-line depth
    depth: usize,
    envelopes: SmallVec<[EnvelopeFrame; 8]>,
    /// Handles from unknown envelopes, closed when the decoder drops
    unknown_handles: Vec<Handle>,
}

impl std::fmt::Debug for Decoder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("len", &self.bytes.len())
            .field("handles", &self.handles.len())
            .field("handle_index", &self.handle_index)
            .field("next_out_of_line", &self.next_out_of_line)
            .field("depth", &self.depth)
            .finish()
    }
}

impl<'a> Decoder<'a> {
    /// Create a decoder over a message body
    ///
    /// Fails (closing the handles) if the message exceeds the transport
    /// limits.
    pub fn new(bytes: &'a [u8], handles: Vec<Handle>) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if handles.len() > MAX_HANDLES {
            return Err(Error::TooManyHandles {
                count: handles.len(),
                max: MAX_HANDLES,
            });
        }
        Ok(Self {
            bytes,
            handles,
            handle_index: 0,
            next_out_of_line: 0,
            depth: 0,
            envelopes: SmallVec::new(),
            unknown_handles: Vec::new(),
        })
    }

    /// Decode the whole body as one value of type `ty`
    pub fn decode_body(mut self, ty: &Type) -> Result<Value> {
        let inline_size = ty.inline_size();
        let primary = align8(inline_size).ok_or(Error::OutOfRange { offset: 0 })?;
        if self.bytes.len() < primary {
            return Err(Error::BufferUnderflow {
                needed: primary,
                available: self.bytes.len(),
            });
        }
        self.check_zero(inline_size, primary)?;
        self.next_out_of_line = primary;

        let value = self.decode_inline(ty, 0)?;

        if self.next_out_of_line != self.bytes.len() {
            return Err(Error::ExtraBytes {
                count: self.bytes.len() - self.next_out_of_line,
            });
        }
        if self.handle_index != self.handles.len() {
            return Err(Error::ExtraHandles {
                count: self.handles.len() - self.handle_index,
            });
        }
        if !self.unknown_handles.is_empty() {
            tracing::debug!(
                count = self.unknown_handles.len(),
                "closing handles from unknown envelopes"
            );
        }
        Ok(value)
    }

    /// Claim the next `len` bytes of out-of-line space
    ///
    /// The claim is rounded up to 8 bytes and the rounding padding must be
    /// zero. Returns the claimed offset.
    fn claim(&mut self, len: usize) -> Result<usize> {
        let start = self.next_out_of_line;
        let end = align8(len)
            .and_then(|padded| start.checked_add(padded))
            .ok_or(Error::OutOfRange { offset: start })?;
        if end > self.bytes.len() {
            return Err(Error::OutOfRange { offset: start });
        }
        self.check_zero(start + len, end)?;
        self.next_out_of_line = end;
        Ok(start)
    }

    fn check_zero(&self, start: usize, end: usize) -> Result<()> {
        match wire::find_nonzero(self.bytes, start, end) {
            Some(offset) => Err(Error::NonZeroPadding { offset }),
            None => Ok(()),
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_RECURSION_DEPTH {
            return Err(Error::MaxDepthExceeded);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn take_handle(&mut self) -> Result<Handle> {
        let slot = self
            .handles
            .get_mut(self.handle_index)
            .ok_or(Error::MissingHandles)?;
        let handle = slot.take();
        self.handle_index += 1;
        if handle.is_invalid() {
            return Err(Error::InvalidHandle);
        }
        Ok(handle)
    }

    fn decode_inline(&mut self, ty: &Type, offset: usize) -> Result<Value> {
        let bytes = self.bytes;
        let value = match *ty {
            Type::Bool => match bytes[offset] {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                value => return Err(Error::InvalidBool { value }),
            },
            Type::U8 => Value::U8(bytes[offset]),
            Type::I8 => Value::I8(bytes[offset] as i8),
            Type::U16 => Value::U16(wire::read_u16(bytes, offset)),
            Type::I16 => Value::I16(wire::read_u16(bytes, offset) as i16),
            Type::U32 => Value::U32(wire::read_u32(bytes, offset)),
            Type::I32 => Value::I32(wire::read_u32(bytes, offset) as i32),
            Type::U64 => Value::U64(wire::read_u64(bytes, offset)),
            Type::I64 => Value::I64(wire::read_u64(bytes, offset) as i64),
            Type::F32 => Value::F32(f32::from_bits(wire::read_u32(bytes, offset))),
            Type::F64 => Value::F64(f64::from_bits(wire::read_u64(bytes, offset))),
            Type::Handle {
                object_type,
                rights,
                nullable,
            } => match wire::read_u32(bytes, offset) {
                HANDLE_PRESENT => {
                    let handle = self.take_handle()?;
                    Value::Handle(Some(check_handle(handle, object_type, rights)?))
                }
                HANDLE_ABSENT if nullable => Value::Handle(None),
                HANDLE_ABSENT => return Err(Error::NonNullableAbsent { kind: "handle" }),
                _ => return Err(Error::InvalidHandlePresenceIndicator { offset }),
            },
            Type::String { max_len, nullable } => {
                let Some(len) = self.decode_vector_header(offset, nullable, "string")? else {
                    return Ok(Value::String(None));
                };
                if len > u64::from(max_len) {
                    return Err(Error::StringTooLong { len, max: max_len });
                }
                let len = usize::try_from(len).map_err(|_| Error::OutOfRange { offset })?;
                let start = self.claim(len)?;
                let s = std::str::from_utf8(&bytes[start..start + len])
                    .map_err(|_| Error::InvalidUtf8)?;
                Value::String(Some(s.to_owned()))
            }
            Type::Vector {
                element,
                max_len,
                nullable,
            } => {
                let Some(count) = self.decode_vector_header(offset, nullable, "vector")? else {
                    return Ok(Value::Vector(None));
                };
                if count > u64::from(max_len) {
                    return Err(Error::VectorTooLong { len: count, max: max_len });
                }
                let stride = element.inline_size();
                let count = usize::try_from(count).map_err(|_| Error::OutOfRange { offset })?;
                let size = count
                    .checked_mul(stride)
                    .ok_or(Error::OutOfRange { offset })?;
                let start = self.claim(size)?;
                self.enter()?;
                let elements = (0..count)
                    .map(|i| self.decode_inline(element, start + i * stride))
                    .collect::<Result<Vec<_>>>()?;
                self.leave();
                Value::Vector(Some(elements))
            }
            Type::Array { element, len } => {
                let stride = element.inline_size();
                let elements = (0..len as usize)
                    .map(|i| self.decode_inline(element, offset + i * stride))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array(elements)
            }
            Type::Struct(st) => self.decode_struct(st, offset)?,
            Type::Box(st) => match wire::read_u64(bytes, offset) {
                ALLOC_PRESENT => {
                    let start = self.claim(st.size as usize)?;
                    self.enter()?;
                    let inner = self.decode_struct(st, start)?;
                    self.leave();
                    Value::Box(Some(Box::new(inner)))
                }
                ALLOC_ABSENT => Value::Box(None),
                _ => return Err(Error::InvalidPresenceIndicator { offset }),
            },
            Type::Union { union, nullable } => self.decode_union(union, nullable, offset)?,
            Type::Table(table) => self.decode_table(table, offset)?,
        };
        Ok(value)
    }

    /// Count of a vector or string header, or `None` when absent
    fn decode_vector_header(&self, offset: usize, nullable: bool, kind: &'static str) -> Result<Option<u64>> {
        let count = wire::read_u64(self.bytes, offset);
        match wire::read_u64(self.bytes, offset + 8) {
            ALLOC_PRESENT => Ok(Some(count)),
            ALLOC_ABSENT if count != 0 => Err(Error::InvalidPresenceIndicator { offset }),
            ALLOC_ABSENT if nullable => Ok(None),
            ALLOC_ABSENT => Err(Error::NonNullableAbsent { kind }),
            _ => Err(Error::InvalidPresenceIndicator { offset: offset + 8 }),
        }
    }

    fn decode_struct(&mut self, st: &StructType, offset: usize) -> Result<Value> {
        for (start, end) in st.padding() {
            self.check_zero(offset + start, offset + end)?;
        }
        let fields = st
            .fields
            .iter()
            .map(|field| self.decode_inline(&field.ty, offset + field.offset as usize))
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Struct(fields))
    }

    fn decode_union(&mut self, union: &UnionType, nullable: bool, offset: usize) -> Result<Value> {
        let ordinal = wire::read_u64(self.bytes, offset);
        if ordinal == 0 {
            let envelope = offset + 8;
            if self.bytes[envelope..envelope + ENVELOPE_SIZE].iter().any(|&b| b != 0) {
                return Err(Error::InvalidUnionOrdinal { ordinal });
            }
            if !nullable {
                return Err(Error::NonNullableAbsent { kind: "union" });
            }
            return Ok(Value::Union(None));
        }

        let member = union.member(ordinal);
        if member.is_none() && union.strict {
            return Err(Error::UnknownUnionOrdinal { ordinal });
        }
        let variant = self
            .decode_envelope(member.map(|m| &m.ty), offset + 8)?
            .ok_or(Error::InvalidEnvelope { offset: offset + 8 })?;
        Ok(Value::Union(Some(Box::new(UnionValue { ordinal, variant }))))
    }

    fn decode_table(&mut self, table: &TableType, offset: usize) -> Result<Value> {
        let max_ordinal = wire::read_u64(self.bytes, offset);
        match wire::read_u64(self.bytes, offset + 8) {
            ALLOC_PRESENT => {}
            ALLOC_ABSENT => return Err(Error::NonNullableAbsent { kind: "table" }),
            _ => return Err(Error::InvalidPresenceIndicator { offset: offset + 8 }),
        }

        let size = usize::try_from(max_ordinal)
            .ok()
            .and_then(|count| count.checked_mul(ENVELOPE_SIZE))
            .ok_or(Error::OutOfRange { offset })?;
        let start = self.claim(size)?;
        self.enter()?;
        let mut fields = Vec::new();
        for ordinal in 1..=max_ordinal {
            let envelope = start + (ordinal as usize - 1) * ENVELOPE_SIZE;
            let ty = table.field(ordinal).map(|f| &f.ty);
            if let Some(variant) = self.decode_envelope(ty, envelope)? {
                fields.push((ordinal, variant));
            }
        }
        self.leave();
        Ok(Value::Table(Table { fields }))
    }

    /// Decode one envelope; `ty` is `None` when the member is unknown
    ///
    /// Returns `None` for an absent envelope.
    fn decode_envelope(&mut self, ty: Option<&Type>, offset: usize) -> Result<Option<Variant>> {
        let num_bytes = wire::read_u32(self.bytes, offset) as usize;
        let num_handles = wire::read_u32(self.bytes, offset + 4) as usize;
        match wire::read_u64(self.bytes, offset + 8) {
            ALLOC_PRESENT => {}
            ALLOC_ABSENT if num_bytes == 0 && num_handles == 0 => return Ok(None),
            ALLOC_ABSENT => return Err(Error::InvalidEnvelope { offset }),
            _ => return Err(Error::InvalidPresenceIndicator { offset: offset + 8 }),
        }
        if num_bytes % 8 != 0 {
            return Err(Error::InvalidEnvelope { offset });
        }
        if num_handles > self.handles.len() - self.handle_index {
            return Err(Error::MissingHandles);
        }

        self.enter()?;
        self.envelopes.push(EnvelopeFrame {
            start_offset: self.next_out_of_line,
            start_handle: self.handle_index,
            num_bytes,
            num_handles,
        });

        let variant = match ty {
            Some(ty) => {
                let inline_size = ty.inline_size();
                let start = self.claim(inline_size)?;
                Variant::Known(self.decode_inline(ty, start)?)
            }
            None => {
                let start = self.claim(num_bytes)?;
                let bytes = self.bytes[start..start + num_bytes].to_vec();
                for _ in 0..num_handles {
                    let handle = self.take_handle()?;
                    self.unknown_handles.push(handle);
                }
                Variant::Unknown(UnknownData {
                    bytes,
                    handle_count: num_handles as u32,
                })
            }
        };

        self.leave_envelope()?;
        self.leave();
        Ok(Some(variant))
    }

    fn leave_envelope(&mut self) -> Result<()> {
        let Some(frame) = self.envelopes.pop() else {
            return Ok(());
        };
        let consumed_bytes = self.next_out_of_line - frame.start_offset;
        if consumed_bytes != frame.num_bytes {
            return Err(Error::EnvelopeBytesMismatch {
                declared: frame.num_bytes,
                consumed: consumed_bytes,
            });
        }
        let consumed_handles = self.handle_index - frame.start_handle;
        if consumed_handles != frame.num_handles {
            return Err(Error::EnvelopeHandlesMismatch {
                declared: frame.num_handles,
                consumed: consumed_handles,
            });
        }
        Ok(())
    }
}
