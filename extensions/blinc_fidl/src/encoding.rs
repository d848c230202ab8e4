//! FIDL message encoder

use blinc_fuchsia_zircon::{Channel, Handle};

use crate::coding::{StructType, TableType, Type};
use crate::handle::{HandleDisposition, HANDLE_PRESENT};
use crate::value::{Table, UnionValue, Value, Variant};
use crate::wire::{self, align8, ALLOC_PRESENT, ENVELOPE_SIZE};
use crate::{
    Error, MessageHeader, Ordinal, Result, TransactionId, MAX_HANDLES, MAX_MESSAGE_SIZE,
    MAX_RECURSION_DEPTH,
};

/// Encode a non-transactional body
pub fn encode(ty: &Type, value: Value) -> Result<(Vec<u8>, Vec<Handle>)> {
    let mut encoder = Encoder::new();
    encoder.encode(ty, value)?;
    encoder.finish()
}

/// FIDL message encoder
///
/// Walks a [`Value`] against its [`Type`] and lays it out in wire order:
/// the primary object first, then out-of-line objects depth-first, each
/// padded to 8 bytes. Handles are taken out of the value in traversal order
/// and held until the message is written; dropping the encoder closes them.
///
/// The first failure is sticky: every later call returns the same error and
/// does nothing, so a sequence of steps can be checked once at the end.
#[derive(Debug, Default)]
pub struct Encoder {
    bytes: Vec<u8>,
    handles: Vec<HandleDisposition>,
    /// Whether `bytes` starts with a transactional header
    has_header: bool,
    depth: usize,
    error: Option<Error>,
}

impl Encoder {
    /// Encoder for a non-transactional body
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoder writing into caller-provided storage
    ///
    /// Both vectors are cleared; their capacity is reused.
    pub fn with_buffers(mut bytes: Vec<u8>, mut handles: Vec<HandleDisposition>) -> Self {
        bytes.clear();
        handles.clear();
        Self {
            bytes,
            handles,
            ..Self::default()
        }
    }

    /// Encoder for a transactional message starting with `header`
    pub fn with_header(header: MessageHeader) -> Self {
        let mut encoder = Self::with_buffers(Vec::with_capacity(256), Vec::new());
        encoder.bytes.extend_from_slice(&header.encode());
        encoder.has_header = true;
        encoder
    }

    /// Encoder for a request, response or event
    ///
    /// The txid is usually patched later with [`set_txid`](Self::set_txid)
    /// by whoever routes the message.
    pub fn message(txid: TransactionId, ordinal: Ordinal) -> Self {
        Self::with_header(MessageHeader::new(txid, ordinal))
    }

    /// Adopt an already-encoded message, taking ownership of its handles
    ///
    /// When `transactional` is set the bytes must start with a valid header;
    /// otherwise the encoder starts out in the error state.
    pub fn from_encoded(bytes: Vec<u8>, handles: Vec<Handle>, transactional: bool) -> Self {
        let mut encoder = Self {
            bytes,
            handles: handles.into_iter().map(HandleDisposition::move_handle).collect(),
            has_header: transactional,
            ..Self::default()
        };
        let checked = encoder.check_limits().and_then(|()| {
            if transactional {
                MessageHeader::decode(&encoder.bytes).map(|_| ())
            } else {
                Ok(())
            }
        });
        if let Err(error) = checked {
            encoder.fail(error);
        }
        encoder
    }

    /// Append `value` as a primary object of type `ty`
    ///
    /// The value is consumed. On failure its handles and the handles already
    /// extracted are closed and the encoder enters the error state.
    pub fn encode(&mut self, ty: &Type, value: Value) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let result = self.alloc(ty.inline_size()).and_then(|offset| {
            self.encode_inline(ty, value, offset)
        });
        result.map_err(|error| self.fail(error))
    }

    /// Error that stopped encoding, if any
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Encoded bytes so far
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of handles held for transfer
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Patch the header's txid in place
    ///
    /// No-op for non-transactional messages and in the error state.
    pub fn set_txid(&mut self, txid: TransactionId) {
        if self.has_header && self.error.is_none() {
            let patched = MessageHeader::patch_txid(&mut self.bytes, txid);
            debug_assert!(patched.is_ok(), "header present but buffer shorter than a header");
        }
    }

    /// Forget the held handles without closing them
    ///
    /// For handles whose ownership was already transferred some other way.
    pub fn release_handles(&mut self) {
        for disposition in self.handles.drain(..) {
            let _ = disposition.handle.into_raw();
        }
    }

    /// Finish encoding and return (bytes, handles)
    ///
    /// Handles are checked against their slot's object type and narrowed to
    /// its rights. On error every handle is closed.
    pub fn finish(self) -> Result<(Vec<u8>, Vec<Handle>)> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let handles = self
            .handles
            .into_iter()
            .map(HandleDisposition::into_transfer)
            .collect::<Result<Vec<_>>>()?;
        Ok((self.bytes, handles))
    }

    /// Write the message to `channel`
    ///
    /// Handle ownership passes to the transport whether or not the write
    /// succeeds.
    pub fn write(self, channel: &Channel) -> Result<()> {
        let (bytes, mut handles) = self.finish()?;
        channel.write(&bytes, &mut handles).map_err(Error::from)
    }

    fn fail(&mut self, error: Error) -> Error {
        self.handles.clear();
        self.error = Some(error.clone());
        error
    }

    fn check_limits(&self) -> Result<()> {
        if self.bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge {
                size: self.bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if self.handles.len() > MAX_HANDLES {
            return Err(Error::TooManyHandles {
                count: self.handles.len(),
                max: MAX_HANDLES,
            });
        }
        Ok(())
    }

    /// Reserve `len` zeroed bytes (rounded up to 8) at the end
    fn alloc(&mut self, len: usize) -> Result<usize> {
        let offset = self.bytes.len();
        let end = align8(len)
            .and_then(|padded| offset.checked_add(padded))
            .filter(|end| *end <= MAX_MESSAGE_SIZE)
            .ok_or(Error::MessageTooLarge {
                size: offset.saturating_add(len),
                max: MAX_MESSAGE_SIZE,
            })?;
        self.bytes.resize(end, 0);
        Ok(offset)
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

    fn put(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    fn encode_inline(&mut self, ty: &Type, value: Value, offset: usize) -> Result<()> {
        match (*ty, value) {
            (Type::Bool, Value::Bool(v)) => self.bytes[offset] = u8::from(v),
            (Type::U8, Value::U8(v)) => self.bytes[offset] = v,
            (Type::I8, Value::I8(v)) => self.bytes[offset] = v as u8,
            (Type::U16, Value::U16(v)) => self.put(offset, &v.to_le_bytes()),
            (Type::I16, Value::I16(v)) => self.put(offset, &v.to_le_bytes()),
            (Type::U32, Value::U32(v)) => self.put(offset, &v.to_le_bytes()),
            (Type::I32, Value::I32(v)) => self.put(offset, &v.to_le_bytes()),
            (Type::U64, Value::U64(v)) => self.put(offset, &v.to_le_bytes()),
            (Type::I64, Value::I64(v)) => self.put(offset, &v.to_le_bytes()),
            (Type::F32, Value::F32(v)) => self.put(offset, &v.to_le_bytes()),
            (Type::F64, Value::F64(v)) => self.put(offset, &v.to_le_bytes()),
            (
                Type::Handle {
                    object_type,
                    rights,
                    nullable,
                },
                Value::Handle(handle),
            ) => match handle.filter(|h| !h.is_invalid()) {
                Some(handle) => {
                    if self.handles.len() >= MAX_HANDLES {
                        return Err(Error::TooManyHandles {
                            count: self.handles.len() + 1,
                            max: MAX_HANDLES,
                        });
                    }
                    self.handles
                        .push(HandleDisposition::new(handle, object_type, rights));
                    wire::write_u32(&mut self.bytes, offset, HANDLE_PRESENT);
                }
                None if nullable => {}
                None => return Err(Error::NonNullableAbsent { kind: "handle" }),
            },
            (Type::String { max_len, nullable }, Value::String(s)) => match s {
                Some(s) => {
                    let len = s.len() as u64;
                    if len > u64::from(max_len) {
                        return Err(Error::StringTooLong { len, max: max_len });
                    }
                    wire::write_u64(&mut self.bytes, offset, len);
                    wire::write_u64(&mut self.bytes, offset + 8, ALLOC_PRESENT);
                    let start = self.alloc(s.len())?;
                    self.put(start, s.as_bytes());
                }
                None if nullable => {}
                None => return Err(Error::NonNullableAbsent { kind: "string" }),
            },
            (
                Type::Vector {
                    element,
                    max_len,
                    nullable,
                },
                Value::Vector(elements),
            ) => match elements {
                Some(elements) => {
                    let len = elements.len() as u64;
                    if len > u64::from(max_len) {
                        return Err(Error::VectorTooLong { len, max: max_len });
                    }
                    wire::write_u64(&mut self.bytes, offset, len);
                    wire::write_u64(&mut self.bytes, offset + 8, ALLOC_PRESENT);
                    let stride = element.inline_size();
                    let size = elements.len().checked_mul(stride).ok_or(Error::MessageTooLarge {
                        size: usize::MAX,
                        max: MAX_MESSAGE_SIZE,
                    })?;
                    let start = self.alloc(size)?;
                    self.enter()?;
                    for (i, value) in elements.into_iter().enumerate() {
                        self.encode_inline(element, value, start + i * stride)?;
                    }
                    self.leave();
                }
                None if nullable => {}
                None => return Err(Error::NonNullableAbsent { kind: "vector" }),
            },
            (Type::Array { element, len }, Value::Array(elements)) => {
                if elements.len() != len as usize {
                    return Err(Error::ArrayLengthMismatch {
                        expected: len,
                        actual: elements.len(),
                    });
                }
                let stride = element.inline_size();
                for (i, value) in elements.into_iter().enumerate() {
                    self.encode_inline(element, value, offset + i * stride)?;
                }
            }
            (Type::Struct(st), Value::Struct(fields)) => self.encode_struct(st, fields, offset)?,
            (Type::Box(st), Value::Box(inner)) => {
                if let Some(inner) = inner {
                    let fields = match *inner {
                        Value::Struct(fields) => fields,
                        other => {
                            return Err(Error::TypeMismatch {
                                expected: st.name,
                                actual: other.kind(),
                            })
                        }
                    };
                    wire::write_u64(&mut self.bytes, offset, ALLOC_PRESENT);
                    let start = self.alloc(st.size as usize)?;
                    self.enter()?;
                    self.encode_struct(st, fields, start)?;
                    self.leave();
                }
            }
            (Type::Union { union, nullable }, Value::Union(selected)) => match selected {
                Some(selected) => {
                    let UnionValue { ordinal, variant } = *selected;
                    let value = match variant {
                        Variant::Known(value) => value,
                        Variant::Unknown(_) => {
                            return Err(Error::CannotEncodeUnknownVariant { ordinal })
                        }
                    };
                    let member = union
                        .member(ordinal)
                        .ok_or(Error::UnknownUnionOrdinal { ordinal })?;
                    wire::write_u64(&mut self.bytes, offset, ordinal);
                    self.encode_envelope(&member.ty, value, offset + 8)?;
                }
                None if nullable => {}
                None => return Err(Error::NonNullableAbsent { kind: "union" }),
            },
            (Type::Table(table), Value::Table(fields)) => self.encode_table(table, fields, offset)?,
            (ty, value) => {
                return Err(Error::TypeMismatch {
                    expected: ty.kind(),
                    actual: value.kind(),
                })
            }
        }
        Ok(())
    }

    fn encode_struct(&mut self, st: &StructType, fields: Vec<Value>, offset: usize) -> Result<()> {
        if fields.len() != st.fields.len() {
            return Err(Error::TypeMismatch {
                expected: st.name,
                actual: "struct with a different field count",
            });
        }
        for (field, value) in st.fields.iter().zip(fields) {
            self.encode_inline(&field.ty, value, offset + field.offset as usize)?;
        }
        Ok(())
    }

    fn encode_table(&mut self, table: &TableType, value: Table, offset: usize) -> Result<()> {
        if let Some((ordinal, _)) = value
            .fields
            .iter()
            .find(|(_, variant)| matches!(variant, Variant::Unknown(_)))
        {
            return Err(Error::CannotEncodeUnknownVariant { ordinal: *ordinal });
        }
        let ordered = value
            .fields
            .windows(2)
            .all(|pair| pair[0].0 < pair[1].0);
        if !ordered || value.fields.first().is_some_and(|(ordinal, _)| *ordinal == 0) {
            return Err(Error::TypeMismatch {
                expected: table.name,
                actual: "table with unordered or zero ordinals",
            });
        }

        let max_ordinal = value.fields.last().map_or(0, |(ordinal, _)| *ordinal);
        wire::write_u64(&mut self.bytes, offset, max_ordinal);
        wire::write_u64(&mut self.bytes, offset + 8, ALLOC_PRESENT);

        let size = usize::try_from(max_ordinal)
            .ok()
            .and_then(|count| count.checked_mul(ENVELOPE_SIZE))
            .ok_or(Error::MessageTooLarge {
                size: usize::MAX,
                max: MAX_MESSAGE_SIZE,
            })?;
        let start = self.alloc(size)?;
        self.enter()?;
        for (ordinal, variant) in value.fields {
            let Variant::Known(value) = variant else {
                return Err(Error::CannotEncodeUnknownVariant { ordinal });
            };
            let field = table.field(ordinal).ok_or(Error::TypeMismatch {
                expected: table.name,
                actual: "table with a field the descriptor does not declare",
            })?;
            let envelope = start + (ordinal as usize - 1) * ENVELOPE_SIZE;
            self.encode_envelope(&field.ty, value, envelope)?;
        }
        self.leave();
        Ok(())
    }

    fn encode_envelope(&mut self, ty: &Type, value: Value, offset: usize) -> Result<()> {
        let start_bytes = self.bytes.len();
        let start_handles = self.handles.len();

        self.enter()?;
        let body = self.alloc(ty.inline_size())?;
        self.encode_inline(ty, value, body)?;
        self.leave();

        let num_bytes = (self.bytes.len() - start_bytes) as u32;
        let num_handles = (self.handles.len() - start_handles) as u32;
        wire::write_u32(&mut self.bytes, offset, num_bytes);
        wire::write_u32(&mut self.bytes, offset + 4, num_handles);
        wire::write_u64(&mut self.bytes, offset + 8, ALLOC_PRESENT);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding::{StructField, TableField, UnionMember, UnionType, MAX_BOUND};
    use crate::decoding::decode;
    use crate::value::UnknownData;
    use blinc_fuchsia_zircon::{AsHandleRef, EventPair, HandleBased, Signals, Status, Time};

    static ITEM: StructType = StructType {
        name: "test/Item",
        size: 24,
        alignment: 8,
        fields: &[
            StructField { name: "id", offset: 0, ty: Type::U16 },
            StructField { name: "token", offset: 4, ty: Type::HANDLE },
            StructField { name: "label", offset: 8, ty: Type::STRING },
        ],
    };

    static ITEMS: Type = Type::Vector {
        element: &Type::Struct(&ITEM),
        max_len: 8,
        nullable: false,
    };

    static OPTIONS: TableType = TableType {
        name: "test/Options",
        fields: &[
            TableField { ordinal: 1, name: "verbose", ty: Type::Bool },
            TableField { ordinal: 3, name: "name", ty: Type::STRING },
        ],
    };

    static SHAPE: UnionType = UnionType {
        name: "test/Shape",
        members: &[
            UnionMember { ordinal: 1, name: "radius", ty: Type::F64 },
            UnionMember { ordinal: 2, name: "points", ty: Type::Vector { element: &Type::I32, max_len: MAX_BOUND, nullable: false } },
        ],
        strict: false,
    };

    fn item(id: u16, label: &str) -> (Value, EventPair) {
        let (a, b) = EventPair::create().unwrap();
        let value = Value::Struct(vec![Value::U16(id), Value::handle(a), Value::string(label)]);
        (value, b)
    }

    fn peer_closed(peer: &EventPair) -> bool {
        peer.wait_one(Signals::EVENTPAIR_PEER_CLOSED, Time::INFINITE_PAST)
            .map(|s| s.contains(Signals::EVENTPAIR_PEER_CLOSED))
            .unwrap_or(false)
    }

    #[test]
    fn test_string_layout() {
        let (bytes, handles) = encode(&Type::STRING, Value::string("hello")).unwrap();
        assert!(handles.is_empty());
        assert_eq!(bytes.len(), 16 + 8);
        assert_eq!(&bytes[0..8], &5u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &ALLOC_PRESENT.to_le_bytes());
        assert_eq!(&bytes[16..24], b"hello\0\0\0");
    }

    #[test]
    fn test_round_trip_vector_of_structs() {
        let (first, first_peer) = item(1, "one");
        let (second, second_peer) = item(2, "second item");
        let (bytes, handles) = encode(&ITEMS, Value::vector(vec![first, second])).unwrap();
        assert_eq!(handles.len(), 2);
        let koids: Vec<_> = handles.iter().map(|h| h.koid().unwrap()).collect();

        let decoded = decode(&bytes, handles, &ITEMS).unwrap();
        let (again, handles) = encode(&ITEMS, decoded).unwrap();
        assert_eq!(again, bytes);
        let again_koids: Vec<_> = handles.iter().map(|h| h.koid().unwrap()).collect();
        assert_eq!(again_koids, koids);

        assert!(!peer_closed(&first_peer));
        drop(handles);
        assert!(peer_closed(&first_peer));
        assert!(peer_closed(&second_peer));
    }

    #[test]
    fn test_round_trip_table_and_union() {
        let table = Value::Table(Table::new().with(3, Value::string("x")).with(1, Value::Bool(true)));
        let (bytes, _) = encode(&Type::Table(&OPTIONS), table).unwrap();
        // header + 3 envelopes + bool + string header + string data
        assert_eq!(bytes.len(), 16 + 48 + 8 + 16 + 8);
        assert_eq!(&bytes[32..48], &[0; 16]);
        let decoded = decode(&bytes, vec![], &Type::Table(&OPTIONS)).unwrap();
        assert_eq!(encode(&Type::Table(&OPTIONS), decoded).unwrap().0, bytes);

        let ty = Type::Union { union: &SHAPE, nullable: false };
        let shape = Value::union(2, Value::vector(vec![Value::I32(-1), Value::I32(2), Value::I32(3)]));
        let (bytes, _) = encode(&ty, shape).unwrap();
        let decoded = decode(&bytes, vec![], &ty).unwrap();
        assert_eq!(encode(&ty, decoded).unwrap().0, bytes);
    }

    #[test]
    fn test_unknown_variant_cannot_be_encoded() {
        let unknown = Value::Union(Some(Box::new(UnionValue {
            ordinal: 9,
            variant: Variant::Unknown(UnknownData { bytes: vec![0; 8], handle_count: 0 }),
        })));
        let ty = Type::Union { union: &SHAPE, nullable: false };
        assert_eq!(
            encode(&ty, unknown).unwrap_err(),
            Error::CannotEncodeUnknownVariant { ordinal: 9 }
        );

        let mut table = Table::new().with(1, Value::Bool(false));
        table.fields.push((5, Variant::Unknown(UnknownData::default())));
        assert_eq!(
            encode(&Type::Table(&OPTIONS), Value::Table(table)).unwrap_err(),
            Error::CannotEncodeUnknownVariant { ordinal: 5 }
        );
    }

    #[test]
    fn test_sticky_error_closes_handles() {
        let (good, good_peer) = item(1, "ok");
        let (bad, bad_peer) = item(2, "this label is fine");
        let mut encoder = Encoder::new();
        encoder.encode(&Type::Struct(&ITEM), good).unwrap();
        assert_eq!(encoder.handle_count(), 1);

        let err = encoder.encode(&Type::U32, bad).unwrap_err();
        assert_eq!(err, Error::TypeMismatch { expected: "uint32", actual: "struct" });
        assert_eq!(encoder.handle_count(), 0);
        assert!(peer_closed(&good_peer));
        assert!(peer_closed(&bad_peer));

        assert_eq!(encoder.encode(&Type::U32, Value::U32(1)), Err(err.clone()));
        assert_eq!(encoder.error(), Some(&err));
        assert_eq!(encoder.finish().unwrap_err(), err);
    }

    #[test]
    fn test_bounds_enforced() {
        let ty = Type::String { max_len: 2, nullable: false };
        assert_eq!(
            encode(&ty, Value::string("abc")).unwrap_err(),
            Error::StringTooLong { len: 3, max: 2 }
        );
        let nine = (0..9).map(|i| item(i, "x").0).collect();
        assert_eq!(
            encode(&ITEMS, Value::vector(nine)).unwrap_err(),
            Error::VectorTooLong { len: 9, max: 8 }
        );
        assert_eq!(
            encode(&Type::HANDLE, Value::Handle(None)).unwrap_err(),
            Error::NonNullableAbsent { kind: "handle" }
        );
    }

    #[test]
    fn test_message_too_large() {
        let big = "x".repeat(MAX_MESSAGE_SIZE);
        assert!(matches!(
            encode(&Type::STRING, Value::string(big)),
            Err(Error::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_set_txid_and_write() {
        let (client, server) = Channel::create().unwrap();
        let mut encoder = Encoder::message(0, 7);
        encoder.encode(&Type::U32, Value::U32(42)).unwrap();
        encoder.set_txid(0x8000_0001);
        encoder.write(&client).unwrap();

        let mut buf = blinc_fuchsia_zircon::MessageBuf::new();
        server.read(&mut buf).unwrap();
        let header = MessageHeader::decode(&buf.bytes).unwrap();
        assert_eq!(header.txid, 0x8000_0001);
        assert_eq!(header.ordinal, 7);
        assert_eq!(buf.bytes.len(), MessageHeader::SIZE + 8);
    }

    #[test]
    fn test_write_to_closed_peer_closes_handles() {
        let (client, server) = Channel::create().unwrap();
        drop(server);
        let (value, peer) = item(1, "gone");
        let mut encoder = Encoder::message(0, 1);
        encoder.encode(&Type::Struct(&ITEM), value).unwrap();
        assert_eq!(
            encoder.write(&client),
            Err(Error::PeerClosed(Status::ERR_PEER_CLOSED))
        );
        assert!(peer_closed(&peer));
    }

    #[test]
    fn test_release_handles() {
        let (value, peer) = item(1, "kept");
        let mut encoder = Encoder::new();
        encoder.encode(&Type::Struct(&ITEM), value).unwrap();
        encoder.release_handles();
        drop(encoder);
        // Released, not closed
        assert!(!peer_closed(&peer));
    }

    #[test]
    fn test_from_encoded() {
        let (a, _b) = EventPair::create().unwrap();
        let mut bytes = MessageHeader::new(0, 3).encode().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let mut adopted = Encoder::from_encoded(bytes.clone(), vec![a.into_handle()], true);
        adopted.set_txid(5);
        assert_eq!(adopted.handle_count(), 1);
        let (out, handles) = adopted.finish().unwrap();
        assert_eq!(MessageHeader::decode(&out).unwrap().txid, 5);
        assert_eq!(handles.len(), 1);

        bytes[7] = 0;
        let rejected = Encoder::from_encoded(bytes, vec![], true);
        assert!(matches!(rejected.error(), Some(Error::InvalidMagic { .. })));
    }

    #[test]
    fn test_set_txid_leaves_unpatchable_bytes_alone() {
        // Too short for a header: adopted in the error state
        let mut short = Encoder::from_encoded(vec![1, 2, 3, 4], vec![], true);
        assert!(matches!(short.error(), Some(Error::BufferUnderflow { .. })));
        short.set_txid(9);
        assert_eq!(short.bytes(), &[1, 2, 3, 4]);

        let mut body = Encoder::new();
        body.encode(&Type::U32, Value::U32(7)).unwrap();
        body.set_txid(9);
        assert_eq!(&body.bytes()[0..4], &7u32.to_le_bytes());
    }

    #[test]
    fn test_round_trip_box() {
        static WORD: StructType = StructType {
            name: "test/Word",
            size: 4,
            alignment: 4,
            fields: &[StructField { name: "value", offset: 0, ty: Type::U32 }],
        };
        let ty = Type::Box(&WORD);

        let (bytes, _) = encode(&ty, Value::boxed(vec![Value::U32(0xDEAD_BEEF)])).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..8], &ALLOC_PRESENT.to_le_bytes());
        assert_eq!(&bytes[8..12], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(&bytes[12..16], &[0; 4]);
        let decoded = decode(&bytes, vec![], &ty).unwrap();
        assert_eq!(decoded, Value::boxed(vec![Value::U32(0xDEAD_BEEF)]));
        let (again, _) = encode(&ty, decoded).unwrap();
        assert_eq!(again, bytes);

        let (bytes, _) = encode(&ty, Value::Box(None)).unwrap();
        assert_eq!(bytes, vec![0; 8]);
        let decoded = decode(&bytes, vec![], &ty).unwrap();
        assert_eq!(decoded, Value::Box(None));
        let (again, _) = encode(&ty, decoded).unwrap();
        assert_eq!(again, bytes);
    }
}
