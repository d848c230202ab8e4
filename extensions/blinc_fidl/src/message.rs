//! Inbound transactional messages and epitaphs

use blinc_fuchsia_zircon::{Channel, Handle, MessageBuf, Status};

use crate::coding::Type;
use crate::decoding::Decoder;
use crate::value::Value;
use crate::{wire, Encoder, Error, MessageHeader, Ordinal, Result, TransactionId};

/// Epitaph body: `i32` status followed by 4 bytes of padding
const EPITAPH_BODY_SIZE: usize = 8;

/// A message read off a channel whose header has been validated
///
/// The body is decoded lazily against whatever type the ordinal selects.
/// Dropping an undecoded message closes its handles.
#[derive(Debug)]
pub struct IncomingMessage {
    header: MessageHeader,
    bytes: Vec<u8>,
    handles: Vec<Handle>,
}

impl IncomingMessage {
    /// Take a read buffer, validating the header
    ///
    /// On failure the buffer's handles are closed.
    pub fn from_buf(buf: MessageBuf) -> Result<Self> {
        let (bytes, handles) = buf.split();
        Self::from_parts(bytes, handles)
    }

    /// Build from raw bytes and handles, validating the header
    pub fn from_parts(bytes: Vec<u8>, handles: Vec<Handle>) -> Result<Self> {
        let header = MessageHeader::decode(&bytes)?;
        Ok(Self {
            header,
            bytes,
            handles,
        })
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn txid(&self) -> TransactionId {
        self.header.txid
    }

    pub fn ordinal(&self) -> Ordinal {
        self.header.ordinal
    }

    pub fn is_epitaph(&self) -> bool {
        self.header.is_epitaph()
    }

    /// Bytes after the header
    pub fn body(&self) -> &[u8] {
        &self.bytes[MessageHeader::SIZE..]
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Decode the body as `ty`, consuming the message
    pub fn decode(self, ty: &Type) -> Result<Value> {
        Decoder::new(&self.bytes[MessageHeader::SIZE..], self.handles)?.decode_body(ty)
    }

    /// Status carried by an epitaph message
    pub fn decode_epitaph(self) -> Result<Status> {
        if !self.is_epitaph() {
            return Err(Error::UnknownOrdinal {
                ordinal: self.header.ordinal,
            });
        }
        let body = self.body();
        if body.len() != EPITAPH_BODY_SIZE {
            return Err(if body.len() < EPITAPH_BODY_SIZE {
                Error::BufferUnderflow {
                    needed: EPITAPH_BODY_SIZE,
                    available: body.len(),
                }
            } else {
                Error::ExtraBytes {
                    count: body.len() - EPITAPH_BODY_SIZE,
                }
            });
        }
        if body[4..].iter().any(|b| *b != 0) {
            return Err(Error::NonZeroPadding {
                offset: MessageHeader::SIZE + 4,
            });
        }
        if !self.handles.is_empty() {
            return Err(Error::ExtraHandles {
                count: self.handles.len(),
            });
        }
        Ok(Status::from_raw(wire::read_u32(body, 0) as i32))
    }

    pub fn into_parts(self) -> (MessageHeader, Vec<u8>, Vec<Handle>) {
        (self.header, self.bytes, self.handles)
    }
}

/// Encode an epitaph carrying `status`
pub fn encode_epitaph(status: Status) -> Encoder {
    let mut encoder = Encoder::with_header(MessageHeader::new_epitaph());
    // An i32 always fits; the error stays in the encoder otherwise
    let _ = encoder.encode(&Type::I32, Value::I32(status.into_raw()));
    encoder
}

/// Write an epitaph as the last message on `channel`
pub fn write_epitaph(channel: &Channel, status: Status) -> Result<()> {
    encode_epitaph(status).write(channel)
}
