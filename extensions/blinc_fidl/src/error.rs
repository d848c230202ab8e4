//! FIDL error types

use blinc_fuchsia_zircon::{ObjectType, Rights, Status};
use thiserror::Error;

use crate::TransactionId;

/// FIDL encoding, decoding and binding errors
///
/// Decode errors carry the byte offset (relative to the start of the body)
/// where validation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Malformed message
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("too many handles: {count} (max {max})")]
    TooManyHandles { count: usize, max: usize },

    #[error("invalid magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: u8, actual: u8 },

    #[error("buffer underflow: needed {needed} bytes, {available} available")]
    BufferUnderflow { needed: usize, available: usize },

    #[error("unknown method ordinal {ordinal:#x}")]
    UnknownOrdinal { ordinal: u64 },

    // Decode validation
    #[error("invalid presence indicator at offset {offset}")]
    InvalidPresenceIndicator { offset: usize },

    #[error("out-of-line object at offset {offset} exceeds the buffer")]
    OutOfRange { offset: usize },

    #[error("non-zero padding at offset {offset}")]
    NonZeroPadding { offset: usize },

    #[error("message claims more handles than were supplied")]
    MissingHandles,

    #[error("invalid handle in handle array")]
    InvalidHandle,

    #[error("invalid handle presence indicator at offset {offset}")]
    InvalidHandlePresenceIndicator { offset: usize },

    #[error("incorrect handle type: expected {expected:?}, got {actual:?}")]
    IncorrectHandleType { expected: ObjectType, actual: ObjectType },

    #[error("handle is missing rights: required {required:?}, has {actual:?}")]
    MissingRights { required: Rights, actual: Rights },

    #[error("envelope declared {declared} bytes but its content used {consumed}")]
    EnvelopeBytesMismatch { declared: usize, consumed: usize },

    #[error("envelope declared {declared} handles but its content used {consumed}")]
    EnvelopeHandlesMismatch { declared: usize, consumed: usize },

    #[error("invalid envelope at offset {offset}")]
    InvalidEnvelope { offset: usize },

    #[error("{count} trailing bytes not consumed by decoding")]
    ExtraBytes { count: usize },

    #[error("{count} trailing handles not consumed by decoding")]
    ExtraHandles { count: usize },

    #[error("maximum out-of-line depth exceeded")]
    MaxDepthExceeded,

    #[error("absent value for a non-nullable {kind}")]
    NonNullableAbsent { kind: &'static str },

    #[error("invalid boolean value: {value}")]
    InvalidBool { value: u8 },

    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    #[error("vector of {len} elements exceeds bound {max}")]
    VectorTooLong { len: u64, max: u32 },

    #[error("string of {len} bytes exceeds bound {max}")]
    StringTooLong { len: u64, max: u32 },

    #[error("unknown ordinal {ordinal} for strict union")]
    UnknownUnionOrdinal { ordinal: u64 },

    #[error("invalid union ordinal {ordinal}")]
    InvalidUnionOrdinal { ordinal: u64 },

    // Encode state
    #[error("cannot encode unknown variant (ordinal {ordinal})")]
    CannotEncodeUnknownVariant { ordinal: u64 },

    #[error("type mismatch: descriptor expects {expected}, value is {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("array length mismatch: expected {expected}, got {actual}")]
    ArrayLengthMismatch { expected: u32, actual: usize },

    // Bindings
    #[error("transport error: {0}")]
    Zircon(Status),

    #[error("peer closed the channel with epitaph {0}")]
    PeerClosed(Status),

    #[error("binding was unbound")]
    Unbound,

    #[error("deadline expired")]
    Timeout,

    #[error("reply with unknown transaction id {txid:#x}")]
    UnknownTxid { txid: TransactionId },

    #[error("two-way call {txid:#x} dropped without a reply")]
    UnrepliedTransaction { txid: TransactionId },
}

impl Error {
    /// Whether this error ends a channel (transport failure or peer gone)
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::PeerClosed(_) | Error::Zircon(Status::ERR_PEER_CLOSED))
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status {
            Status::ERR_PEER_CLOSED => Error::PeerClosed(Status::ERR_PEER_CLOSED),
            Status::ERR_TIMED_OUT => Error::Timeout,
            status => Error::Zircon(status),
        }
    }
}

/// Result type for FIDL operations
pub type Result<T> = std::result::Result<T, Error>;
