//! Blinc FIDL - Wire Format and Bindings
//!
//! This crate implements the FIDL (Fuchsia Interface Definition Language) wire
//! format and the bindings that move messages over Zircon channels: a
//! validating decoder, an encoder, server bindings with one-shot completers,
//! and asynchronous and blocking client proxies.
//!
//! # Wire Format
//!
//! FIDL uses a binary wire format with:
//! - Little-endian byte order
//! - 8-byte alignment for all out-of-line data
//! - Handles passed out-of-band (separate from bytes)
//!
//! # Message Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Message Header (16 bytes)              │
//! │  ┌─────────┬─────────────┬──────────┬─────┬───────────┐  │
//! │  │ txid(4) │ at_rest(2)  │ dyn(1)   │magic│ ordinal(8)│  │
//! │  └─────────┴─────────────┴──────────┴─────┴───────────┘  │
//! ├──────────────────────────────────────────────────────────┤
//! │                    Message Body                           │
//! │  (primary object, then out-of-line objects depth-first)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Types and Values
//!
//! Message layouts are described by static [`Type`] tables, the way
//! generated bindings would emit them. Encoding consumes a [`Value`] tree
//! and decoding produces one; handles live inside the tree, so dropping a
//! value closes them.
//!
//! # Example
//!
//! ```ignore
//! use blinc_fidl::{decode_message, Encoder, Type, Value};
//!
//! // Encode a request
//! let mut encoder = Encoder::message(0x8000_0001, 7);
//! encoder.encode(&Type::STRING, Value::string("hello"))?;
//! let (bytes, handles) = encoder.finish()?;
//!
//! // Send over channel...
//!
//! // Decode it on the other side
//! let (header, value) = decode_message(&bytes, handles, &Type::STRING)?;
//! assert_eq!(value.as_str(), Some("hello"));
//! ```

mod client;
mod coding;
mod completer;
mod decoding;
mod encoding;
mod error;
mod handle;
mod header;
mod message;
mod server;
mod value;
mod wire;

pub use client::{Client, EventHandler, SyncClient};
pub use coding::{
    StructField, StructType, TableField, TableType, Type, UnionMember, UnionType, MAX_BOUND,
};
pub use completer::Completer;
pub use decoding::{decode, decode_message, Decoder};
pub use encoding::{encode, Encoder};
pub use error::{Error, Result};
pub use handle::{HandleDisposition, ObjectType, HANDLE_ABSENT, HANDLE_PRESENT};
pub use header::{DynamicFlags, MessageFlags, MessageHeader, Ordinal, TransactionId};
pub use message::{encode_epitaph, write_epitaph, IncomingMessage};
pub use server::{bind, Dispatch, OnUnbound, ServerBindingRef, UnbindInfo, UnbindReason};
pub use value::{Table, UnionValue, UnknownData, Value, Variant};
pub use wire::{
    align8, ALLOC_ABSENT, ALLOC_PRESENT, ENVELOPE_SIZE, TABLE_SIZE, UNION_SIZE,
    VECTOR_HEADER_SIZE,
};

/// FIDL wire format magic number
pub const FIDL_MAGIC: u8 = 1;

/// Maximum message size (64KB, header included)
pub const MAX_MESSAGE_SIZE: usize = blinc_fuchsia_zircon::CHANNEL_MAX_MSG_BYTES;

/// Maximum number of handles per message
pub const MAX_HANDLES: usize = blinc_fuchsia_zircon::CHANNEL_MAX_MSG_HANDLES;

/// Maximum out-of-line nesting depth
pub const MAX_RECURSION_DEPTH: usize = 32;

/// FIDL epitaph ordinal (indicates channel closure)
pub const EPITAPH_ORDINAL: u64 = 0xFFFFFFFFFFFFFFFF;

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        bind, Client, Completer, Dispatch, Encoder, Error, EventHandler, IncomingMessage,
        MessageHeader, Ordinal, Result, ServerBindingRef, SyncClient, TransactionId, Type,
        UnbindInfo, UnbindReason, Value, FIDL_MAGIC, MAX_HANDLES, MAX_MESSAGE_SIZE,
    };
}
