//! Blinc Fuchsia Zircon - Kernel Object Model
//!
//! Handles, channels, event pairs, signals and deadlines with the same
//! semantics the Zircon kernel gives them. Everything above this crate
//! (FIDL encoding, bindings, the async loop) only talks to the kernel through
//! these types.
//!
//! # Handles
//!
//! A [`Handle`] is an owned capability. Dropping it closes it. Handles move
//! between processes by being written into a [`Channel`] together with message
//! bytes; the writer loses ownership whether or not the write succeeds.
//!
//! # Host Emulation
//!
//! Off Fuchsia, kernel objects live in an in-process table (`sys`). Channels
//! queue messages in memory, signals wake blocked waiters and async observers,
//! and closing the last handle to an endpoint raises `PEER_CLOSED` on its peer.
//! Handle counts are tracked per object so tests can check for leaks.
//!
//! # Example
//!
//! ```ignore
//! use blinc_fuchsia_zircon::{Channel, MessageBuf};
//!
//! let (a, b) = Channel::create()?;
//! a.write(b"hello", &mut [])?;
//! let mut buf = MessageBuf::new();
//! b.read(&mut buf)?;
//! assert_eq!(buf.bytes, b"hello");
//! ```

mod channel;
mod eventpair;
mod handle;
mod rights;
mod signals;
mod status;
mod sys;
mod time;

pub use channel::{Channel, ChannelReadResult, MessageBuf};
pub use eventpair::EventPair;
pub use handle::{
    AsHandleRef, Handle, HandleBasicInfo, HandleBased, HandleRef, Koid, ObjectType, WaitCallback,
};
pub use rights::Rights;
pub use signals::Signals;
pub use status::Status;
pub use time::{Duration, Instant, Time};

/// Raw handle value as seen by the kernel
pub type RawHandle = u32;

/// The invalid handle value
pub const HANDLE_INVALID: RawHandle = 0;

/// Maximum number of bytes in a single channel message
pub const CHANNEL_MAX_MSG_BYTES: usize = 65536;

/// Maximum number of handles in a single channel message
pub const CHANNEL_MAX_MSG_HANDLES: usize = 64;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, Status>;

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        AsHandleRef, Channel, Duration, EventPair, Handle, HandleBased, MessageBuf, Rights,
        Signals, Status, Time,
    };
}
