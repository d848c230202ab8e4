//! Wait keys and the packets delivered when a wait completes

use std::sync::atomic::{AtomicU64, Ordering};

use blinc_fuchsia_zircon::{Signals, Status};

/// Token identifying one pending async wait
///
/// The raw value doubles as the kernel observer key passed to
/// `wait_async`, so a token is unique for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WakeToken(u64);

impl WakeToken {
    /// Create a new unique wake token
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw token value
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Create from raw value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl Default for WakeToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion of an async wait (the dispatcher's `zx_port_packet_t`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPacket {
    /// Token returned by `begin_wait`
    pub key: WakeToken,
    /// `OK` when signals fired, `ERR_CANCELED` when the handle closed or the
    /// dispatcher shut down first
    pub status: Status,
    /// Signals asserted when the wait fired
    pub observed: Signals,
}

impl WaitPacket {
    /// Packet for a wait that fired normally
    pub fn signaled(key: WakeToken, observed: Signals) -> Self {
        Self {
            key,
            status: Status::OK,
            observed,
        }
    }

    /// Packet for a wait that will never fire
    pub fn canceled(key: WakeToken) -> Self {
        Self {
            key,
            status: Status::ERR_CANCELED,
            observed: Signals::NONE,
        }
    }

    /// Whether the wait completed because the signals fired
    pub fn is_ok(&self) -> bool {
        self.status == Status::OK
    }
}
