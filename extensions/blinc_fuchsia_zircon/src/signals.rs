//! Object signals

use bitflags::bitflags;

bitflags! {
    /// Signals asserted on a kernel object
    ///
    /// Waiters (blocking or async) observe these; the values match
    /// `ZX_CHANNEL_*` / `ZX_EVENTPAIR_*` / `ZX_USER_SIGNAL_*`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        const NONE = 0;
        const CHANNEL_READABLE = 1 << 0;
        const CHANNEL_WRITABLE = 1 << 1;
        const CHANNEL_PEER_CLOSED = 1 << 2;
        const EVENTPAIR_PEER_CLOSED = 1 << 2;
        const EVENTPAIR_SIGNALED = 1 << 4;
        const USER_0 = 1 << 24;
        const USER_1 = 1 << 25;
        const USER_2 = 1 << 26;
        const USER_3 = 1 << 27;
        const USER_ALL = Self::USER_0.bits() | Self::USER_1.bits() |
                         Self::USER_2.bits() | Self::USER_3.bits();
    }
}
