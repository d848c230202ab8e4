//! Zircon handle rights

use bitflags::bitflags;

bitflags! {
    /// Rights carried by a handle
    ///
    /// Rights belong to the handle, not the object: two handles to the same
    /// channel may carry different rights. Duplication and replacement can
    /// only keep or drop rights.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        const NONE = 0;
        const DUPLICATE = 1 << 0;
        const TRANSFER = 1 << 1;
        const READ = 1 << 2;
        const WRITE = 1 << 3;
        const EXECUTE = 1 << 4;
        const MAP = 1 << 5;
        const GET_PROPERTY = 1 << 6;
        const SET_PROPERTY = 1 << 7;
        const SIGNAL = 1 << 12;
        const SIGNAL_PEER = 1 << 13;
        const WAIT = 1 << 14;
        const INSPECT = 1 << 15;

        /// Request the rights of the source handle unchanged
        const SAME_RIGHTS = 1 << 31;

        const BASIC = Self::TRANSFER.bits() | Self::DUPLICATE.bits() |
                      Self::WAIT.bits() | Self::INSPECT.bits();

        const IO = Self::READ.bits() | Self::WRITE.bits();

        /// Channels cannot be duplicated
        const CHANNEL_DEFAULT = Self::TRANSFER.bits() | Self::READ.bits() |
                                Self::WRITE.bits() | Self::SIGNAL.bits() |
                                Self::SIGNAL_PEER.bits() | Self::WAIT.bits() |
                                Self::INSPECT.bits();

        const EVENTPAIR_DEFAULT = Self::TRANSFER.bits() | Self::DUPLICATE.bits() |
                                  Self::READ.bits() | Self::WRITE.bits() |
                                  Self::SIGNAL.bits() | Self::SIGNAL_PEER.bits() |
                                  Self::WAIT.bits() | Self::INSPECT.bits();
    }
}

impl Rights {
    /// Whether a handle with these rights may be written into a channel
    pub fn is_transferable(&self) -> bool {
        self.contains(Rights::TRANSFER)
    }
}
