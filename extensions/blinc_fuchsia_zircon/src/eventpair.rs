//! Zircon event pairs for signaling

use crate::{sys, AsHandleRef, Handle, HandleBased, HandleRef, Signals};

/// An event pair - two linked event objects
///
/// Signals set through one endpoint can be observed on the peer, and closing
/// one endpoint asserts `EVENTPAIR_PEER_CLOSED` on the other. Cheap to create,
/// which makes them the usual payload when exercising handle transfer.
#[derive(Debug)]
#[repr(transparent)]
pub struct EventPair(Handle);

impl EventPair {
    /// Create a new event pair
    pub fn create() -> crate::Result<(EventPair, EventPair)> {
        let (h0, h1) = sys::eventpair_create()?;
        Ok((EventPair(h0), EventPair(h1)))
    }

    /// Clear and set user signals on the peer endpoint
    pub fn signal_peer(&self, clear: Signals, set: Signals) -> crate::Result<()> {
        sys::object_signal(self.0.raw_handle(), clear, set, true)
    }
}

impl AsHandleRef for EventPair {
    fn as_handle_ref(&self) -> HandleRef<'_> {
        self.0.as_handle_ref()
    }
}

impl From<Handle> for EventPair {
    fn from(handle: Handle) -> Self {
        EventPair(handle)
    }
}

impl From<EventPair> for Handle {
    fn from(ep: EventPair) -> Self {
        ep.0
    }
}

impl HandleBased for EventPair {}
