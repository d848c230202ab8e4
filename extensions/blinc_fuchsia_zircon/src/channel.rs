//! Zircon channels for IPC (FIDL communication)

use crate::{sys, AsHandleRef, Handle, HandleBased, HandleRef, Signals, Status, Time};

/// A Zircon channel endpoint
///
/// Channels are bidirectional, message-oriented IPC primitives.
/// They are the foundation of FIDL communication.
#[derive(Debug)]
#[repr(transparent)]
pub struct Channel(Handle);

impl Channel {
    /// Create a new channel pair
    pub fn create() -> crate::Result<(Channel, Channel)> {
        let (h0, h1) = sys::channel_create()?;
        Ok((Channel(h0), Channel(h1)))
    }

    /// Write a message to the channel
    ///
    /// Every handle in `handles` is consumed: on success it travels with the
    /// message, on failure it is closed. The slice is left holding invalid
    /// handles either way.
    pub fn write(&self, bytes: &[u8], handles: &mut [Handle]) -> crate::Result<()> {
        if self.is_invalid() {
            handles.iter_mut().for_each(|h| drop(h.take()));
            return Err(Status::ERR_BAD_HANDLE);
        }
        sys::channel_write(self.0.raw_handle(), bytes, handles)
    }

    /// Read a message from the channel
    ///
    /// Returns `ERR_SHOULD_WAIT` if no message is queued and
    /// `ERR_PEER_CLOSED` once the queue is empty and the peer is gone.
    pub fn read(&self, buf: &mut MessageBuf) -> crate::Result<ChannelReadResult> {
        if self.is_invalid() {
            return Err(Status::ERR_BAD_HANDLE);
        }
        sys::channel_read(self.0.raw_handle(), buf)
    }

    /// Read a message, returning Ok(None) if the channel is empty
    pub fn read_opt(&self, buf: &mut MessageBuf) -> crate::Result<Option<ChannelReadResult>> {
        match self.read(buf) {
            Ok(result) => Ok(Some(result)),
            Err(Status::ERR_SHOULD_WAIT) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a request and block until the reply with the same txid arrives
    ///
    /// The first four bytes of `bytes` are the transaction id and must be
    /// non-zero. Other messages arriving meanwhile stay queued for regular
    /// readers.
    pub fn call(
        &self,
        deadline: Time,
        bytes: &[u8],
        handles: &mut [Handle],
        buf: &mut MessageBuf,
    ) -> crate::Result<ChannelReadResult> {
        if self.is_invalid() {
            handles.iter_mut().for_each(|h| drop(h.take()));
            return Err(Status::ERR_BAD_HANDLE);
        }
        sys::channel_call(self.0.raw_handle(), deadline, bytes, handles, buf)
    }

    /// Check if the peer endpoint has been closed
    pub fn is_peer_closed(&self) -> bool {
        matches!(
            self.wait_one(Signals::CHANNEL_PEER_CLOSED, Time::INFINITE_PAST),
            Ok(signals) if signals.contains(Signals::CHANNEL_PEER_CLOSED)
        )
    }
}

impl AsHandleRef for Channel {
    fn as_handle_ref(&self) -> HandleRef<'_> {
        self.0.as_handle_ref()
    }
}

impl From<Handle> for Channel {
    fn from(handle: Handle) -> Self {
        Channel(handle)
    }
}

impl From<Channel> for Handle {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

impl HandleBased for Channel {}

/// Result of a channel read operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelReadResult {
    /// Number of bytes read
    pub bytes: usize,
    /// Number of handles read
    pub handles: usize,
}

/// Buffer for channel messages
#[derive(Debug, Default)]
pub struct MessageBuf {
    /// Message bytes
    pub bytes: Vec<u8>,
    /// Handles transferred with the message
    pub handles: Vec<Handle>,
}

impl MessageBuf {
    /// Create a new empty message buffer
    pub fn new() -> Self {
        MessageBuf {
            bytes: Vec::new(),
            handles: Vec::new(),
        }
    }

    /// Create a message buffer with pre-allocated capacity
    pub fn with_capacity(bytes: usize, handles: usize) -> Self {
        MessageBuf {
            bytes: Vec::with_capacity(bytes),
            handles: Vec::with_capacity(handles),
        }
    }

    /// Clear the buffer for reuse
    ///
    /// Any handles still held are closed.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.handles.clear();
    }

    /// Split into bytes and handles
    pub fn split(self) -> (Vec<u8>, Vec<Handle>) {
        (self.bytes, self.handles)
    }
}
