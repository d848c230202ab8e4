//! Reply path from a dispatched request back to its binding

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use blinc_fuchsia_zircon::Status;
use tracing::{error, trace};

use crate::coding::Type;
use crate::value::Value;
use crate::{Encoder, Error, Ordinal, Result, TransactionId};

/// What a completer or binding reference may ask of a live binding
pub(crate) trait Controller: Send + Sync {
    /// Write an encoded message on the binding's channel
    fn send(&self, encoder: Encoder) -> Result<()>;

    /// Stop serving and hand the channel back
    fn unbind(&self);

    /// Send `epitaph` and close the channel
    fn close(&self, epitaph: Status);

    /// Tear down after a local failure, optionally sending an epitaph
    fn internal_error(&self, error: Error, epitaph: Option<Status>);

    /// Allow the next message to dispatch before dispatch `seq` returns
    fn resume(&self, seq: u64);
}

/// Shared handle to a binding that does not keep it alive
///
/// Invalidated exactly once when the binding tears down; after that every
/// upgrade fails even while the binding object still exists.
pub(crate) struct ControllerCell {
    controller: Weak<dyn Controller>,
    valid: AtomicBool,
}

impl ControllerCell {
    pub(crate) fn new(controller: Weak<dyn Controller>) -> Self {
        Self {
            controller,
            valid: AtomicBool::new(true),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<dyn Controller>> {
        if !self.is_valid() {
            return None;
        }
        self.controller.upgrade()
    }

    /// Returns true for the call that performed the invalidation
    pub(crate) fn invalidate(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ControllerCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerCell")
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// One-shot responder for a dispatched message
///
/// Carries the request's txid and ordinal. [`reply`](Self::reply) and
/// [`close`](Self::close) consume the completer, so a request can be
/// answered at most once. The completer may be moved to another thread and
/// used after dispatch returns.
///
/// Dropping the completer of a two-way request without replying is a
/// server bug: the binding is closed with `ERR_INTERNAL`.
#[derive(Debug)]
pub struct Completer {
    txid: TransactionId,
    ordinal: Ordinal,
    cell: Arc<ControllerCell>,
    dispatch_seq: u64,
    done: bool,
}

impl Completer {
    pub(crate) fn new(
        txid: TransactionId,
        ordinal: Ordinal,
        cell: Arc<ControllerCell>,
        dispatch_seq: u64,
    ) -> Self {
        Self {
            txid,
            ordinal,
            cell,
            dispatch_seq,
            done: false,
        }
    }

    pub fn txid(&self) -> TransactionId {
        self.txid
    }

    pub fn ordinal(&self) -> Ordinal {
        self.ordinal
    }

    /// Whether the client is waiting for a reply
    pub fn needs_response(&self) -> bool {
        self.txid != 0
    }

    /// Encode `value` as the response and send it
    ///
    /// Returns [`Error::Unbound`] if the binding has already gone away. An
    /// encoding failure tears the binding down and is returned as well.
    pub fn reply(mut self, ty: &Type, value: Value) -> Result<()> {
        self.done = true;
        if !self.needs_response() {
            return Err(Error::Zircon(Status::ERR_BAD_STATE));
        }
        let controller = self.cell.upgrade().ok_or(Error::Unbound)?;

        let mut encoder = Encoder::message(self.txid, self.ordinal);
        if let Err(err) = encoder.encode(ty, value) {
            error!(txid = self.txid, ordinal = self.ordinal, error = %err, "failed to encode reply");
            controller.internal_error(err.clone(), None);
            return Err(err);
        }
        trace!(txid = self.txid, ordinal = self.ordinal, "sending reply");
        controller.send(encoder)
    }

    /// Close the binding, sending `epitaph` to the client
    pub fn close(mut self, epitaph: Status) {
        self.done = true;
        if let Some(controller) = self.cell.upgrade() {
            controller.close(epitaph);
        }
    }

    /// Let the binding dispatch its next message while this one is still
    /// being handled
    pub fn enable_next_dispatch(&self) {
        if let Some(controller) = self.cell.upgrade() {
            controller.resume(self.dispatch_seq);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.done || !self.needs_response() {
            return;
        }
        let Some(controller) = self.cell.upgrade() else {
            return;
        };
        error!(
            txid = self.txid,
            ordinal = self.ordinal,
            "completer dropped without a reply"
        );
        controller.internal_error(
            Error::UnrepliedTransaction { txid: self.txid },
            Some(Status::ERR_INTERNAL),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Vec<u8>>>,
        events: Mutex<Vec<String>>,
    }

    impl Controller for Recorder {
        fn send(&self, encoder: Encoder) -> Result<()> {
            let (bytes, _) = encoder.finish()?;
            self.sent.lock().push(bytes);
            Ok(())
        }

        fn unbind(&self) {
            self.events.lock().push("unbind".into());
        }

        fn close(&self, epitaph: Status) {
            self.events.lock().push(format!("close {}", epitaph.into_raw()));
        }

        fn internal_error(&self, error: Error, epitaph: Option<Status>) {
            self.events.lock().push(format!("{error} {epitaph:?}"));
        }

        fn resume(&self, seq: u64) {
            self.events.lock().push(format!("resume {seq}"));
        }
    }

    fn cell_for(recorder: &Arc<Recorder>) -> Arc<ControllerCell> {
        let controller: Arc<dyn Controller> = recorder.clone();
        Arc::new(ControllerCell::new(Arc::downgrade(&controller)))
    }

    #[test]
    fn test_reply_sends_once() {
        let recorder = Arc::new(Recorder::default());
        let completer = Completer::new(0x8000_0001, 7, cell_for(&recorder), 0);
        assert!(completer.needs_response());
        completer.reply(&Type::U32, Value::U32(5)).unwrap();

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        let header = crate::MessageHeader::decode(&sent[0]).unwrap();
        assert_eq!((header.txid, header.ordinal), (0x8000_0001, 7));
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_reply_after_invalidate() {
        let recorder = Arc::new(Recorder::default());
        let cell = cell_for(&recorder);
        let completer = Completer::new(1, 7, cell.clone(), 0);
        assert!(cell.invalidate());
        assert!(!cell.invalidate());
        assert_eq!(completer.reply(&Type::U32, Value::U32(5)), Err(Error::Unbound));
        assert!(recorder.sent.lock().is_empty());
    }

    #[test]
    fn test_one_way_reply_rejected() {
        let recorder = Arc::new(Recorder::default());
        let completer = Completer::new(0, 7, cell_for(&recorder), 0);
        assert!(!completer.needs_response());
        assert_eq!(
            completer.reply(&Type::U32, Value::U32(5)),
            Err(Error::Zircon(Status::ERR_BAD_STATE))
        );
    }

    #[test]
    fn test_drop_without_reply_closes() {
        let recorder = Arc::new(Recorder::default());
        drop(Completer::new(9, 7, cell_for(&recorder), 0));
        assert_eq!(
            recorder.events.lock().clone(),
            vec![format!(
                "{} {:?}",
                Error::UnrepliedTransaction { txid: 9 },
                Some(Status::ERR_INTERNAL)
            )]
        );

        // One-way requests need no reply
        drop(Completer::new(0, 7, cell_for(&recorder), 0));
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[test]
    fn test_encode_failure_tears_down() {
        let recorder = Arc::new(Recorder::default());
        let completer = Completer::new(3, 7, cell_for(&recorder), 2);
        completer.enable_next_dispatch();
        let err = completer.reply(&Type::U32, Value::Bool(true)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let events = recorder.events.lock();
        assert_eq!(events[0], "resume 2");
        assert!(events[1].ends_with("None"));
        assert!(recorder.sent.lock().is_empty());
    }

    #[test]
    fn test_dead_controller() {
        let recorder = Arc::new(Recorder::default());
        let cell = cell_for(&recorder);
        drop(recorder);
        assert!(cell.is_valid());
        assert!(cell.upgrade().is_none());
        // Nothing to close; must not panic
        drop(Completer::new(4, 7, cell, 0));
    }
}
