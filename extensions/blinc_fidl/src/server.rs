//! Server bindings: serve a protocol implementation on a channel
//!
//! A binding owns its channel and keeps one readability wait armed on the
//! dispatcher. Each wakeup reads exactly one message and hands it to the
//! implementation together with a [`Completer`]. The next wait is armed
//! when dispatch returns, or earlier if the completer calls
//! [`Completer::enable_next_dispatch`].
//!
//! The binding keeps itself alive through the closure of its pending wait.
//! Callers only ever hold a [`ServerBindingRef`], which points at the
//! binding's controller cell and never extends the binding's lifetime.
//!
//! Teardown is requested by the first of: [`ServerBindingRef::unbind`],
//! [`ServerBindingRef::close`], peer closure, or an internal error. A
//! request made while a dispatch is running is carried out when the last
//! running dispatch returns. Teardown happens exactly once and reports
//! through the `on_unbound` callback.

use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use blinc_fuchsia_async::{Dispatcher, WaitPacket, WakeToken};
use blinc_fuchsia_zircon::{Channel, MessageBuf, Signals, Status};
use parking_lot::{Mutex, MutexGuard, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::completer::{Completer, Controller, ControllerCell};
use crate::message::{write_epitaph, IncomingMessage};
use crate::{Encoder, Error, Result};

/// A protocol implementation
///
/// `dispatch` runs on a dispatcher thread, once per incoming message.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, message: IncomingMessage, completer: Completer);
}

impl<F> Dispatch for F
where
    F: Fn(IncomingMessage, Completer) + Send + Sync + 'static,
{
    fn dispatch(&self, message: IncomingMessage, completer: Completer) {
        self(message, completer)
    }
}

/// Why a binding stopped serving
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnbindReason {
    /// [`ServerBindingRef::unbind`]; the channel is handed back
    Unbind,
    /// [`ServerBindingRef::close`] or [`Completer::close`]; the epitaph was sent
    Close(Status),
    /// The client closed its end
    PeerClosed,
    /// Transport failure, malformed message, dispatcher shutdown or a
    /// dropped completer
    InternalError(Error),
}

/// Passed to `on_unbound` once the binding has torn down
#[derive(Debug)]
pub struct UnbindInfo {
    pub reason: UnbindReason,
    /// The server end, for [`UnbindReason::Unbind`] only
    pub channel: Option<Channel>,
}

/// Called exactly once when a binding tears down
pub type OnUnbound = Box<dyn FnOnce(UnbindInfo) + Send>;

/// Serve `implementation` on `channel`
///
/// Fails if the dispatcher refuses the first wait; the channel is closed in
/// that case and `on_unbound` is not called.
pub fn bind<D: Dispatch>(
    dispatcher: &Dispatcher,
    channel: Channel,
    implementation: Arc<D>,
    on_unbound: Option<OnUnbound>,
) -> Result<ServerBindingRef> {
    let implementation: Arc<dyn Dispatch> = implementation;
    let binding = Arc::new_cyclic(|weak: &Weak<Binding>| {
        let controller: Weak<dyn Controller> = weak.clone();
        Binding {
            dispatcher: dispatcher.clone(),
            channel: RwLock::new(Some(channel)),
            implementation,
            cell: Arc::new(ControllerCell::new(controller)),
            on_unbound: Mutex::new(on_unbound),
            state: Mutex::new(BindingState::default()),
            weak_self: weak.clone(),
        }
    });

    {
        let mut state = binding.state.lock();
        binding.arm(&mut state)?;
    }
    debug!(loop_name = dispatcher.name(), "server bound");
    Ok(ServerBindingRef {
        cell: Arc::clone(&binding.cell),
    })
}

/// Control handle for a bound server
///
/// Cheap to clone. Holding one does not keep the binding alive.
#[derive(Clone, Debug)]
pub struct ServerBindingRef {
    cell: Arc<ControllerCell>,
}

impl ServerBindingRef {
    /// Stop serving; `on_unbound` receives the channel
    ///
    /// Non-blocking and idempotent. From inside a dispatch, takes effect
    /// when the dispatch returns.
    pub fn unbind(&self) {
        if let Some(controller) = self.cell.upgrade() {
            controller.unbind();
        }
    }

    /// Send `epitaph` and close the channel
    pub fn close(&self, epitaph: Status) {
        if let Some(controller) = self.cell.upgrade() {
            controller.close(epitaph);
        }
    }

    /// Send an event (txid 0) to the client
    pub fn send_event(&self, encoder: Encoder) -> Result<()> {
        let controller = self.cell.upgrade().ok_or(Error::Unbound)?;
        controller.send(encoder)
    }

    /// False once teardown has started
    pub fn is_bound(&self) -> bool {
        self.cell.upgrade().is_some()
    }
}

struct Teardown {
    reason: UnbindReason,
    epitaph: Option<Status>,
}

struct Dispatching {
    thread: ThreadId,
    seq: u64,
    resumed: bool,
}

#[derive(Default)]
struct BindingState {
    wait: Option<WakeToken>,
    dispatching: SmallVec<[Dispatching; 2]>,
    next_seq: u64,
    pending: Option<Teardown>,
    torn_down: bool,
}

impl BindingState {
    fn on_dispatch_thread(&self) -> bool {
        let current = thread::current().id();
        self.dispatching.iter().any(|d| d.thread == current)
    }
}

/// Lock order: `state`, then `channel`.
struct Binding {
    dispatcher: Dispatcher,
    channel: RwLock<Option<Channel>>,
    implementation: Arc<dyn Dispatch>,
    cell: Arc<ControllerCell>,
    on_unbound: Mutex<Option<OnUnbound>>,
    state: Mutex<BindingState>,
    weak_self: Weak<Binding>,
}

impl Binding {
    /// Arm the readability wait; the wait's closure owns a strong reference
    fn arm(&self, state: &mut BindingState) -> Result<()> {
        let binding = self.weak_self.upgrade().ok_or(Error::Unbound)?;
        let channel = self.channel.read();
        let channel = channel.as_ref().ok_or(Error::Unbound)?;
        let key = self.dispatcher.begin_wait(
            channel,
            Signals::CHANNEL_READABLE | Signals::CHANNEL_PEER_CLOSED,
            move |_, packet| binding.on_signal(packet),
        )?;
        state.wait = Some(key);
        Ok(())
    }

    fn on_signal(&self, packet: WaitPacket) {
        let seq = {
            let mut state = self.state.lock();
            state.wait = None;
            if state.torn_down {
                return;
            }
            if state.pending.is_some() {
                if state.dispatching.is_empty() {
                    self.finish_teardown(state);
                }
                return;
            }
            if !packet.is_ok() {
                state.pending = Some(Teardown {
                    reason: UnbindReason::InternalError(Error::from(packet.status)),
                    epitaph: None,
                });
                if state.dispatching.is_empty() {
                    self.finish_teardown(state);
                }
                return;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.dispatching.push(Dispatching {
                thread: thread::current().id(),
                seq,
                resumed: false,
            });
            seq
        };

        let mut buf = MessageBuf::new();
        let read = match self.channel.read().as_ref() {
            Some(channel) => channel.read(&mut buf),
            None => Err(Status::ERR_BAD_HANDLE),
        };
        match read {
            Ok(_) => match IncomingMessage::from_buf(buf) {
                Ok(message) => {
                    trace!(txid = message.txid(), ordinal = message.ordinal(), "dispatching");
                    let completer = Completer::new(
                        message.txid(),
                        message.ordinal(),
                        Arc::clone(&self.cell),
                        seq,
                    );
                    self.implementation.dispatch(message, completer);
                }
                Err(error) => {
                    warn!(%error, "malformed message header");
                    self.request_teardown(
                        UnbindReason::InternalError(error),
                        Some(Status::ERR_INVALID_ARGS),
                    );
                }
            },
            // Spurious wakeup
            Err(Status::ERR_SHOULD_WAIT) => {}
            Err(Status::ERR_PEER_CLOSED) => self.request_teardown(UnbindReason::PeerClosed, None),
            Err(status) => self.request_teardown(
                UnbindReason::InternalError(Error::Zircon(status)),
                None,
            ),
        }

        self.finish_dispatch(seq);
    }

    fn finish_dispatch(&self, seq: u64) {
        let mut state = self.state.lock();
        let Some(index) = state.dispatching.iter().position(|d| d.seq == seq) else {
            return;
        };
        let entry = state.dispatching.remove(index);
        if state.torn_down {
            return;
        }
        if state.pending.is_none() && !entry.resumed && state.wait.is_none() {
            if let Err(error) = self.arm(&mut state) {
                state.pending = Some(Teardown {
                    reason: UnbindReason::InternalError(error),
                    epitaph: None,
                });
            }
        }
        if state.pending.is_some() && state.dispatching.is_empty() {
            self.finish_teardown(state);
        }
    }

    /// Record a teardown reason; the first request wins
    fn request_teardown(&self, reason: UnbindReason, epitaph: Option<Status>) {
        let mut state = self.state.lock();
        if state.torn_down || state.pending.is_some() {
            return;
        }
        debug!(?reason, deferred = state.on_dispatch_thread(), "teardown requested");
        state.pending = Some(Teardown { reason, epitaph });

        if let Some(key) = state.wait.take() {
            if self.dispatcher.cancel_wait(key).is_err() {
                // Already fired: the queued handler completes the teardown
                return;
            }
        }
        if state.dispatching.is_empty() {
            self.finish_teardown(state);
        }
    }

    fn finish_teardown(&self, mut state: MutexGuard<'_, BindingState>) {
        let Some(Teardown { reason, epitaph }) = state.pending.take() else {
            return;
        };
        state.torn_down = true;
        drop(state);

        self.cell.invalidate();
        let channel = self.channel.write().take();
        let channel = match reason {
            UnbindReason::Unbind => channel,
            _ => {
                if let (Some(channel), Some(status)) = (&channel, epitaph) {
                    if let Err(error) = write_epitaph(channel, status) {
                        debug!(%error, "epitaph not delivered");
                    }
                }
                None
            }
        };
        debug!(?reason, "server unbound");

        let on_unbound = self.on_unbound.lock().take();
        if let Some(on_unbound) = on_unbound {
            on_unbound(UnbindInfo { reason, channel });
        }
    }
}

impl Controller for Binding {
    fn send(&self, encoder: Encoder) -> Result<()> {
        let result = match self.channel.read().as_ref() {
            Some(channel) => encoder.write(channel),
            None => Err(Error::Unbound),
        };
        match &result {
            Err(error) if error.is_closed() => {
                self.request_teardown(UnbindReason::PeerClosed, None)
            }
            Err(Error::Zircon(status)) => self.request_teardown(
                UnbindReason::InternalError(Error::Zircon(*status)),
                None,
            ),
            _ => {}
        }
        result
    }

    fn unbind(&self) {
        self.request_teardown(UnbindReason::Unbind, None);
    }

    fn close(&self, epitaph: Status) {
        self.request_teardown(UnbindReason::Close(epitaph), Some(epitaph));
    }

    fn internal_error(&self, error: Error, epitaph: Option<Status>) {
        self.request_teardown(UnbindReason::InternalError(error), epitaph);
    }

    fn resume(&self, seq: u64) {
        let mut state = self.state.lock();
        if state.torn_down || state.pending.is_some() {
            return;
        }
        let Some(entry) = state.dispatching.iter_mut().find(|d| d.seq == seq) else {
            return;
        };
        if entry.resumed {
            return;
        }
        entry.resumed = true;
        if state.wait.is_none() {
            if let Err(error) = self.arm(&mut state) {
                warn!(%error, "failed to re-arm after enable_next_dispatch");
                state.pending = Some(Teardown {
                    reason: UnbindReason::InternalError(error),
                    epitaph: None,
                });
            }
        }
    }
}
