//! Client proxies
//!
//! [`Client`] is the asynchronous proxy: requests are written immediately,
//! replies are read on a dispatcher and routed to per-call callbacks by
//! txid. [`SyncClient`] blocks the calling thread on the transport's
//! matched-reply call instead and needs no dispatcher.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use blinc_fuchsia_async::{Dispatcher, WaitPacket, WakeToken};
use blinc_fuchsia_zircon::{AsHandleRef, Channel, MessageBuf, Signals, Status, Time};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::coding::Type;
use crate::message::IncomingMessage;
use crate::value::Value;
use crate::{Encoder, Error, Ordinal, Result, TransactionId};

/// Bit set on every txid a client allocates
const TXID_HIGH_BIT: u32 = 0x8000_0000;

/// Map a counter value onto the txid space, skipping the reserved 0
fn txid_from_counter(counter: u32) -> Option<TransactionId> {
    let low = counter & !TXID_HIGH_BIT;
    (low != 0).then_some(low | TXID_HIGH_BIT)
}

/// Receives what arrives on a client channel outside of replies
pub trait EventHandler: Send + Sync + 'static {
    /// A message with txid 0
    fn on_event(&self, message: IncomingMessage) {
        debug!(ordinal = message.ordinal(), "unhandled event");
    }

    /// The client tore down; called at most once per binding
    fn on_error(&self, error: Error) {
        debug!(%error, "client error");
    }
}

/// Handler that logs and drops events
impl EventHandler for () {}

type ResponseCallback = Box<dyn FnOnce(Result<Value>) + Send>;

struct PendingCall {
    ordinal: Ordinal,
    response: &'static Type,
    callback: ResponseCallback,
}

#[derive(Default)]
struct ClientState {
    counter: u32,
    pending: FxHashMap<TransactionId, PendingCall>,
    dispatcher: Option<Dispatcher>,
    handler: Option<Arc<dyn EventHandler>>,
    wait: Option<WakeToken>,
    /// Bumped by every bind/unbind; waits from older bindings are ignored
    generation: u64,
    /// Set once the current binding is gone
    error: Option<Error>,
}

impl ClientState {
    fn allocate_txid(&mut self) -> TransactionId {
        loop {
            self.counter = self.counter.wrapping_add(1);
            if let Some(txid) = txid_from_counter(self.counter) {
                if !self.pending.contains_key(&txid) {
                    return txid;
                }
            }
        }
    }

    fn cancel_wait(&mut self) {
        if let (Some(key), Some(dispatcher)) = (self.wait.take(), self.dispatcher.as_ref()) {
            let _ = dispatcher.cancel_wait(key);
        }
    }
}

/// Lock order: `state`, then `channel`.
struct ClientInner {
    state: Mutex<ClientState>,
    channel: RwLock<Option<Channel>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.cancel_wait();
        for (_, call) in state.pending.drain() {
            (call.callback)(Err(Error::Unbound));
        }
    }
}

/// Asynchronous client proxy
///
/// Cheap to clone; clones share the channel and the table of outstanding
/// calls. Replies are matched strictly by txid. A reply for a txid that is
/// not outstanding is a protocol violation and tears the client down, as
/// does an epitaph or the peer closing. On teardown every outstanding call
/// fails with the same error and the event handler's `on_error` runs once.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Client")
            .field("pending", &state.pending.len())
            .field("generation", &state.generation)
            .field("error", &state.error)
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Unbound client; every operation fails with [`Error::Unbound`]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClientInner {
                state: Mutex::new(ClientState {
                    error: Some(Error::Unbound),
                    ..ClientState::default()
                }),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Client bound to `channel`, reading on `dispatcher`
    pub fn create(
        channel: Channel,
        dispatcher: &Dispatcher,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self> {
        let client = Self::new();
        client.bind(channel, dispatcher, handler)?;
        Ok(client)
    }

    /// Start using `channel`, replacing any previous binding
    ///
    /// Calls outstanding on the previous binding fail with
    /// [`Error::Unbound`] and its channel is closed.
    pub fn bind(
        &self,
        channel: Channel,
        dispatcher: &Dispatcher,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        let (previous, stale, armed) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.cancel_wait();
            state.generation += 1;
            state.error = None;
            state.dispatcher = Some(dispatcher.clone());
            state.handler = Some(handler);
            let stale = std::mem::take(&mut state.pending);
            let previous = self.inner.channel.write().replace(channel);
            let armed = self.arm(state);
            if let Err(error) = &armed {
                state.error = Some(error.clone());
            }
            (previous, stale, armed)
        };
        drop(previous);
        for (_, call) in stale {
            (call.callback)(Err(Error::Unbound));
        }
        debug!(loop_name = dispatcher.name(), "client bound");
        armed
    }

    /// Stop reading and take the channel back
    ///
    /// Outstanding calls fail with [`Error::Unbound`]; the event handler is
    /// not notified.
    pub fn unbind(&self) -> Option<Channel> {
        let (channel, stale) = {
            let mut state = self.inner.state.lock();
            state.cancel_wait();
            state.generation += 1;
            state.error = Some(Error::Unbound);
            state.handler = None;
            state.dispatcher = None;
            let stale = std::mem::take(&mut state.pending);
            (self.inner.channel.write().take(), stale)
        };
        for (_, call) in stale {
            (call.callback)(Err(Error::Unbound));
        }
        channel
    }

    /// Whether the client can still send
    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().error.is_none()
    }

    /// Number of calls awaiting a reply
    pub fn pending_calls(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Send a request that expects no reply (txid 0)
    pub fn send_one_way(&self, ordinal: Ordinal, request: &Type, value: Value) -> Result<()> {
        if let Some(error) = &self.inner.state.lock().error {
            return Err(error.clone());
        }
        let mut encoder = Encoder::message(0, ordinal);
        encoder.encode(request, value)?;
        trace!(ordinal, "sending one-way message");
        self.write(encoder)
    }

    /// Send a two-way request; `callback` receives the decoded reply
    ///
    /// The callback runs on a dispatcher thread, exactly once, unless this
    /// returns an error.
    pub fn call<F>(
        &self,
        ordinal: Ordinal,
        request: &Type,
        value: Value,
        response: &'static Type,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        let mut encoder = Encoder::message(0, ordinal);
        encoder.encode(request, value)?;

        let txid = {
            let mut state = self.inner.state.lock();
            if let Some(error) = &state.error {
                return Err(error.clone());
            }
            let txid = state.allocate_txid();
            state.pending.insert(
                txid,
                PendingCall {
                    ordinal,
                    response,
                    callback: Box::new(callback),
                },
            );
            txid
        };
        encoder.set_txid(txid);
        trace!(txid, ordinal, "sending call");

        if let Err(error) = self.write(encoder) {
            // A concurrent teardown may already have failed the call
            if self.inner.state.lock().pending.remove(&txid).is_some() {
                return Err(error);
            }
        }
        Ok(())
    }

    /// [`call`](Self::call) as a future
    pub fn call_async(
        &self,
        ordinal: Ordinal,
        request: &Type,
        value: Value,
        response: &'static Type,
    ) -> BoxFuture<'static, Result<Value>> {
        let (sender, receiver) = oneshot::channel();
        let sent = self.call(ordinal, request, value, response, move |result| {
            let _ = sender.send(result);
        });
        async move {
            sent?;
            receiver.await.unwrap_or(Err(Error::Unbound))
        }
        .boxed()
    }

    fn write(&self, encoder: Encoder) -> Result<()> {
        match self.inner.channel.read().as_ref() {
            Some(channel) => encoder.write(channel),
            None => Err(Error::Unbound),
        }
    }

    fn arm(&self, state: &mut ClientState) -> Result<()> {
        let dispatcher = state.dispatcher.clone().ok_or(Error::Unbound)?;
        let generation = state.generation;
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);

        let channel = self.inner.channel.read();
        let channel = channel.as_ref().ok_or(Error::Unbound)?;
        let key = dispatcher.begin_wait(
            channel,
            Signals::CHANNEL_READABLE | Signals::CHANNEL_PEER_CLOSED,
            move |_, packet| {
                if let Some(inner) = weak.upgrade() {
                    Client { inner }.on_signal(generation, packet);
                }
            },
        )?;
        state.wait = Some(key);
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.inner.state.lock();
        state.generation == generation && state.error.is_none()
    }

    fn on_signal(&self, generation: u64, packet: WaitPacket) {
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation || state.error.is_some() {
                return;
            }
            state.wait = None;
        }
        if !packet.is_ok() {
            return self.teardown(generation, Error::from(packet.status));
        }

        while self.is_current(generation) {
            let mut buf = MessageBuf::new();
            let read = match self.inner.channel.read().as_ref() {
                Some(channel) => channel.read(&mut buf),
                None => return,
            };
            match read {
                Ok(_) => {
                    if let Err(error) = self.handle_message(buf) {
                        return self.teardown(generation, error);
                    }
                }
                Err(Status::ERR_SHOULD_WAIT) => break,
                Err(status) => return self.teardown(generation, Error::from(status)),
            }
        }

        let rearmed = {
            let mut state = self.inner.state.lock();
            if state.generation != generation || state.error.is_some() || state.wait.is_some() {
                return;
            }
            self.arm(&mut state)
        };
        if let Err(error) = rearmed {
            self.teardown(generation, error);
        }
    }

    fn handle_message(&self, buf: MessageBuf) -> Result<()> {
        let message = IncomingMessage::from_buf(buf)?;
        if message.is_epitaph() {
            let status = message.decode_epitaph()?;
            return Err(Error::PeerClosed(status));
        }

        let txid = message.txid();
        if txid == 0 {
            let handler = self.inner.state.lock().handler.clone();
            if let Some(handler) = handler {
                handler.on_event(message);
            }
            return Ok(());
        }

        let call = self.inner.state.lock().pending.remove(&txid);
        let Some(call) = call else {
            warn!(txid, ordinal = message.ordinal(), "reply for unknown transaction");
            return Err(Error::UnknownTxid { txid });
        };
        trace!(txid, ordinal = message.ordinal(), "reply received");
        let result = if message.ordinal() == call.ordinal {
            message.decode(call.response)
        } else {
            Err(Error::UnknownOrdinal {
                ordinal: message.ordinal(),
            })
        };
        (call.callback)(result);
        Ok(())
    }

    fn teardown(&self, generation: u64, error: Error) {
        let (channel, stale, handler) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.generation != generation || state.error.is_some() {
                return;
            }
            state.error = Some(error.clone());
            state.cancel_wait();
            let stale = std::mem::take(&mut state.pending);
            (self.inner.channel.write().take(), stale, state.handler.take())
        };
        drop(channel);
        debug!(%error, pending = stale.len(), "client torn down");

        for (_, call) in stale {
            (call.callback)(Err(error.clone()));
        }
        if let Some(handler) = handler {
            handler.on_error(error);
        }
    }
}

/// Blocking client proxy
///
/// Each call writes the request and blocks until the reply with the same
/// txid arrives or the deadline passes. Events stay queued until
/// [`wait_for_event`](Self::wait_for_event) reads them.
#[derive(Debug)]
pub struct SyncClient {
    channel: Channel,
    counter: AtomicU32,
}

impl SyncClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            counter: AtomicU32::new(0),
        }
    }

    pub fn into_channel(self) -> Channel {
        self.channel
    }

    fn allocate_txid(&self) -> TransactionId {
        loop {
            let counter = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if let Some(txid) = txid_from_counter(counter) {
                return txid;
            }
        }
    }

    pub fn send_one_way(&self, ordinal: Ordinal, request: &Type, value: Value) -> Result<()> {
        let mut encoder = Encoder::message(0, ordinal);
        encoder.encode(request, value)?;
        encoder.write(&self.channel)
    }

    /// Send a request and wait for its reply until `deadline`
    ///
    /// Expiry yields [`Error::Timeout`]. If the server closed the channel
    /// with an epitaph, its status is returned in [`Error::PeerClosed`].
    pub fn call(
        &self,
        ordinal: Ordinal,
        request: &Type,
        value: Value,
        response: &Type,
        deadline: Time,
    ) -> Result<Value> {
        let txid = self.allocate_txid();
        let mut encoder = Encoder::message(txid, ordinal);
        encoder.encode(request, value)?;
        let (bytes, mut handles) = encoder.finish()?;

        let mut buf = MessageBuf::new();
        trace!(txid, ordinal, "sync call");
        match self.channel.call(deadline, &bytes, &mut handles, &mut buf) {
            Ok(_) => {}
            Err(Status::ERR_PEER_CLOSED) => return Err(self.closed_error()),
            Err(status) => return Err(Error::from(status)),
        }

        let message = IncomingMessage::from_buf(buf)?;
        if message.ordinal() != ordinal {
            return Err(Error::UnknownOrdinal {
                ordinal: message.ordinal(),
            });
        }
        message.decode(response)
    }

    /// Block until an event (txid 0) arrives or `deadline` passes
    pub fn wait_for_event(&self, deadline: Time) -> Result<IncomingMessage> {
        loop {
            let mut buf = MessageBuf::new();
            match self.channel.read(&mut buf) {
                Ok(_) => {
                    let message = IncomingMessage::from_buf(buf)?;
                    if message.is_epitaph() {
                        return Err(Error::PeerClosed(message.decode_epitaph()?));
                    }
                    if message.txid() != 0 {
                        return Err(Error::UnknownTxid {
                            txid: message.txid(),
                        });
                    }
                    return Ok(message);
                }
                Err(Status::ERR_SHOULD_WAIT) => {
                    self.channel
                        .wait_one(
                            Signals::CHANNEL_READABLE | Signals::CHANNEL_PEER_CLOSED,
                            deadline,
                        )
                        .map_err(Error::from)?;
                }
                Err(status) => return Err(Error::from(status)),
            }
        }
    }

    /// Error for a closed peer, preferring a queued epitaph's status
    fn closed_error(&self) -> Error {
        let mut buf = MessageBuf::new();
        while self.channel.read(&mut buf).is_ok() {
            let bytes = std::mem::take(&mut buf.bytes);
            let handles = std::mem::take(&mut buf.handles);
            if let Ok(message) = IncomingMessage::from_parts(bytes, handles) {
                if message.is_epitaph() {
                    if let Ok(status) = message.decode_epitaph() {
                        return Error::PeerClosed(status);
                    }
                }
            }
        }
        Error::PeerClosed(Status::ERR_PEER_CLOSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::write_epitaph;
    use crate::MessageHeader;
    use blinc_fuchsia_async::Loop;
    use blinc_fuchsia_zircon::Duration;

    #[derive(Default)]
    struct Events {
        events: Mutex<Vec<Ordinal>>,
        errors: Mutex<Vec<Error>>,
    }

    impl EventHandler for Events {
        fn on_event(&self, message: IncomingMessage) {
            self.events.lock().push(message.ordinal());
        }

        fn on_error(&self, error: Error) {
            self.errors.lock().push(error);
        }
    }

    fn reply(server: &Channel, txid: TransactionId, ordinal: Ordinal, n: u32) {
        let mut encoder = Encoder::message(txid, ordinal);
        encoder.encode(&Type::U32, Value::U32(n)).unwrap();
        encoder.write(server).unwrap();
    }

    fn read_request(server: &Channel) -> MessageHeader {
        let mut buf = MessageBuf::new();
        server.read(&mut buf).unwrap();
        MessageHeader::decode(&buf.bytes).unwrap()
    }

    type Results = Arc<Mutex<Vec<Result<Value>>>>;

    fn collect(results: &Results) -> impl FnOnce(Result<Value>) + Send + 'static {
        let results = results.clone();
        move |result| results.lock().push(result)
    }

    #[test]
    fn test_txid_allocation() {
        assert_eq!(txid_from_counter(1), Some(0x8000_0001));
        assert_eq!(txid_from_counter(0x8000_0000), None);
        assert_eq!(txid_from_counter(0xFFFF_FFFF), Some(0xFFFF_FFFF));

        let mut state = ClientState::default();
        assert_eq!(state.allocate_txid(), 0x8000_0001);
        state.counter = 0x7FFF_FFFE;
        assert_eq!(state.allocate_txid(), 0xFFFF_FFFF);
        // Wraps past the reserved value
        assert_eq!(state.allocate_txid(), 0x8000_0001);
    }

    #[test]
    fn test_txid_skips_outstanding() {
        let mut state = ClientState::default();
        state.pending.insert(
            0x8000_0001,
            PendingCall {
                ordinal: 1,
                response: &Type::U32,
                callback: Box::new(|_| {}),
            },
        );
        assert_eq!(state.allocate_txid(), 0x8000_0002);
    }

    #[test]
    fn test_call_and_reply() {
        let lp = Loop::manual();
        let (client_end, server) = Channel::create().unwrap();
        let client = Client::create(client_end, lp.dispatcher(), Arc::new(())).unwrap();
        let results: Results = Arc::default();

        client.call(7, &Type::U32, Value::U32(1), &Type::U32, collect(&results)).unwrap();
        let header = read_request(&server);
        assert_eq!((header.txid, header.ordinal), (0x8000_0001, 7));
        assert_eq!(client.pending_calls(), 1);

        reply(&server, header.txid, 7, 2);
        lp.run_until_idle();
        assert_eq!(results.lock().as_slice(), &[Ok(Value::U32(2))]);
        assert_eq!(client.pending_calls(), 0);
    }

    #[test]
    fn test_unknown_txid_tears_down() {
        let lp = Loop::manual();
        let (client_end, server) = Channel::create().unwrap();
        let events = Arc::new(Events::default());
        let client = Client::create(client_end, lp.dispatcher(), events.clone()).unwrap();
        let results: Results = Arc::default();

        client.call(7, &Type::U32, Value::U32(1), &Type::U32, collect(&results)).unwrap();
        reply(&server, 0x8000_0042, 7, 0);
        lp.run_until_idle();

        let expected = Error::UnknownTxid { txid: 0x8000_0042 };
        assert_eq!(results.lock().as_slice(), &[Err(expected.clone())]);
        assert_eq!(events.errors.lock().as_slice(), &[expected.clone()]);
        assert!(!client.is_bound());
        assert!(server.is_peer_closed());
        assert_eq!(client.send_one_way(1, &Type::U32, Value::U32(0)), Err(expected));
    }

    #[test]
    fn test_events_and_epitaph() {
        let lp = Loop::manual();
        let (client_end, server) = Channel::create().unwrap();
        let events = Arc::new(Events::default());
        let _client = Client::create(client_end, lp.dispatcher(), events.clone()).unwrap();

        reply(&server, 0, 99, 0);
        write_epitaph(&server, Status::ERR_NOT_SUPPORTED).unwrap();
        drop(server);
        lp.run_until_idle();

        assert_eq!(events.events.lock().as_slice(), &[99]);
        assert_eq!(
            events.errors.lock().as_slice(),
            &[Error::PeerClosed(Status::ERR_NOT_SUPPORTED)]
        );
    }

    #[test]
    fn test_rebind_fails_outstanding() {
        let lp = Loop::manual();
        let (first, _first_server) = Channel::create().unwrap();
        let client = Client::create(first, lp.dispatcher(), Arc::new(())).unwrap();
        let results: Results = Arc::default();
        client.call(7, &Type::U32, Value::U32(1), &Type::U32, collect(&results)).unwrap();

        let (second, second_server) = Channel::create().unwrap();
        client.bind(second, lp.dispatcher(), Arc::new(())).unwrap();
        assert_eq!(results.lock().as_slice(), &[Err(Error::Unbound)]);

        client.call(7, &Type::U32, Value::U32(1), &Type::U32, collect(&results)).unwrap();
        let header = read_request(&second_server);
        reply(&second_server, header.txid, 7, 5);
        lp.run_until_idle();
        assert_eq!(results.lock()[1], Ok(Value::U32(5)));
    }

    #[test]
    fn test_unbind_returns_channel() {
        let lp = Loop::manual();
        let (client_end, _server) = Channel::create().unwrap();
        let client = Client::create(client_end, lp.dispatcher(), Arc::new(())).unwrap();
        assert!(client.unbind().is_some());
        assert!(client.unbind().is_none());
        assert_eq!(
            client.send_one_way(1, &Type::U32, Value::U32(0)),
            Err(Error::Unbound)
        );
        assert_eq!(lp.dispatcher().pending_waits(), 0);
    }

    #[test]
    fn test_call_async() {
        let lp = Loop::manual();
        let (client_end, server) = Channel::create().unwrap();
        let client = Client::create(client_end, lp.dispatcher(), Arc::new(())).unwrap();

        let future = client.call_async(7, &Type::U32, Value::U32(1), &Type::U32);
        let header = read_request(&server);
        reply(&server, header.txid, 7, 8);
        lp.run_until_idle();
        assert_eq!(futures::executor::block_on(future), Ok(Value::U32(8)));

        let dropped = client.call_async(7, &Type::U32, Value::U32(1), &Type::U32);
        client.unbind();
        assert_eq!(futures::executor::block_on(dropped), Err(Error::Unbound));
    }

    #[test]
    fn test_sync_call() {
        let (client_end, server) = Channel::create().unwrap();
        let client = SyncClient::new(client_end);

        let responder = std::thread::spawn(move || {
            server.wait_one(Signals::CHANNEL_READABLE, Time::INFINITE).unwrap();
            let header = read_request(&server);
            reply(&server, 0, 50, 0);
            reply(&server, header.txid, header.ordinal, 10);
            server
        });

        let value = client
            .call(7, &Type::U32, Value::U32(9), &Type::U32, Time::INFINITE)
            .unwrap();
        assert_eq!(value, Value::U32(10));
        let _server = responder.join().unwrap();

        let event = client.wait_for_event(Time::INFINITE_PAST).unwrap();
        assert_eq!(event.ordinal(), 50);
    }

    #[test]
    fn test_sync_timeout() {
        let (client_end, _server) = Channel::create().unwrap();
        let client = SyncClient::new(client_end);
        let deadline = Time::after(Duration::from_millis(10));
        assert_eq!(
            client.call(7, &Type::U32, Value::U32(0), &Type::U32, deadline),
            Err(Error::Timeout)
        );
        assert_eq!(
            client.wait_for_event(Time::after(Duration::from_millis(5))).unwrap_err(),
            Error::Timeout
        );
    }

    #[test]
    fn test_sync_epitaph() {
        let (client_end, server) = Channel::create().unwrap();
        write_epitaph(&server, Status::ERR_ACCESS_DENIED).unwrap();
        drop(server);
        let client = SyncClient::new(client_end);
        assert_eq!(
            client.call(7, &Type::U32, Value::U32(0), &Type::U32, Time::INFINITE),
            Err(Error::PeerClosed(Status::ERR_ACCESS_DENIED))
        );
    }
}
