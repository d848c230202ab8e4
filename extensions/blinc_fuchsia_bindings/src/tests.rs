//! End-to-end scenarios over real channels and loops

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;

use blinc_fidl::{
    bind, decode, encode, Error, EventHandler, IncomingMessage, OnUnbound, Result,
    ServerBindingRef, Table, TableField, TableType, Type, UnbindInfo, UnbindReason, UnionMember,
    UnionType, UnknownData, Value, Variant,
};
use blinc_fuchsia_async::{Loop, LoopConfig};
use blinc_fuchsia_zircon::{
    AsHandleRef, Channel, Duration, EventPair, Handle, HandleBased, MessageBuf, ObjectType,
    Rights, Signals, Status, Time,
};
use parking_lot::Mutex;

use crate::test_echo::*;

const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn deadline() -> Time {
    Time::after(Duration::from_seconds(5))
}

fn is_closed(peer: &EventPair) -> bool {
    peer.wait_one(Signals::EVENTPAIR_PEER_CLOSED, Time::INFINITE_PAST)
        .is_ok()
}

/// Echoes everything back and counts calls
#[derive(Default)]
struct Echoer {
    calls: Arc<AtomicUsize>,
    txids: Arc<Mutex<Vec<u32>>>,
}

impl Echo for Echoer {
    fn echo_string(&self, value: String, responder: EchoStringResponder) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.txids.lock().push(responder.completer().txid());
        let _ = responder.send(&value);
    }

    fn echo_item(&self, item: Item, responder: EchoItemResponder) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _ = responder.send(item);
    }
}

#[derive(Default)]
struct Events {
    strings: Mutex<Vec<String>>,
    errors: Mutex<Vec<Error>>,
}

impl EventHandler for Events {
    fn on_event(&self, message: IncomingMessage) {
        if let Ok(EchoEvent::OnString { response }) = EchoEvent::decode(message) {
            self.strings.lock().push(response);
        }
    }

    fn on_error(&self, error: Error) {
        self.errors.lock().push(error);
    }
}

fn unbind_recorder() -> (Arc<Mutex<Vec<UnbindInfo>>>, Option<OnUnbound>) {
    let infos: Arc<Mutex<Vec<UnbindInfo>>> = Arc::default();
    let sink = infos.clone();
    (infos, Some(Box::new(move |info| sink.lock().push(info))))
}

fn read_request(channel: &Channel) -> IncomingMessage {
    let mut buf = MessageBuf::new();
    channel.read(&mut buf).unwrap();
    IncomingMessage::from_buf(buf).unwrap()
}

fn write_string_reply(channel: &Channel, txid: u32, response: &str) {
    let mut encoder = blinc_fidl::Encoder::message(txid, ECHO_STRING_ORDINAL);
    encoder
        .encode(
            &ECHO_STRING_RESPONSE_TYPE,
            Value::Struct(vec![Value::string(response)]),
        )
        .unwrap();
    encoder.write(channel).unwrap();
}

#[test]
fn test_echo_string_round_trip() {
    init_tracing();
    let lp = Loop::new(LoopConfig::multi_threaded(2)).unwrap();
    let (client_end, server_end) = Channel::create().unwrap();
    let echoer = Echoer::default();
    let (calls, txids) = (echoer.calls.clone(), echoer.txids.clone());
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(echoer)), None).unwrap();

    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();
    let (tx, rx) = mpsc::channel();
    proxy
        .echo_string("hello", move |result| {
            let _ = tx.send(result);
        })
        .unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Ok("hello".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(txids.lock().as_slice(), &[0x8000_0001]);
    assert_eq!(proxy.client().pending_calls(), 0);
}

#[test]
fn test_echo_string_async() {
    let lp = Loop::new(LoopConfig::single_threaded()).unwrap();
    let (client_end, server_end) = Channel::create().unwrap();
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Echoer::default())), None).unwrap();
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();

    let reply = futures::executor::block_on(proxy.echo_string_async("async"));
    assert_eq!(reply, Ok("async".to_string()));
}

#[test]
fn test_echo_item_transfers_handle() {
    let lp = Loop::manual();
    let (client_end, server_end) = Channel::create().unwrap();
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Echoer::default())), None).unwrap();
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();

    let (token, peer) = EventPair::create().unwrap();
    let kept = token.duplicate_handle(Rights::SAME_RIGHTS).unwrap();
    let koid = token.koid().unwrap();
    let baseline = kept.handle_count().unwrap();
    assert_eq!(baseline, 2);

    let slot: Arc<Mutex<Option<Result<Item>>>> = Arc::default();
    let sink = slot.clone();
    proxy
        .echo_item(Item { id: 3, token }, move |result| {
            *sink.lock() = Some(result);
        })
        .unwrap();
    lp.run_until_idle();

    let item = slot.lock().take().unwrap().unwrap();
    assert_eq!(item.id, 3);
    assert_eq!(item.token.koid().unwrap(), koid);
    assert_eq!(kept.handle_count().unwrap(), baseline);

    drop(item);
    assert_eq!(kept.handle_count().unwrap(), baseline - 1);
    drop(kept);
    assert!(is_closed(&peer));
}

#[test]
fn test_replies_out_of_order() {
    let lp = Loop::manual();
    let (client_end, server) = Channel::create().unwrap();
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();
    let results: Arc<Mutex<Vec<(&'static str, Result<String>)>>> = Arc::default();

    for label in ["a", "b"] {
        let sink = results.clone();
        proxy
            .echo_string(label, move |result| sink.lock().push((label, result)))
            .unwrap();
    }
    let first = read_request(&server);
    let second = read_request(&server);
    assert_ne!(first.txid(), second.txid());

    write_string_reply(&server, second.txid(), "b-reply");
    write_string_reply(&server, first.txid(), "a-reply");
    lp.run_until_idle();

    assert_eq!(
        results.lock().as_slice(),
        &[("b", Ok("b-reply".to_string())), ("a", Ok("a-reply".to_string()))]
    );
    assert!(proxy.client().is_bound());
}

#[test]
fn test_concurrent_unbind_runs_callback_once() {
    let lp = Loop::manual();
    let (_client_end, server_end) = Channel::create().unwrap();
    let (infos, on_unbound) = unbind_recorder();
    let binding =
        bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Echoer::default())), on_unbound)
            .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let threads: Vec<_> = (0..2)
        .map(|_| {
            let binding = binding.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                binding.unbind();
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }
    lp.run_until_idle();

    let infos = infos.lock();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].reason, UnbindReason::Unbind);
    assert!(infos[0].channel.is_some());
    assert!(!binding.is_bound());
}

const EVENTPAIR: Type = Type::Handle {
    object_type: ObjectType::EventPair,
    rights: Rights::SAME_RIGHTS,
    nullable: false,
};

/// `Shape` as a newer peer sees it, with a handle-carrying member
static SHAPE_V2: UnionType = UnionType {
    name: "test.echo/Shape",
    members: &[
        UnionMember { ordinal: 1, name: "radius", ty: Type::F64 },
        UnionMember {
            ordinal: 2,
            name: "points",
            ty: Type::Vector { element: &Type::I32, max_len: 16, nullable: false },
        },
        UnionMember { ordinal: 3, name: "token", ty: EVENTPAIR },
    ],
    strict: false,
};

static SETTINGS_V2: TableType = TableType {
    name: "test.echo/Settings",
    fields: &[
        TableField {
            ordinal: 1,
            name: "name",
            ty: Type::String { max_len: 64, nullable: false },
        },
        TableField {
            ordinal: 2,
            name: "shape",
            ty: Type::Union { union: &SHAPE_V2, nullable: false },
        },
        TableField {
            ordinal: 3,
            name: "tokens",
            ty: Type::Vector { element: &EVENTPAIR, max_len: 4, nullable: false },
        },
        TableField { ordinal: 4, name: "owner", ty: EVENTPAIR },
    ],
};

#[test]
fn test_unknown_members_close_handles() {
    let (in_union, union_peer) = EventPair::create().unwrap();
    let (in_table, table_peer) = EventPair::create().unwrap();
    let value = Table::new()
        .with(1, Value::string("x"))
        .with(2, Value::union(3, Value::handle(in_union)))
        .with(4, Value::handle(in_table));
    let (bytes, handles) = encode(&Type::Table(&SETTINGS_V2), Value::Table(value)).unwrap();
    assert_eq!(handles.len(), 2);

    let Value::Table(mut table) = decode(&bytes, handles, &SETTINGS_TYPE).unwrap() else {
        panic!("expected a table");
    };
    assert!(is_closed(&union_peer));
    assert!(is_closed(&table_peer));

    assert_eq!(table.get(1), Some(&Value::string("x")));
    let Some(Value::Union(Some(shape))) = table.get(2) else {
        panic!("expected the shape member");
    };
    assert_eq!(shape.ordinal, 3);
    assert!(matches!(
        &shape.variant,
        Variant::Unknown(UnknownData { handle_count: 1, .. })
    ));
    let unknown: Vec<_> = table.unknown().map(|(o, data)| (o, data.handle_count)).collect();
    assert_eq!(unknown, vec![(4, 1)]);

    // Unknown content cannot be forwarded
    let forwarded = Table { fields: std::mem::take(&mut table.fields) };
    assert_eq!(
        encode(&SETTINGS_TYPE, Value::Table(forwarded)).unwrap_err(),
        Error::CannotEncodeUnknownVariant { ordinal: 4 }
    );

    let (token, _peer) = EventPair::create().unwrap();
    let shape_only = Table {
        fields: vec![(
            2,
            Variant::Known(Value::Union(Some(Box::new(blinc_fidl::UnionValue {
                ordinal: 3,
                variant: Variant::Unknown(UnknownData { bytes: vec![0; 8], handle_count: 1 }),
            })))),
        )],
    }
    .with(3, Value::vector(vec![Value::handle(token)]));
    assert_eq!(
        encode(&SETTINGS_TYPE, Value::Table(shape_only)).unwrap_err(),
        Error::CannotEncodeUnknownVariant { ordinal: 3 }
    );
}

/// `Settings { name: "x", tokens: [a, b] }` plus the peers of its tokens
fn encoded_settings() -> (Vec<u8>, Vec<Handle>, [EventPair; 2]) {
    let (a, peer_a) = EventPair::create().unwrap();
    let (b, peer_b) = EventPair::create().unwrap();
    let value = Table::new()
        .with(1, Value::string("x"))
        .with(3, Value::vector(vec![Value::handle(a), Value::handle(b)]));
    let (bytes, handles) = encode(&SETTINGS_TYPE, Value::Table(value)).unwrap();
    (bytes, handles, [peer_a, peer_b])
}

#[test]
fn test_settings_layout() {
    let (bytes, handles, peers) = encoded_settings();
    // Table header, three envelopes, string header and data, vector header and data
    assert_eq!(bytes.len(), 112);
    assert_eq!(&bytes[0..8], &3u64.to_le_bytes());
    assert_eq!(&bytes[72..80], &u64::MAX.to_le_bytes());
    assert_eq!(bytes[80], b'x');

    let Value::Table(table) = decode(&bytes, handles, &SETTINGS_TYPE).unwrap() else {
        panic!("expected a table");
    };
    assert_eq!(table.get(1), Some(&Value::string("x")));
    assert!(table.get(2).is_none());
    assert!(!peers.iter().any(is_closed));
    drop(table);
    assert!(peers.iter().all(is_closed));
}

#[test]
fn test_corrupted_settings_close_handles() {
    type Corruption = fn(&mut Vec<u8>, &mut Vec<Handle>);
    let corruptions: [(&str, Corruption); 4] = [
        ("string presence", |bytes, _| bytes[72] = 0),
        ("string padding", |bytes, _| bytes[81] = 1),
        ("truncated", |bytes, _| bytes.truncate(104)),
        ("missing handle", |_, handles| drop(handles.pop())),
    ];

    for (name, corrupt) in corruptions {
        let (mut bytes, mut handles, peers) = encoded_settings();
        corrupt(&mut bytes, &mut handles);
        assert!(decode(&bytes, handles, &SETTINGS_TYPE).is_err(), "{name} decoded");
        assert!(peers.iter().all(is_closed), "{name} leaked a handle");
    }
}

/// Holds the `EchoString` responder instead of replying
struct Stash {
    held: Arc<Mutex<Option<EchoStringResponder>>>,
}

impl Echo for Stash {
    fn echo_string(&self, _value: String, responder: EchoStringResponder) {
        *self.held.lock() = Some(responder);
    }

    fn echo_item(&self, _item: Item, responder: EchoItemResponder) {
        responder.close(Status::ERR_NOT_SUPPORTED);
    }
}

#[test]
fn test_reply_after_unbind() {
    let lp = Loop::manual();
    let (client_end, server_end) = Channel::create().unwrap();
    let held = Arc::default();
    let stash = Stash { held: Arc::clone(&held) };
    let binding = bind(lp.dispatcher(), server_end, Arc::new(EchoServer(stash)), None).unwrap();
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();

    proxy.echo_string("late", |_| {}).unwrap();
    lp.run_until_idle();
    let responder = held.lock().take().unwrap();

    binding.unbind();
    assert_eq!(responder.send("late"), Err(Error::Unbound));
}

#[test]
fn test_reply_from_another_thread() {
    let lp = Loop::manual();
    let (client_end, server_end) = Channel::create().unwrap();
    let held = Arc::default();
    let stash = Stash { held: Arc::clone(&held) };
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(stash)), None).unwrap();
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();

    let results: Arc<Mutex<Vec<Result<String>>>> = Arc::default();
    let sink = results.clone();
    proxy.echo_string("later", move |r| sink.lock().push(r)).unwrap();
    lp.run_until_idle();

    let responder = held.lock().take().unwrap();
    thread::spawn(move || responder.send("from elsewhere"))
        .join()
        .unwrap()
        .unwrap();
    lp.run_until_idle();
    assert_eq!(results.lock().as_slice(), &[Ok("from elsewhere".to_string())]);
}

/// Refuses every request with an epitaph
struct Refuser;

impl Echo for Refuser {
    fn echo_string(&self, _value: String, responder: EchoStringResponder) {
        responder.close(Status::ERR_ACCESS_DENIED);
    }

    fn echo_item(&self, _item: Item, responder: EchoItemResponder) {
        responder.close(Status::ERR_ACCESS_DENIED);
    }
}

#[test]
fn test_close_epitaph_reaches_client() {
    let lp = Loop::manual();
    let (client_end, server_end) = Channel::create().unwrap();
    let (infos, on_unbound) = unbind_recorder();
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Refuser)), on_unbound).unwrap();
    let events = Arc::new(Events::default());
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), events.clone()).unwrap();

    let results: Arc<Mutex<Vec<Result<String>>>> = Arc::default();
    let sink = results.clone();
    proxy.echo_string("please", move |r| sink.lock().push(r)).unwrap();
    lp.run_until_idle();

    let expected = Error::PeerClosed(Status::ERR_ACCESS_DENIED);
    assert_eq!(results.lock().as_slice(), &[Err(expected.clone())]);
    assert_eq!(events.errors.lock().as_slice(), &[expected.clone()]);
    assert_eq!(
        infos.lock()[0].reason,
        UnbindReason::Close(Status::ERR_ACCESS_DENIED)
    );
    assert!(!proxy.client().is_bound());
    assert_eq!(proxy.echo_string("again", |_| {}), Err(expected));
}

#[test]
fn test_invalid_request_closes_binding() {
    let lp = Loop::manual();
    let (client, server_end) = Channel::create().unwrap();
    let (infos, on_unbound) = unbind_recorder();
    let echoer = Echoer::default();
    let calls = echoer.calls.clone();
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(echoer)), on_unbound).unwrap();

    // A string longer than the declared bound
    let long = "x".repeat(MAX_ECHO_LEN as usize + 1);
    let mut encoder = blinc_fidl::Encoder::message(0x8000_0001, ECHO_STRING_ORDINAL);
    encoder
        .encode(&Type::STRING, Value::string(long))
        .unwrap();
    encoder.write(&client).unwrap();
    lp.run_until_idle();

    assert_eq!(
        read_request(&client).decode_epitaph(),
        Ok(Status::ERR_INVALID_ARGS)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(infos.lock()[0].reason, UnbindReason::Close(Status::ERR_INVALID_ARGS));
}

#[test]
fn test_unknown_method_closes_binding() {
    let lp = Loop::manual();
    let (client, server_end) = Channel::create().unwrap();
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Echoer::default())), None).unwrap();

    let mut encoder = blinc_fidl::Encoder::message(0x8000_0001, 0x1234);
    encoder.encode(&Type::U32, Value::U32(0)).unwrap();
    encoder.write(&client).unwrap();
    lp.run_until_idle();

    assert_eq!(
        read_request(&client).decode_epitaph(),
        Ok(Status::ERR_NOT_SUPPORTED)
    );
}

#[test]
fn test_send_token_one_way() {
    struct Tokens(Arc<Mutex<Vec<EventPair>>>);

    impl Echo for Tokens {
        fn echo_string(&self, value: String, responder: EchoStringResponder) {
            let _ = responder.send(&value);
        }

        fn send_token(&self, token: EventPair) {
            self.0.lock().push(token);
        }

        fn echo_item(&self, item: Item, responder: EchoItemResponder) {
            let _ = responder.send(item);
        }
    }

    let lp = Loop::manual();
    let (client_end, server_end) = Channel::create().unwrap();
    let tokens: Arc<Mutex<Vec<EventPair>>> = Arc::default();
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Tokens(tokens.clone()))), None).unwrap();
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();

    let (token, peer) = EventPair::create().unwrap();
    let koid = token.koid().unwrap();
    proxy.send_token(token).unwrap();
    assert_eq!(proxy.client().pending_calls(), 0);
    lp.run_until_idle();

    let received = tokens.lock().pop().unwrap();
    assert_eq!(received.koid().unwrap(), koid);
    assert!(!is_closed(&peer));
}

#[test]
fn test_events_reach_async_proxy() {
    let lp = Loop::manual();
    let (client_end, server_end) = Channel::create().unwrap();
    let binding: ServerBindingRef =
        bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Echoer::default())), None).unwrap();
    let events = Arc::new(Events::default());
    let _proxy = EchoProxy::new(client_end, lp.dispatcher(), events.clone()).unwrap();

    send_on_string(&binding, "one").unwrap();
    send_on_string(&binding, "two").unwrap();
    lp.run_until_idle();
    assert_eq!(events.strings.lock().as_slice(), &["one".to_string(), "two".to_string()]);
    assert!(events.errors.lock().is_empty());
}

#[test]
fn test_sync_proxy_timeout() {
    let (client_end, _server) = Channel::create().unwrap();
    let proxy = EchoSynchronousProxy::new(client_end);
    assert_eq!(
        proxy.echo_string("anyone?", Time::after(Duration::from_millis(20))),
        Err(Error::Timeout)
    );
}

#[test]
fn test_sync_proxy_against_server() {
    init_tracing();
    let lp = Loop::new(LoopConfig::single_threaded()).unwrap();
    let (client_end, server_end) = Channel::create().unwrap();
    let binding =
        bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Echoer::default())), None).unwrap();
    let proxy = EchoSynchronousProxy::new(client_end);

    assert_eq!(proxy.echo_string("sync", deadline()), Ok("sync".to_string()));
    assert_eq!(proxy.echo_string("again", deadline()), Ok("again".to_string()));

    send_on_string(&binding, "ping").unwrap();
    assert_eq!(
        proxy.wait_for_event(deadline()),
        Ok(EchoEvent::OnString { response: "ping".to_string() })
    );

    binding.close(Status::ERR_UNAVAILABLE);
    assert_eq!(
        proxy.echo_string("closed", deadline()),
        Err(Error::PeerClosed(Status::ERR_UNAVAILABLE))
    );
}

#[test]
fn test_loop_drop_tears_down_bindings() {
    let lp = Loop::manual();
    let (client_end, server_end) = Channel::create().unwrap();
    let (infos, on_unbound) = unbind_recorder();
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(Echoer::default())), on_unbound).unwrap();
    let events = Arc::new(Events::default());
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), events.clone()).unwrap();

    drop(lp);
    let canceled = Error::Zircon(Status::ERR_CANCELED);
    assert_eq!(
        infos.lock()[0].reason,
        UnbindReason::InternalError(canceled.clone())
    );
    assert_eq!(events.errors.lock().as_slice(), &[canceled]);
    assert!(!proxy.client().is_bound());
}

/// Blocks the first request until a second one has been dispatched
struct Overlap {
    dispatched: Mutex<mpsc::Sender<()>>,
    released: Mutex<mpsc::Receiver<()>>,
}

impl Echo for Overlap {
    fn echo_string(&self, value: String, responder: EchoStringResponder) {
        if value == "first" {
            responder.completer().enable_next_dispatch();
            let overlapped = self.released.lock().recv_timeout(TIMEOUT).is_ok();
            let _ = responder.send(if overlapped { "overlapped" } else { "serialized" });
        } else {
            let _ = self.dispatched.lock().send(());
            let _ = responder.send(&value);
        }
    }

    fn echo_item(&self, item: Item, responder: EchoItemResponder) {
        let _ = responder.send(item);
    }
}

#[test]
fn test_enable_next_dispatch_overlaps() {
    init_tracing();
    let lp = Loop::new(LoopConfig::multi_threaded(2)).unwrap();
    let (client_end, server_end) = Channel::create().unwrap();
    let (dispatched, released) = mpsc::channel();
    let overlap = Overlap {
        dispatched: Mutex::new(dispatched),
        released: Mutex::new(released),
    };
    bind(lp.dispatcher(), server_end, Arc::new(EchoServer(overlap)), None).unwrap();
    let proxy = EchoProxy::new(client_end, lp.dispatcher(), Arc::new(())).unwrap();

    let (tx, rx) = mpsc::channel();
    for value in ["first", "second"] {
        let tx = tx.clone();
        proxy
            .echo_string(value, move |result| {
                let _ = tx.send(result);
            })
            .unwrap();
    }

    let mut replies: Vec<String> = (0..2)
        .map(|_| rx.recv_timeout(TIMEOUT).unwrap().unwrap())
        .collect();
    replies.sort();
    assert_eq!(replies, vec!["overlapped".to_string(), "second".to_string()]);
}
