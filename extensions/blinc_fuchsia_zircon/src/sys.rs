//! In-process kernel object table
//!
//! Implements the subset of the Zircon syscall surface the rest of the SDK
//! uses: handle lifetime and rights, channels, event pairs, signals, blocking
//! waits and one-shot async observers.
//!
//! Lock order: the handle table lock may be taken while an object's state
//! lock is held, never the other way round. Handles and observer callbacks
//! are always dropped or invoked after every lock is released, because
//! closing a handle can re-enter this module for another object.

use crate::{
    ChannelReadResult, Handle, HandleBasicInfo, Koid, MessageBuf, ObjectType, RawHandle, Rights,
    Signals, Status, Time, WaitCallback, CHANNEL_MAX_MSG_BYTES, CHANNEL_MAX_MSG_HANDLES,
    HANDLE_INVALID,
};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Signals a user may set with `object_signal`
const USER_SETTABLE: Signals = Signals::USER_ALL.union(Signals::EVENTPAIR_SIGNALED);

struct Waiter {
    handle: RawHandle,
    key: u64,
    signals: Signals,
    callback: WaitCallback,
}

struct QueuedMessage {
    bytes: Vec<u8>,
    handles: Vec<Handle>,
}

impl QueuedMessage {
    fn txid(&self) -> Option<u32> {
        let prefix: [u8; 4] = self.bytes.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(prefix))
    }
}

#[derive(Default)]
struct ObjectState {
    signals: Signals,
    waiters: Vec<Waiter>,
    messages: VecDeque<QueuedMessage>,
    closed: bool,
}

/// Observers that became ready, to be run once locks are released
#[must_use]
struct Fired(Vec<WaitCallback>, Signals);

impl Fired {
    fn none() -> Self {
        Fired(Vec::new(), Signals::NONE)
    }

    fn run(self) {
        let Fired(callbacks, observed) = self;
        for callback in callbacks {
            callback(Ok(observed));
        }
    }
}

struct KernelObject {
    koid: Koid,
    object_type: ObjectType,
    handle_count: AtomicU32,
    state: Mutex<ObjectState>,
    changed: Condvar,
    peer: OnceLock<(Weak<KernelObject>, Koid)>,
}

impl KernelObject {
    fn new(object_type: ObjectType, initial: Signals) -> Arc<Self> {
        static NEXT_KOID: AtomicU64 = AtomicU64::new(1024);
        Arc::new(Self {
            koid: NEXT_KOID.fetch_add(1, Ordering::Relaxed),
            object_type,
            handle_count: AtomicU32::new(0),
            state: Mutex::new(ObjectState {
                signals: initial,
                ..Default::default()
            }),
            changed: Condvar::new(),
            peer: OnceLock::new(),
        })
    }

    fn link(a: &Arc<KernelObject>, b: &Arc<KernelObject>) {
        let _ = a.peer.set((Arc::downgrade(b), b.koid));
        let _ = b.peer.set((Arc::downgrade(a), a.koid));
    }

    fn peer(&self) -> Option<Arc<KernelObject>> {
        self.peer.get().and_then(|(peer, _)| peer.upgrade())
    }

    fn related_koid(&self) -> Koid {
        self.peer.get().map(|(_, koid)| *koid).unwrap_or(0)
    }

    fn apply_signals(state: &mut ObjectState, clear: Signals, set: Signals) -> Fired {
        state.signals = state.signals.difference(clear).union(set);
        let current = state.signals;
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
            .into_iter()
            .partition(|waiter| waiter.signals.intersects(current));
        state.waiters = pending;
        Fired(ready.into_iter().map(|w| w.callback).collect(), current)
    }

    fn update_signals(&self, clear: Signals, set: Signals) {
        let fired = {
            let mut state = self.state.lock();
            Self::apply_signals(&mut state, clear, set)
        };
        self.changed.notify_all();
        fired.run();
    }

    fn enqueue(&self, message: QueuedMessage) -> crate::Result<()> {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                Err(message)
            } else {
                state.messages.push_back(message);
                Ok(Self::apply_signals(&mut state, Signals::NONE, Signals::CHANNEL_READABLE))
            }
        };
        match outcome {
            Ok(fired) => {
                self.changed.notify_all();
                fired.run();
                Ok(())
            }
            Err(message) => {
                drop(message);
                Err(Status::ERR_PEER_CLOSED)
            }
        }
    }

    /// Remove the message at `index`, clearing READABLE if the queue drains
    fn dequeue_at(state: &mut ObjectState, index: usize) -> Option<(QueuedMessage, Fired)> {
        let message = state.messages.remove(index)?;
        let fired = if state.messages.is_empty() {
            Self::apply_signals(state, Signals::CHANNEL_READABLE, Signals::NONE)
        } else {
            Fired::none()
        };
        Some((message, fired))
    }

    fn on_zero_handles(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.messages)
        };
        if !drained.is_empty() {
            tracing::trace!(koid = self.koid, count = drained.len(), "discarding unread messages");
        }
        drop(drained);

        if let Some(peer) = self.peer() {
            peer.update_signals(Signals::NONE, Signals::CHANNEL_PEER_CLOSED);
        }
    }
}

struct HandleEntry {
    object: Arc<KernelObject>,
    rights: Rights,
}

struct HandleTable {
    entries: Mutex<FxHashMap<RawHandle, HandleEntry>>,
    next: AtomicU32,
}

impl HandleTable {
    fn insert(&self, object: Arc<KernelObject>, rights: Rights) -> Handle {
        object.handle_count.fetch_add(1, Ordering::AcqRel);
        // Real handle values always have the low two bits set
        let raw = (self.next.fetch_add(1, Ordering::Relaxed) << 2) | 0b11;
        self.entries.lock().insert(raw, HandleEntry { object, rights });
        // SAFETY: `raw` was just allocated and is owned by nothing else
        unsafe { Handle::from_raw(raw) }
    }

    fn get(&self, raw: RawHandle) -> crate::Result<(Arc<KernelObject>, Rights)> {
        if raw == HANDLE_INVALID {
            return Err(Status::ERR_BAD_HANDLE);
        }
        self.entries
            .lock()
            .get(&raw)
            .map(|entry| (entry.object.clone(), entry.rights))
            .ok_or(Status::ERR_BAD_HANDLE)
    }

    fn contains(&self, raw: RawHandle) -> bool {
        self.entries.lock().contains_key(&raw)
    }

    fn remove(&self, raw: RawHandle) -> Option<HandleEntry> {
        self.entries.lock().remove(&raw)
    }
}

fn table() -> &'static HandleTable {
    static TABLE: OnceLock<HandleTable> = OnceLock::new();
    TABLE.get_or_init(|| HandleTable {
        entries: Mutex::new(FxHashMap::default()),
        next: AtomicU32::new(1),
    })
}

fn lookup(raw: RawHandle, object_type: ObjectType, required: Rights) -> crate::Result<Arc<KernelObject>> {
    let (object, rights) = table().get(raw)?;
    if object_type != ObjectType::None && object.object_type != object_type {
        return Err(Status::ERR_WRONG_TYPE);
    }
    if !rights.contains(required) {
        return Err(Status::ERR_ACCESS_DENIED);
    }
    Ok(object)
}

fn resolve_rights(current: Rights, requested: Rights) -> crate::Result<Rights> {
    if requested.contains(Rights::SAME_RIGHTS) {
        Ok(current)
    } else if current.contains(requested) {
        Ok(requested)
    } else {
        Err(Status::ERR_INVALID_ARGS)
    }
}

fn release(raw: RawHandle, entry: HandleEntry) {
    let HandleEntry { object, .. } = entry;

    // Observers registered through this handle die with it
    let canceled: Vec<WaitCallback> = {
        let mut state = object.state.lock();
        let (canceled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.waiters)
            .into_iter()
            .partition(|waiter| waiter.handle == raw);
        state.waiters = kept;
        canceled.into_iter().map(|w| w.callback).collect()
    };
    for callback in canceled {
        callback(Err(Status::ERR_CANCELED));
    }

    if object.handle_count.fetch_sub(1, Ordering::AcqRel) == 1 {
        object.on_zero_handles();
    }
}

pub(crate) fn handle_close(raw: RawHandle) {
    match table().remove(raw) {
        Some(entry) => release(raw, entry),
        None => tracing::warn!(raw, "close of unknown handle"),
    }
}

pub(crate) fn handle_duplicate(raw: RawHandle, rights: Rights) -> crate::Result<Handle> {
    let (object, current) = table().get(raw)?;
    if !current.contains(Rights::DUPLICATE) {
        return Err(Status::ERR_ACCESS_DENIED);
    }
    let rights = resolve_rights(current, rights)?;
    Ok(table().insert(object, rights))
}

pub(crate) fn handle_replace(raw: RawHandle, rights: Rights) -> crate::Result<Handle> {
    let entry = table().remove(raw).ok_or(Status::ERR_BAD_HANDLE)?;
    // The original handle is closed on both paths
    let result = resolve_rights(entry.rights, rights)
        .map(|rights| table().insert(entry.object.clone(), rights));
    release(raw, entry);
    result
}

fn create_peered(object_type: ObjectType, initial: Signals, rights: Rights) -> (Handle, Handle) {
    let a = KernelObject::new(object_type, initial);
    let b = KernelObject::new(object_type, initial);
    KernelObject::link(&a, &b);
    (table().insert(a, rights), table().insert(b, rights))
}

pub(crate) fn channel_create() -> crate::Result<(Handle, Handle)> {
    Ok(create_peered(
        ObjectType::Channel,
        Signals::CHANNEL_WRITABLE,
        Rights::CHANNEL_DEFAULT,
    ))
}

pub(crate) fn eventpair_create() -> crate::Result<(Handle, Handle)> {
    Ok(create_peered(
        ObjectType::EventPair,
        Signals::NONE,
        Rights::EVENTPAIR_DEFAULT,
    ))
}

pub(crate) fn channel_write(raw: RawHandle, bytes: &[u8], handles: &mut [Handle]) -> crate::Result<()> {
    // Handles leave the caller whatever the outcome; on failure they close here
    let handles: Vec<Handle> = handles.iter_mut().map(Handle::take).collect();

    let object = lookup(raw, ObjectType::Channel, Rights::WRITE)?;
    if bytes.len() > CHANNEL_MAX_MSG_BYTES || handles.len() > CHANNEL_MAX_MSG_HANDLES {
        return Err(Status::ERR_OUT_OF_RANGE);
    }
    for handle in &handles {
        if handle.raw_handle() == raw {
            return Err(Status::ERR_NOT_SUPPORTED);
        }
        let (_, rights) = table().get(handle.raw_handle())?;
        if !rights.is_transferable() {
            return Err(Status::ERR_ACCESS_DENIED);
        }
    }

    let peer = object.peer().ok_or(Status::ERR_PEER_CLOSED)?;
    peer.enqueue(QueuedMessage {
        bytes: bytes.to_vec(),
        handles,
    })
}

fn fill(buf: &mut MessageBuf, message: QueuedMessage) -> ChannelReadResult {
    buf.bytes = message.bytes;
    buf.handles = message.handles;
    ChannelReadResult {
        bytes: buf.bytes.len(),
        handles: buf.handles.len(),
    }
}

pub(crate) fn channel_read(raw: RawHandle, buf: &mut MessageBuf) -> crate::Result<ChannelReadResult> {
    let object = lookup(raw, ObjectType::Channel, Rights::READ)?;
    let (message, fired) = {
        let mut state = object.state.lock();
        match KernelObject::dequeue_at(&mut state, 0) {
            Some(dequeued) => dequeued,
            None if state.signals.contains(Signals::CHANNEL_PEER_CLOSED) => {
                return Err(Status::ERR_PEER_CLOSED)
            }
            None => return Err(Status::ERR_SHOULD_WAIT),
        }
    };
    fired.run();
    Ok(fill(buf, message))
}

pub(crate) fn channel_call(
    raw: RawHandle,
    deadline: Time,
    bytes: &[u8],
    handles: &mut [Handle],
    buf: &mut MessageBuf,
) -> crate::Result<ChannelReadResult> {
    let txid = match bytes.get(..4) {
        Some(prefix) => u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]),
        None => 0,
    };
    if txid == 0 {
        handles.iter_mut().for_each(|h| drop(h.take()));
        return Err(Status::ERR_INVALID_ARGS);
    }

    channel_write(raw, bytes, handles)?;

    let object = lookup(raw, ObjectType::Channel, Rights::READ)?;
    let deadline = deadline.to_std_instant();
    let mut state = object.state.lock();
    loop {
        if let Some(index) = state.messages.iter().position(|m| m.txid() == Some(txid)) {
            if let Some((message, fired)) = KernelObject::dequeue_at(&mut state, index) {
                drop(state);
                fired.run();
                return Ok(fill(buf, message));
            }
        }
        if state.signals.contains(Signals::CHANNEL_PEER_CLOSED) {
            return Err(Status::ERR_PEER_CLOSED);
        }
        match deadline {
            Some(deadline) => {
                if object.changed.wait_until(&mut state, deadline).timed_out() {
                    return Err(Status::ERR_TIMED_OUT);
                }
            }
            None => object.changed.wait(&mut state),
        }
    }
}

pub(crate) fn object_wait_one(raw: RawHandle, signals: Signals, deadline: Time) -> crate::Result<Signals> {
    let object = lookup(raw, ObjectType::None, Rights::WAIT)?;
    let deadline = deadline.to_std_instant();
    let mut state = object.state.lock();
    loop {
        if state.signals.intersects(signals) {
            return Ok(state.signals);
        }
        match deadline {
            Some(deadline) => {
                if object.changed.wait_until(&mut state, deadline).timed_out() {
                    return if state.signals.intersects(signals) {
                        Ok(state.signals)
                    } else {
                        Err(Status::ERR_TIMED_OUT)
                    };
                }
            }
            None => object.changed.wait(&mut state),
        }
    }
}

pub(crate) fn object_wait_async(
    raw: RawHandle,
    signals: Signals,
    key: u64,
    callback: WaitCallback,
) -> crate::Result<()> {
    let object = lookup(raw, ObjectType::None, Rights::WAIT)?;
    let mut state = object.state.lock();
    // Re-check under the state lock so a concurrent close cannot miss this waiter
    if !table().contains(raw) {
        return Err(Status::ERR_BAD_HANDLE);
    }
    let current = state.signals;
    if current.intersects(signals) {
        drop(state);
        callback(Ok(current));
    } else {
        state.waiters.push(Waiter {
            handle: raw,
            key,
            signals,
            callback,
        });
    }
    Ok(())
}

pub(crate) fn object_wait_cancel(raw: RawHandle, key: u64) -> crate::Result<()> {
    let (object, _) = table().get(raw)?;
    let removed = {
        let mut state = object.state.lock();
        let index = state
            .waiters
            .iter()
            .position(|w| w.handle == raw && w.key == key);
        index.map(|index| state.waiters.remove(index))
    };
    // The callback is dropped without running
    removed.map(drop).ok_or(Status::ERR_NOT_FOUND)
}

pub(crate) fn object_signal(raw: RawHandle, clear: Signals, set: Signals, peer: bool) -> crate::Result<()> {
    if !USER_SETTABLE.contains(clear | set) {
        return Err(Status::ERR_INVALID_ARGS);
    }
    let required = if peer { Rights::SIGNAL_PEER } else { Rights::SIGNAL };
    let object = lookup(raw, ObjectType::None, required)?;
    let target = if peer {
        object.peer().ok_or(Status::ERR_PEER_CLOSED)?
    } else {
        object
    };
    target.update_signals(clear, set);
    Ok(())
}

pub(crate) fn object_get_basic_info(raw: RawHandle) -> crate::Result<HandleBasicInfo> {
    let (object, rights) = table().get(raw)?;
    Ok(HandleBasicInfo {
        koid: object.koid,
        rights,
        object_type: object.object_type,
        related_koid: object.related_koid(),
    })
}

pub(crate) fn object_handle_count(raw: RawHandle) -> crate::Result<u32> {
    let (object, _) = table().get(raw)?;
    Ok(object.handle_count.load(Ordering::Acquire))
}
