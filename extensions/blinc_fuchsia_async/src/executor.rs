//! Dispatcher run loop
//!
//! A [`Loop`] owns a task queue and a table of pending async waits, plus the
//! worker threads draining the queue. [`Dispatcher`] is the cloneable handle
//! code uses to post work onto it.
//!
//! A wait is armed with [`Dispatcher::begin_wait`]. When the kernel observer
//! fires, the wait moves from the table to the back of the task queue and its
//! handler later runs on a worker. A wait still in the table can be withdrawn
//! with [`Dispatcher::cancel_wait`]; once queued it can no longer be cancelled
//! and the handler is guaranteed to run.
//!
//! Shutting the loop down runs every handler that has not run yet with
//! `ERR_CANCELED`, on the thread calling shutdown.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use blinc_fuchsia_zircon::{AsHandleRef, Signals, Status, Time};
use parking_lot::{Condvar, Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::{LoopConfig, WaitPacket, WakeToken};

/// Handler invoked once when an async wait completes
pub type WaitHandler = Box<dyn FnOnce(&Dispatcher, WaitPacket) + Send>;

type Task = Box<dyn FnOnce() + Send>;

enum Work {
    Task(Task),
    Wait(WaitHandler, WaitPacket),
}

struct State {
    queue: VecDeque<Work>,
    waits: FxHashMap<WakeToken, WaitHandler>,
    shutdown: bool,
}

struct Shared {
    name: String,
    state: Mutex<State>,
    work_ready: Condvar,
}

/// Handle to a run loop's task queue
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Dispatcher")
            .field("name", &self.shared.name)
            .field("queued", &state.queue.len())
            .field("waits", &state.waits.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl Dispatcher {
    fn new(name: String) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    waits: FxHashMap::default(),
                    shutdown: false,
                }),
                work_ready: Condvar::new(),
            }),
        }
    }

    /// Name of the owning loop
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue a closure to run on the loop
    ///
    /// Fails with `ERR_BAD_STATE` once the loop has shut down.
    pub fn post_task<F>(&self, task: F) -> Result<(), Status>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Work::Task(Box::new(task)))
    }

    /// Arm a one-shot wait for any of `signals` on `handle`
    ///
    /// `handler` runs exactly once on the loop: with the observed signals, or
    /// with `ERR_CANCELED` if the handle closes or the loop shuts down first.
    /// It does not run if the wait is withdrawn with [`cancel_wait`] or if
    /// arming fails.
    ///
    /// [`cancel_wait`]: Dispatcher::cancel_wait
    pub fn begin_wait<H, F>(
        &self,
        handle: &H,
        signals: Signals,
        handler: F,
    ) -> Result<WakeToken, Status>
    where
        H: AsHandleRef + ?Sized,
        F: FnOnce(&Dispatcher, WaitPacket) + Send + 'static,
    {
        let key = WakeToken::new();
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return Err(Status::ERR_BAD_STATE);
            }
            state.waits.insert(key, Box::new(handler));
        }

        // The observer may fire before wait_async returns, so the table entry
        // must already exist and no lock may be held here.
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let armed = handle.wait_async(
            signals,
            key.raw(),
            Box::new(move |result| {
                if let Some(shared) = weak.upgrade() {
                    Dispatcher { shared }.complete_wait(key, result);
                }
            }),
        );

        if let Err(status) = armed {
            self.shared.state.lock().waits.remove(&key);
            return Err(status);
        }
        trace!(loop_name = %self.shared.name, key = key.raw(), ?signals, "wait armed");
        Ok(key)
    }

    /// Withdraw a pending wait
    ///
    /// Returns `ERR_NOT_FOUND` if the wait already fired (its handler is
    /// queued or has run) or was cancelled before.
    pub fn cancel_wait(&self, key: WakeToken) -> Result<(), Status> {
        let handler = self.shared.state.lock().waits.remove(&key);
        match handler {
            Some(handler) => {
                // The kernel observer stays registered until it fires or the
                // handle closes; completing an unknown key is a no-op.
                drop(handler);
                trace!(loop_name = %self.shared.name, key = key.raw(), "wait cancelled");
                Ok(())
            }
            None => Err(Status::ERR_NOT_FOUND),
        }
    }

    /// Whether the loop has shut down
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Number of armed waits that have not fired
    pub fn pending_waits(&self) -> usize {
        self.shared.state.lock().waits.len()
    }

    /// Stop accepting work and cancel everything outstanding
    ///
    /// Queued wait handlers and still-armed waits run with `ERR_CANCELED`
    /// on the calling thread; queued plain tasks are dropped. Idempotent.
    pub fn shutdown(&self) {
        let (queue, waits) = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            (
                std::mem::take(&mut state.queue),
                std::mem::take(&mut state.waits),
            )
        };
        self.shared.work_ready.notify_all();
        debug!(
            loop_name = %self.shared.name,
            queued = queue.len(),
            waits = waits.len(),
            "dispatcher shutting down"
        );

        for work in queue {
            if let Work::Wait(handler, packet) = work {
                handler(self, WaitPacket::canceled(packet.key));
            }
        }
        for (key, handler) in waits {
            handler(self, WaitPacket::canceled(key));
        }
    }

    fn enqueue(&self, work: Work) -> Result<(), Status> {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return Err(Status::ERR_BAD_STATE);
            }
            state.queue.push_back(work);
        }
        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Kernel observer fired: move the wait from the table to the queue
    fn complete_wait(&self, key: WakeToken, result: Result<Signals, Status>) {
        let packet = match result {
            Ok(observed) => WaitPacket::signaled(key, observed),
            Err(status) => WaitPacket {
                key,
                status,
                observed: Signals::NONE,
            },
        };
        {
            let mut state = self.shared.state.lock();
            let Some(handler) = state.waits.remove(&key) else {
                return;
            };
            state.queue.push_back(Work::Wait(handler, packet));
        }
        trace!(loop_name = %self.shared.name, key = key.raw(), status = ?packet.status, "wait fired");
        self.shared.work_ready.notify_one();
    }

    fn try_next(&self) -> Option<Work> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return None;
        }
        state.queue.pop_front()
    }

    /// Block until work is available, the deadline passes, or shutdown
    fn next_before(&self, deadline: Time) -> Option<Work> {
        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(work) = state.queue.pop_front() {
                return Some(work);
            }
            if !self.wait_for_work(&mut state, deadline) {
                return None;
            }
        }
    }

    fn wait_for_work(&self, state: &mut MutexGuard<'_, State>, deadline: Time) -> bool {
        if deadline == Time::INFINITE {
            self.shared.work_ready.wait(state);
            return true;
        }
        let remaining = (deadline - Time::get_monotonic()).into_nanos();
        if remaining <= 0 {
            return false;
        }
        let timeout = std::time::Duration::from_nanos(remaining as u64);
        !self.shared.work_ready.wait_for(state, timeout).timed_out()
    }

    fn run(&self, work: Work) {
        match work {
            Work::Task(task) => task(),
            Work::Wait(handler, packet) => handler(self, packet),
        }
    }
}

/// A dispatcher run loop and its worker threads
///
/// Dropping the loop shuts it down and joins the workers.
pub struct Loop {
    dispatcher: Dispatcher,
    workers: Vec<JoinHandle<()>>,
    config: LoopConfig,
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("dispatcher", &self.dispatcher)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl Loop {
    /// Create a loop and start its worker threads
    pub fn new(config: LoopConfig) -> Result<Self, Status> {
        let dispatcher = Dispatcher::new(config.thread_name.clone());
        let mut this = Self {
            dispatcher,
            workers: Vec::with_capacity(config.thread_count),
            config,
        };

        for index in 0..this.config.thread_count {
            let dispatcher = this.dispatcher.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", this.config.thread_name, index))
                .spawn(move || worker(dispatcher));
            match spawned {
                Ok(handle) => this.workers.push(handle),
                Err(e) => {
                    warn!(error = %e, "failed to spawn loop worker");
                    this.shutdown();
                    return Err(Status::ERR_NO_RESOURCES);
                }
            }
        }

        debug!(
            loop_name = %this.config.thread_name,
            threads = this.config.thread_count,
            "loop started"
        );
        Ok(this)
    }

    /// Loop with no workers, driven by `run_until_idle`
    pub fn manual() -> Self {
        Self {
            dispatcher: Dispatcher::new(LoopConfig::manual().thread_name),
            workers: Vec::new(),
            config: LoopConfig::manual(),
        }
    }

    /// Handle for posting work onto this loop
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Configuration the loop was started with
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run queued work on the calling thread until the queue is empty
    ///
    /// Work queued by the handlers themselves also runs. Returns the number
    /// of items run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while let Some(work) = self.dispatcher.try_next() {
            self.dispatcher.run(work);
            ran += 1;
        }
        ran
    }

    /// Run a single item, blocking until one is queued or `deadline` passes
    ///
    /// Returns `ERR_TIMED_OUT` when the deadline passes first and
    /// `ERR_BAD_STATE` after shutdown.
    pub fn run_one(&self, deadline: Time) -> Result<(), Status> {
        match self.dispatcher.next_before(deadline) {
            Some(work) => {
                self.dispatcher.run(work);
                Ok(())
            }
            None if self.dispatcher.is_shutdown() => Err(Status::ERR_BAD_STATE),
            None => Err(Status::ERR_TIMED_OUT),
        }
    }

    /// Shut down the dispatcher and join the workers
    pub fn shutdown(&mut self) {
        self.dispatcher.shutdown();
        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(loop_name = %self.config.thread_name, "loop worker panicked");
            }
        }
    }
}

impl Drop for Loop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker(dispatcher: Dispatcher) {
    trace!(loop_name = %dispatcher.name(), "worker started");
    while let Some(work) = dispatcher.next_before(Time::INFINITE) {
        dispatcher.run(work);
    }
    trace!(loop_name = %dispatcher.name(), "worker exiting");
}
