//! Blinc Fuchsia Async - Dispatcher Run Loop
//!
//! This crate provides the dispatcher that FIDL bindings run on: a task
//! queue, a table of async signal waits, and a pool of worker threads.
//!
//! # Architecture
//!
//! On Fuchsia, async I/O works via:
//! - **Async Wait**: Register a handle + signals with the dispatcher
//! - **Packets**: The dispatcher queues a [`WaitPacket`] when signals are raised
//! - **Handlers**: A worker pops the packet and runs the wait's handler
//!
//! Waits are one-shot. A handler that wants more events re-arms itself.
//!
//! # Example
//!
//! ```ignore
//! use blinc_fuchsia_async::{Loop, LoopConfig};
//! use blinc_fuchsia_zircon::Signals;
//!
//! let lp = Loop::new(LoopConfig::single_threaded())?;
//! lp.dispatcher().begin_wait(&channel, Signals::CHANNEL_READABLE, |_, packet| {
//!     // read from the channel
//! })?;
//! ```

mod config;
mod executor;
mod waker;

pub use config::LoopConfig;
pub use executor::{Dispatcher, Loop, WaitHandler};
pub use waker::{WaitPacket, WakeToken};

/// Common imports
pub mod prelude {
    pub use super::{Dispatcher, Loop, LoopConfig, WaitPacket, WakeToken};
}
