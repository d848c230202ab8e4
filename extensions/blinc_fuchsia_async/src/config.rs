//! Run loop configuration presets.

use serde::{Deserialize, Serialize};

/// Configuration for a dispatcher run loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Number of worker threads draining the task queue.
    ///
    /// Zero means the loop only runs when its owner calls
    /// `run_until_idle` or `run_one`.
    pub thread_count: usize,
    /// Name given to worker threads (suffixed with the worker index).
    pub thread_name: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::single_threaded()
    }
}

impl LoopConfig {
    /// One worker thread; handlers never run concurrently.
    pub fn single_threaded() -> Self {
        Self {
            thread_count: 1,
            thread_name: "blinc-loop".to_string(),
        }
    }

    /// `threads` workers; handlers for different waits may run in parallel.
    pub fn multi_threaded(threads: usize) -> Self {
        Self {
            thread_count: threads.max(1),
            thread_name: "blinc-loop".to_string(),
        }
    }

    /// No workers; tasks run only when the owner drives the loop.
    ///
    /// Useful in tests that need deterministic interleaving.
    pub fn manual() -> Self {
        Self {
            thread_count: 0,
            thread_name: "blinc-loop".to_string(),
        }
    }

    /// Set the worker thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Parse a loop section from TOML; missing keys keep their defaults.
    pub fn from_toml(source: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(source)
    }
}
