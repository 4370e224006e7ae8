//! ResourceToken - admission-control handle attached to every accepted row
//!
//! The token is a move-only value. Releasing consumes it, and a token that is
//! dropped without an explicit release is released on drop, so the release
//! callback runs exactly once on every path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type ReleaseFn = Box<dyn FnOnce(u64) + Send + Sync + 'static>;

/// Quota reserved upstream for one change event.
pub struct ResourceToken {
    bytes: u64,
    on_release: Option<ReleaseFn>,
}

impl ResourceToken {
    /// Create a token that invokes `on_release` with its size once released.
    pub fn new(bytes: u64, on_release: impl FnOnce(u64) + Send + Sync + 'static) -> Self {
        Self {
            bytes,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Create a token that is not accounted anywhere.
    pub fn untracked(bytes: u64) -> Self {
        Self {
            bytes,
            on_release: None,
        }
    }

    /// Reserved size in bytes
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Give the reserved quota back.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(on_release) = self.on_release.take() {
            on_release(self.bytes);
        }
    }
}

impl Drop for ResourceToken {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for ResourceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceToken")
            .field("bytes", &self.bytes)
            .field("tracked", &self.on_release.is_some())
            .finish()
    }
}

/// Upstream memory accountant handing out [`ResourceToken`]s.
///
/// Counts every acquisition and release so the driver (and tests) can check
/// that each accepted event gave its quota back exactly once.
#[derive(Debug, Default)]
pub struct MemoryMonitor {
    acquired: AtomicU64,
    released: AtomicU64,
    in_flight_bytes: AtomicU64,
}

impl MemoryMonitor {
    /// Create a new shared monitor
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reserve `bytes` and return the token that gives them back.
    pub fn acquire(self: &Arc<Self>, bytes: u64) -> ResourceToken {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.in_flight_bytes.fetch_add(bytes, Ordering::Relaxed);

        let monitor = Arc::clone(self);
        ResourceToken::new(bytes, move |bytes| {
            monitor.in_flight_bytes.fetch_sub(bytes, Ordering::Relaxed);
            monitor.released.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Tokens handed out so far
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Tokens released so far
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Tokens acquired but not yet released
    pub fn outstanding(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }

    /// Bytes currently reserved
    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight_bytes.load(Ordering::Relaxed)
    }
}
