use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out disjoint nonce ranges from `[start, end)` to competing workers.
#[derive(Debug)]
pub struct NonceSource {
    next: AtomicU64,
    end: u64,
}

impl NonceSource {
    pub const fn new(start: u64, end: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            end,
        }
    }

    /// Reserve the next single nonce, if any remain.
    #[inline]
    pub fn fetch(&self) -> Option<u64> {
        self.fetch_range(1).map(|r| r.start)
    }

    /// Reserve up to `len` consecutive nonces.
    pub fn fetch_range(&self, len: u64) -> Option<Range<u64>> {
        let start = self.next.fetch_add(len, Ordering::Relaxed);
        if start >= self.end {
            return None;
        }
        Some(start..start.saturating_add(len).min(self.end))
    }
}

#[derive(Debug)]
pub struct StopFlag {
    stop: AtomicBool,
}

impl StopFlag {
    pub const fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn force_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation shared between a caller and a running search.
///
/// Workers poll it between batches and rounds; a cancelled search returns no
/// proof.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<StopFlag>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.force_stop();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.should_stop()
    }
}
