//! Transfer timeouts.
//!
//! Two pieces live here:
//!
//! - [`TimeoutCode`]: the classic GPIB timeout table (10 µs to 1000 s, or never), used to
//!   turn a configured timeout into a transfer deadline.
//! - [`TimeoutFlag`]: the shared flag every handshake wait polls. It is cleared when a
//!   transfer starts and raised either by the engine itself when the deadline passes or by
//!   any external watchdog holding a clone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Standard GPIB timeout values. Each variant name is its duration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeoutCode {
    /// Wait indefinitely.
    Never,
    T10us,
    T30us,
    T100us,
    T300us,
    T1ms,
    T3ms,
    T10ms,
    T30ms,
    T100ms,
    T300ms,
    T1s,
    #[default]
    T3s,
    T10s,
    T30s,
    T100s,
    T300s,
    T1000s,
}

impl TimeoutCode {
    /// Every code in ascending order, `Never` first.
    pub const ALL: [TimeoutCode; 18] = [
        Self::Never,
        Self::T10us,
        Self::T30us,
        Self::T100us,
        Self::T300us,
        Self::T1ms,
        Self::T3ms,
        Self::T10ms,
        Self::T30ms,
        Self::T100ms,
        Self::T300ms,
        Self::T1s,
        Self::T3s,
        Self::T10s,
        Self::T30s,
        Self::T100s,
        Self::T300s,
        Self::T1000s,
    ];

    /// The timeout as a duration, `None` for [`TimeoutCode::Never`].
    pub fn duration(self) -> Option<Duration> {
        let micros: u64 = match self {
            Self::Never => return None,
            Self::T10us => 10,
            Self::T30us => 30,
            Self::T100us => 100,
            Self::T300us => 300,
            Self::T1ms => 1_000,
            Self::T3ms => 3_000,
            Self::T10ms => 10_000,
            Self::T30ms => 30_000,
            Self::T100ms => 100_000,
            Self::T300ms => 300_000,
            Self::T1s => 1_000_000,
            Self::T3s => 3_000_000,
            Self::T10s => 10_000_000,
            Self::T30s => 30_000_000,
            Self::T100s => 100_000_000,
            Self::T300s => 300_000_000,
            Self::T1000s => 1_000_000_000,
        };
        Some(Duration::from_micros(micros))
    }

    /// Deadline for a transfer starting at `start`.
    pub fn deadline_from(self, start: Instant) -> Option<Instant> {
        self.duration().and_then(|d| start.checked_add(d))
    }

    /// Smallest code that is at least `duration` long. Anything beyond 1000 s maps to `Never`.
    pub fn at_least(duration: Duration) -> Self {
        Self::ALL
            .iter()
            .skip(1)
            .copied()
            .find(|code| code.duration().is_some_and(|d| d >= duration))
            .unwrap_or(Self::Never)
    }
}

#[derive(Debug, Default)]
struct FlagInner {
    raised: AtomicBool,
    notify: Notify,
}

/// Shared timeout flag polled by every handshake wait.
///
/// Clones share the same flag. Raising it wakes a suspended first-byte wait; busy-polled
/// waits notice it on their next iteration.
#[derive(Debug, Clone, Default)]
pub struct TimeoutFlag {
    inner: Arc<FlagInner>,
}

impl TimeoutFlag {
    /// A lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake a suspended wait.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Lower the flag.
    pub fn clear(&self) {
        self.inner.raised.store(false, Ordering::Release);
    }

    /// Whether the flag is up.
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Resolves once the flag is raised.
    pub async fn raised(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}
