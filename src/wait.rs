//! Handshake waits.
//!
//! A transfer waits for its peer in two distinct ways:
//!
//! 1. **First edge** ([`wait_for_edge`]): the peer may take arbitrarily long to become
//!    ready, so the task suspends until an edge interrupt fires, the deadline passes, the
//!    shared [`TimeoutFlag`] is raised or a cancel request arrives.
//! 2. **Per-byte edges** ([`spin_until`]): once bytes are flowing, each edge follows the
//!    previous one faster than interrupt dispatch, so the task busy-polls the line and
//!    re-checks the timeout on every iteration. It never yields.
//!
//! # Edge gates
//!
//! The DAV and listener-ready (NRFD release, NDAC assertion) interrupt handlers stay
//! registered for the life of the board but only act while their [`EdgeGate`] is armed.
//! The gate moves `Armed -> Fired` with a single compare-and-swap, performed either by the
//! interrupt handler or by the waiter itself when it finds the line already in the wanted
//! state right after arming. Whoever wins the swap is the one that reports the edge, so an
//! edge between arming and waiting is never lost and never reported twice.

use std::future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tokio::time::sleep_until;

use crate::error::GpibError;
use crate::status::StatusRegister;
use crate::timeout::TimeoutFlag;

const DISARMED: u8 = 0;
const ARMED: u8 = 1;
const FIRED: u8 = 2;

/// Single-shot gate between an edge interrupt and one waiter.
#[derive(Debug, Default)]
pub struct EdgeGate {
    state: AtomicU8,
}

impl EdgeGate {
    /// A disarmed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect one edge.
    pub fn arm(&self) {
        self.state.store(ARMED, Ordering::Release);
    }

    /// Consume the armed gate. Returns true for exactly one caller per arming.
    pub fn fire(&self) -> bool {
        self.state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the edge was reported since the last arming.
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Stop expecting an edge.
    pub fn disarm(&self) {
        self.state.store(DISARMED, Ordering::Release);
    }

    /// Whether the gate is waiting for its edge.
    pub fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }
}

/// State shared between a board and its interrupt handlers.
#[derive(Debug, Default)]
pub struct BoardSignals {
    /// Woken by every handler that changes something a waiter may care about.
    pub wake: Notify,
    /// Fired by DAV assertion.
    pub dav_gate: EdgeGate,
    /// Fired by NRFD release and NDAC assertion.
    pub ready_gate: EdgeGate,
    /// The board's status word.
    pub status: StatusRegister,
    /// Shared timeout flag of the board.
    pub timeout: TimeoutFlag,
}

impl BoardSignals {
    /// Fresh signals, shared with the handlers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Interrupt-side half of a gate: fire it if armed and wake the waiter.
    pub fn fire_gate(&self, gate: &EdgeGate) {
        if gate.fire() {
            self.wake.notify_waiters();
        }
    }
}

/// Cloneable handle that interrupts a board's suspended wait.
///
/// A request stays pending until a first-edge wait observes it, so a cancel issued between
/// transfers interrupts the next one. A request that arrives while a transfer is busy-polling
/// is dropped when that transfer ends.
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

impl Canceller {
    /// A handle with no request pending.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Interrupt the board's current, or next, first-edge wait.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a request is waiting to be observed.
    pub fn is_pending(&self) -> bool {
        *self.tx.borrow()
    }

    /// Drop a pending request. Returns whether there was one.
    pub(crate) fn discard(&self) -> bool {
        self.tx.send_replace(false)
    }

    pub(crate) fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
            tx: Arc::clone(&self.tx),
        }
    }
}

/// Waiter side of a [`Canceller`].
#[derive(Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Resolves when a cancel is requested and consumes the request.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            future::pending::<()>().await;
        }
        self.tx.send_replace(false);
    }
}

/// How a first-edge wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The edge arrived.
    Woken,
    /// Deadline or timeout flag.
    TimedOut,
    /// A cancel request.
    Cancelled,
}

impl WaitOutcome {
    /// `Woken` is success, the rest map to their errors.
    pub fn into_result(self) -> Result<(), GpibError> {
        match self {
            Self::Woken => Ok(()),
            Self::TimedOut => Err(GpibError::Timeout),
            Self::Cancelled => Err(GpibError::Cancelled),
        }
    }
}

/// Suspend until `gate` fires.
///
/// `ready` reports whether the line is already in the wanted state and is checked once,
/// right after arming, to catch an edge that happened before the wait started. SRQ and
/// other wake-ups that do not fire the gate just cause another check.
pub async fn wait_for_edge(
    signals: &BoardSignals,
    gate: &EdgeGate,
    ready: impl Fn() -> bool,
    deadline: Option<Instant>,
    cancel: &mut CancelToken,
) -> WaitOutcome {
    gate.arm();
    if ready() {
        gate.fire();
    }

    let expiry = async {
        match deadline {
            Some(deadline) => sleep_until(deadline.into()).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(expiry);

    let outcome = loop {
        let notified = signals.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if gate.has_fired() {
            break WaitOutcome::Woken;
        }
        if signals.timeout.is_raised() {
            break WaitOutcome::TimedOut;
        }

        tokio::select! {
            () = notified.as_mut() => {}
            () = signals.timeout.raised() => {}
            () = expiry.as_mut() => {
                signals.timeout.raise();
                break WaitOutcome::TimedOut;
            }
            () = cancel.cancelled() => break WaitOutcome::Cancelled,
        }
    };

    gate.disarm();
    outcome
}

/// Busy-poll until `ready` holds, the deadline passes or the timeout flag is raised.
pub fn spin_until(
    mut ready: impl FnMut() -> bool,
    deadline: Option<Instant>,
    timeout: &TimeoutFlag,
) -> Result<(), GpibError> {
    loop {
        if ready() {
            return Ok(());
        }
        if timeout.is_raised() {
            return Err(GpibError::Timeout);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            timeout.raise();
            return Err(GpibError::Timeout);
        }
        std::hint::spin_loop();
    }
}

/// Spin for `duration`. Used for settle times too short to sleep through.
pub fn busy_delay(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}
