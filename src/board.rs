//! A GPIB board: one attachment of the handshake engine to a set of pins.
//!
//! [`GpibBoard`] owns everything a bus participant needs: the line fabric, the edge
//! interrupt registrations, the status word, the current role and EOS setting. It is the
//! only way to run a transfer, and transfers take `&mut self`, so at most one is in flight
//! per board.
//!
//! Interrupt handlers registered at attach:
//!
//! | Line | Edge      | Effect                                      |
//! |------|-----------|---------------------------------------------|
//! | DAV  | assertion | fires the DAV gate (read, first byte)       |
//! | NRFD | release   | fires the listener-ready gate (write)       |
//! | NDAC | assertion | fires the listener-ready gate (write)       |
//! | SRQ  | assertion | sets `SRQI` and wakes service-request waits |
//!
//! All of them are freed when the board is dropped.

use std::future;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::sleep_until;
use tracing::{debug, info, warn};

use crate::commands::check_address;
use crate::config::BoardConfig;
use crate::engine::read::read_bytes;
use crate::engine::write::write_bytes;
use crate::engine::{Handshake, ReadOutcome};
use crate::eos::{EosConfig, EosWidth};
use crate::error::{GpibError, GpibResult, TransferError};
use crate::line::{BusLine, BusLines, Edge, IrqHandler, IrqRegistration, LineFabric, PinDriver};
use crate::status::{Role, StatusBits};
use crate::timeout::{TimeoutCode, TimeoutFlag};
use crate::wait::{BoardSignals, Canceller, EdgeGate};

/// An attached board.
pub struct GpibBoard {
    pub(crate) config: BoardConfig,
    pub(crate) fabric: LineFabric,
    pub(crate) signals: Arc<BoardSignals>,
    irqs: Vec<IrqRegistration>,
    pub(crate) role: Role,
    eos: EosConfig,
    primary_address: u8,
    secondary_address: Option<u8>,
    timeout: TimeoutCode,
    canceller: Canceller,
    /// The last read accepted a byte whose DAV may still be asserted.
    dav_pending: bool,
}

impl std::fmt::Debug for GpibBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpibBoard")
            .field("name", &self.config.name)
            .field("role", &self.role)
            .field("status", &self.signals.status.snapshot())
            .field("primary_address", &self.primary_address)
            .field("eos", &self.eos)
            .finish_non_exhaustive()
    }
}

impl GpibBoard {
    /// Attach a board to the pins behind `driver`.
    ///
    /// Fails with [`GpibError::IoUnavailable`] if any edge interrupt cannot be registered;
    /// interrupts registered before the failure are freed again.
    pub fn attach(config: BoardConfig, driver: Arc<dyn PinDriver>) -> GpibResult<Self> {
        config.validate()?;

        let fabric = LineFabric::new(driver, config.pins.clone());
        for line in BusLine::ALL {
            fabric.float(line);
        }
        fabric.init_transceivers(config.system_controller);
        if config.system_controller {
            fabric.drive(BusLine::Atn, false);
            fabric.drive(BusLine::Ifc, false);
            fabric.drive(BusLine::Ren, false);
        }

        let mut board = Self {
            eos: config.eos,
            primary_address: config.primary_address,
            secondary_address: config.secondary_address,
            timeout: config.timeout,
            config,
            fabric,
            signals: BoardSignals::new(),
            irqs: Vec::with_capacity(4),
            role: Role::Idle,
            canceller: Canceller::new(),
            dav_pending: false,
        };
        board.register_irqs()?;

        if board.fabric.get(BusLine::Srq) {
            board.signals.status.insert(StatusBits::SRQI);
        }

        info!(
            board = %board.config.name,
            system_controller = board.config.system_controller,
            pad = board.primary_address,
            "GPIB board attached"
        );
        Ok(board)
    }

    fn register_irqs(&mut self) -> GpibResult<()> {
        let pins = self.fabric.pins();
        let (dav, nrfd, ndac, srq) = (pins.dav, pins.nrfd, pins.ndac, pins.srq);
        let assertion = self.fabric.assertion_edge();
        let release = self.fabric.release_edge();

        let service_request: IrqHandler = {
            let signals = Arc::clone(&self.signals);
            Arc::new(move || {
                signals.status.insert(StatusBits::SRQI);
                signals.wake.notify_waiters();
            })
        };
        let handlers: [(u32, Edge, IrqHandler); 4] = [
            (dav, assertion, self.gate_handler(|s| &s.dav_gate)),
            (nrfd, release, self.gate_handler(|s| &s.ready_gate)),
            (ndac, assertion, self.gate_handler(|s| &s.ready_gate)),
            (srq, assertion, service_request),
        ];

        for (pin, edge, handler) in handlers {
            let registered = self.fabric.driver().request_edge_irq(pin, edge, handler);
            match registered {
                Ok(registration) => self.irqs.push(registration),
                Err(e) => {
                    warn!(board = %self.config.name, pin, ?edge, error = %e, "edge interrupt unavailable");
                    self.free_irqs();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn gate_handler(&self, gate: fn(&BoardSignals) -> &EdgeGate) -> IrqHandler {
        let signals = Arc::clone(&self.signals);
        Arc::new(move || signals.fire_gate(gate(&signals)))
    }

    fn free_irqs(&mut self) {
        for registration in self.irqs.drain(..) {
            self.fabric.driver().free_edge_irq(registration);
        }
    }

    /// Release every line and free the interrupts.
    pub fn detach(mut self) {
        for line in BusLine::ALL {
            self.fabric.float(line);
        }
        self.free_irqs();
        info!(board = %self.config.name, "GPIB board detached");
    }

    fn handshake(&self, deadline: Option<Instant>) -> Handshake<'_> {
        Handshake {
            fabric: &self.fabric,
            signals: &self.signals,
            cancel: self.canceller.token(),
            deadline,
        }
    }

    fn require_data_mode(&self, op: &str) -> Result<(), TransferError> {
        if self.signals.status.contains(StatusBits::ATN) {
            return Err(TransferError::at_start(GpibError::ProtocolPrecondition(
                format!("{op} while this board holds ATN"),
            )));
        }
        Ok(())
    }

    /// A cancel that came in after the suspending wait belongs to this transfer, not the next.
    fn discard_late_cancel(&self, op: &str) {
        if self.canceller.discard() {
            debug!(board = %self.config.name, op, "cancel arrived after the wait, dropped");
        }
    }

    pub(crate) fn record_failure(&self, op: &str, error: &TransferError) {
        if error.is_timeout() {
            self.signals.status.insert(StatusBits::TIMO);
        }
        warn!(
            board = %self.config.name,
            op,
            count = error.count,
            error = %error.source,
            "transfer failed"
        );
    }

    /// Read up to `buf.len()` bytes as listener.
    ///
    /// Returns when the buffer is full, or early when a byte carries EOI or matches the
    /// configured EOS terminator.
    pub async fn read(
        &mut self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<ReadOutcome, TransferError> {
        self.require_data_mode("read")?;
        self.role = Role::Listener;
        self.signals.status.remove(StatusBits::TACS);
        self.signals.status.insert(StatusBits::LACS);
        self.signals.timeout.clear();

        let eos = self.eos;
        let mut dav_pending = self.dav_pending;
        debug!(board = %self.config.name, len = buf.len(), ?eos, "read");
        let result = {
            let mut hs = self.handshake(deadline);
            read_bytes(&mut hs, buf, &eos, &mut dav_pending).await
        };
        self.dav_pending = dav_pending;
        self.discard_late_cancel("read");

        match &result {
            Ok(outcome) => {
                if outcome.end {
                    self.signals.status.insert(StatusBits::END);
                }
                debug!(board = %self.config.name, count = outcome.count, end = outcome.end, "read complete");
            }
            Err(e) => self.record_failure("read", e),
        }
        result
    }

    /// Write `data` as talker, asserting EOI with the last byte when `send_eoi` is set.
    pub async fn write(
        &mut self,
        data: &[u8],
        send_eoi: bool,
        deadline: Option<Instant>,
    ) -> Result<usize, TransferError> {
        self.require_data_mode("write")?;
        self.role = Role::Talker;
        self.signals.status.remove(StatusBits::LACS);
        self.signals.status.insert(StatusBits::TACS);
        self.transfer_out("write", data, send_eoi, deadline).await
    }

    /// Source handshake shared by data writes and command bytes.
    pub(crate) async fn transfer_out(
        &mut self,
        op: &str,
        data: &[u8],
        send_eoi: bool,
        deadline: Option<Instant>,
    ) -> Result<usize, TransferError> {
        self.signals.timeout.clear();
        debug!(board = %self.config.name, op, len = data.len(), send_eoi, "write");
        let t1_delay = self.config.timing.t1_delay();
        let result = {
            let mut hs = self.handshake(deadline);
            write_bytes(&mut hs, data, send_eoi, t1_delay).await
        };
        self.discard_late_cancel(op);
        match &result {
            Ok(count) => debug!(board = %self.config.name, op, count, "write complete"),
            Err(e) => self.record_failure(op, e),
        }
        result
    }

    /// Wait until a device requests service (`SRQI` set) or the deadline passes.
    ///
    /// `SRQI` stays set; clear it through [`GpibBoard::query_status`].
    pub async fn wait_for_service_request(&self, deadline: Option<Instant>) -> GpibResult<()> {
        let expiry = async {
            match deadline {
                Some(deadline) => sleep_until(deadline.into()).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            let notified = self.signals.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.signals.status.contains(StatusBits::SRQI) {
                return Ok(());
            }
            tokio::select! {
                () = notified.as_mut() => {}
                () = expiry.as_mut() => return Err(GpibError::Timeout),
            }
        }
    }

    /// Set the EOS terminator used by subsequent reads.
    pub fn configure_eos(&mut self, terminator: u8, enabled: bool, width: EosWidth) {
        self.eos = EosConfig::new(terminator, enabled, width);
        debug!(board = %self.config.name, eos = ?self.eos, "EOS configured");
    }

    /// EOS settings used by reads.
    pub fn eos(&self) -> EosConfig {
        self.eos
    }

    /// Report the status word, then clear the bits in `clear_mask`.
    pub fn query_status(&self, clear_mask: StatusBits) -> StatusBits {
        self.signals.status.take(clear_mask)
    }

    /// Change this board's own bus address.
    pub fn set_address(&mut self, primary: u8, secondary: Option<u8>) -> GpibResult<()> {
        check_address("primary", primary)?;
        if let Some(sad) = secondary {
            check_address("secondary", sad)?;
        }
        self.primary_address = primary;
        self.secondary_address = secondary;
        debug!(board = %self.config.name, primary, ?secondary, "address set");
        Ok(())
    }

    /// This board's primary address.
    pub fn primary_address(&self) -> u8 {
        self.primary_address
    }

    /// This board's secondary address, if any.
    pub fn secondary_address(&self) -> Option<u8> {
        self.secondary_address
    }

    /// Timeout used by [`GpibBoard::deadline`] and the controller operations.
    pub fn set_timeout(&mut self, timeout: TimeoutCode) {
        self.timeout = timeout;
    }

    /// Current timeout code.
    pub fn timeout(&self) -> TimeoutCode {
        self.timeout
    }

    /// Deadline for a transfer starting now under the configured timeout.
    pub fn deadline(&self) -> Option<Instant> {
        self.timeout.deadline_from(Instant::now())
    }

    /// Handle for raising this board's timeout flag from elsewhere.
    pub fn timeout_flag(&self) -> TimeoutFlag {
        self.signals.timeout.clone()
    }

    /// Handle for cancelling this board's suspended waits from elsewhere.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Current logical state of the control lines.
    pub fn line_status(&self) -> BusLines {
        self.fabric.line_status()
    }

    /// Role taken by the last operation.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Board name from the configuration.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the board was attached with.
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Line access, for diagnostics.
    pub fn fabric(&self) -> &LineFabric {
        &self.fabric
    }
}

impl Drop for GpibBoard {
    fn drop(&mut self) {
        self.free_irqs();
    }
}
