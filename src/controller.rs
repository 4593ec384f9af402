//! Controller-in-charge operations.
//!
//! Command bytes go out through the same source handshake as data, but with ATN held
//! asserted by this board. The composite operations ([`GpibBoard::serial_poll`],
//! [`GpibBoard::device_clear`]) are plain sequences of these primitives: nothing is retried
//! and the first failure is returned as is, with ATN in whatever state it had reached.

use tracing::{debug, info};

use crate::board::GpibBoard;
use crate::commands::{listen_address, talk_address, SDC, SPD, SPE, UNL, UNT};
use crate::error::{GpibError, GpibResult, TransferError};
use crate::line::BusLine;
use crate::status::{Role, StatusBits};
use crate::wait::busy_delay;

impl GpibBoard {
    fn require_system_controller(&self, op: &str) -> GpibResult<()> {
        if !self.config.system_controller {
            return Err(GpibError::ProtocolPrecondition(format!(
                "{op} requires the system controller"
            )));
        }
        Ok(())
    }

    /// Assert ATN and become controller-active.
    pub fn take_control(&mut self) -> GpibResult<()> {
        if !self.config.system_controller && !self.signals.status.contains(StatusBits::CIC) {
            return Err(GpibError::ProtocolPrecondition(
                "take_control without being controller in charge".to_string(),
            ));
        }
        self.fabric.drive(BusLine::Atn, true);
        self.role = Role::ControllerActive;
        self.signals
            .status
            .remove(StatusBits::TACS | StatusBits::LACS);
        self.signals.status.insert(StatusBits::CIC | StatusBits::ATN);
        debug!(board = %self.config.name, "ATN asserted");
        Ok(())
    }

    /// Release ATN (controller standby). The board stays controller in charge.
    pub fn release_control(&mut self) {
        self.fabric.set(BusLine::Atn, false);
        self.signals.status.remove(StatusBits::ATN);
        if self.role == Role::ControllerActive {
            self.role = Role::Idle;
        }
        debug!(board = %self.config.name, "ATN released");
    }

    /// Pulse IFC, returning every device on the bus to its idle state.
    ///
    /// Whatever transfer a device was in is abandoned. This board releases its own
    /// handshake lines and becomes controller in charge.
    pub fn interface_clear(&mut self) -> GpibResult<()> {
        self.require_system_controller("interface_clear")?;

        for line in [BusLine::Dav, BusLine::Nrfd, BusLine::Ndac, BusLine::Eoi] {
            self.fabric.float(line);
        }
        for bit in 0..8u8 {
            self.fabric.float(BusLine::Data(bit));
        }

        self.fabric.drive(BusLine::Ifc, true);
        busy_delay(self.config.timing.ifc_pulse());
        self.fabric.set(BusLine::Ifc, false);

        self.role = Role::Idle;
        self.signals
            .status
            .remove(StatusBits::TACS | StatusBits::LACS);
        self.signals.status.insert(StatusBits::CIC);
        info!(board = %self.config.name, "interface clear");
        Ok(())
    }

    /// Assert or release REN.
    pub fn set_remote_enable(&mut self, enable: bool) -> GpibResult<()> {
        self.require_system_controller("set_remote_enable")?;
        self.fabric.drive(BusLine::Ren, enable);
        self.signals.status.set(StatusBits::REM, enable);
        debug!(board = %self.config.name, enable, "REN");
        Ok(())
    }

    /// Send command bytes under ATN. EOI is never asserted.
    ///
    /// Uses the board's configured timeout.
    pub async fn send_command(&mut self, bytes: &[u8]) -> Result<usize, TransferError> {
        if !self.signals.status.contains(StatusBits::ATN) {
            return Err(TransferError::at_start(GpibError::ProtocolPrecondition(
                "send_command without ATN asserted".to_string(),
            )));
        }
        let deadline = self.deadline();
        self.transfer_out("command", bytes, false, deadline).await
    }

    /// Serial poll device `pad` and return its status byte.
    ///
    /// Sequence: UNL, own listen address, SPE, device talk address; then standby, read one
    /// byte, take control again and send SPD, UNT.
    pub async fn serial_poll(&mut self, pad: u8) -> Result<u8, TransferError> {
        let own = listen_address(self.primary_address()).map_err(TransferError::at_start)?;
        let device = talk_address(pad).map_err(TransferError::at_start)?;

        self.take_control().map_err(TransferError::at_start)?;
        self.send_command(&[UNL, own, SPE, device]).await?;
        self.release_control();

        let mut status = [0u8; 1];
        let deadline = self.deadline();
        self.read(&mut status, deadline).await?;

        self.take_control().map_err(TransferError::at_start)?;
        self.send_command(&[SPD, UNT]).await?;
        debug!(board = %self.config.name, pad, status = format_args!("{:#04x}", status[0]), "serial poll");
        Ok(status[0])
    }

    /// Selected Device Clear of device `pad`: UNL, device listen address, SDC, UNL.
    pub async fn device_clear(&mut self, pad: u8) -> Result<(), TransferError> {
        let device = listen_address(pad).map_err(TransferError::at_start)?;
        self.take_control().map_err(TransferError::at_start)?;
        self.send_command(&[UNL, device, SDC, UNL]).await?;
        debug!(board = %self.config.name, pad, "device clear");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::BoardConfig;
    use crate::error::GpibError;
    use crate::line::{BusLine, BusLines, PinDriver};
    use crate::sim::SimBus;
    use crate::status::{Role, StatusBits};
    use crate::GpibBoard;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn controller(bus: &SimBus) -> GpibBoard {
        GpibBoard::attach(BoardConfig::default(), bus.attach_node().unwrap()).unwrap()
    }

    fn device(bus: &SimBus) -> GpibBoard {
        GpibBoard::attach(BoardConfig::device("dev", 5), bus.attach_node().unwrap()).unwrap()
    }

    #[test]
    fn test_take_and_release_control() {
        let bus = SimBus::new();
        let mut board = controller(&bus);
        let observer = device(&bus);

        board.take_control().unwrap();
        assert_eq!(board.role(), Role::ControllerActive);
        assert!(observer.line_status().contains(BusLines::ATN));
        let status = board.query_status(StatusBits::empty());
        assert!(status.contains(StatusBits::CIC | StatusBits::ATN));

        board.release_control();
        assert!(!observer.line_status().contains(BusLines::ATN));
        let status = board.query_status(StatusBits::empty());
        assert!(status.contains(StatusBits::CIC));
        assert!(!status.contains(StatusBits::ATN));
    }

    #[test]
    fn test_device_cannot_take_control() {
        let bus = SimBus::new();
        let mut dev = device(&bus);
        assert!(matches!(
            dev.take_control(),
            Err(GpibError::ProtocolPrecondition(_))
        ));
        assert!(matches!(
            dev.interface_clear(),
            Err(GpibError::ProtocolPrecondition(_))
        ));
        assert!(matches!(
            dev.set_remote_enable(true),
            Err(GpibError::ProtocolPrecondition(_))
        ));
    }

    #[test]
    fn test_remote_enable() {
        let bus = SimBus::new();
        let mut board = controller(&bus);
        board.set_remote_enable(true).unwrap();
        assert!(board.line_status().contains(BusLines::REN));
        assert!(board.query_status(StatusBits::empty()).contains(StatusBits::REM));
        board.set_remote_enable(false).unwrap();
        assert!(!board.line_status().contains(BusLines::REN));
    }

    #[test]
    fn test_interface_clear_pulses_and_releases() {
        let bus = SimBus::new();
        let mut board = controller(&bus);
        let ifc = board.config().pins.ifc;

        // count IFC assertions seen by another node
        let seen = Arc::new(AtomicUsize::new(0));
        let node = bus.attach_node().unwrap();
        let counter = Arc::clone(&seen);
        node.request_edge_irq(
            ifc,
            board.fabric().assertion_edge(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        board.interface_clear().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!board.fabric().get(BusLine::Ifc));
        assert!(board.query_status(StatusBits::empty()).contains(StatusBits::CIC));
    }

    #[tokio::test]
    async fn test_send_command_requires_atn() {
        let bus = SimBus::new();
        let mut board = controller(&bus);
        let err = board.send_command(&[0x3F]).await.unwrap_err();
        assert!(matches!(err.source, GpibError::ProtocolPrecondition(_)));
        assert_eq!(err.count, 0);
    }

    #[tokio::test]
    async fn test_data_transfers_refused_under_atn() {
        let bus = SimBus::new();
        let mut board = controller(&bus);
        board.take_control().unwrap();

        let err = board.write(b"x", true, None).await.unwrap_err();
        assert!(matches!(err.source, GpibError::ProtocolPrecondition(_)));
        let err = board.read(&mut [0u8; 1], None).await.unwrap_err();
        assert!(matches!(err.source, GpibError::ProtocolPrecondition(_)));
    }

    #[tokio::test]
    async fn test_serial_poll_rejects_bad_address() {
        let bus = SimBus::new();
        let mut board = controller(&bus);
        let err = board.serial_poll(31).await.unwrap_err();
        assert!(matches!(
            err.source,
            GpibError::InvalidAddress { value: 31, .. }
        ));
        assert!(!board.query_status(StatusBits::empty()).contains(StatusBits::ATN));
    }
}
