//! Serial upload-target selection
//!
//! When the caller names a port, use it as-is. Otherwise enumerate the
//! system's serial ports and pick the first whose USB vendor/product pair
//! matches one of the board's known signatures.

use serialport::{SerialPortInfo, SerialPortType};
use tracing::debug;

use crate::device::Board;
use crate::pipeline::PipelineError;

/// Resolve the serial port an upload should use
pub fn resolve_port(explicit: Option<&str>, board: &Board) -> Result<String, PipelineError> {
    if let Some(port) = explicit {
        return Ok(port.to_string());
    }

    let ports = serialport::available_ports().unwrap_or_default();
    debug!(board = %board.id, candidates = ports.len(), "scanning serial ports");

    best_match(&ports, board).ok_or_else(|| PipelineError::PortNotFound {
        board: board.id.clone(),
    })
}

/// First enumerated port matching the board's USB signature
fn best_match(ports: &[SerialPortInfo], board: &Board) -> Option<String> {
    ports
        .iter()
        .find(|info| match &info.port_type {
            SerialPortType::UsbPort(usb) => board
                .usb_signatures
                .iter()
                .any(|sig| sig.vid == usb.vid && sig.pid == usb.pid),
            _ => false,
        })
        .map(|info| info.port_name.clone())
}
