use std::time::Duration;

use serialport::SerialPort;
use tracing::info;

use super::TextConsole;
use crate::error::{HvError, HvResult};

pub type ComPort = String;
pub type BaudRate = u32;

const SERIAL_TIMEOUT_MS: u64 = 100;

/// Operator console on a serial port; reader and writer share the port
pub type SerialConsole = TextConsole<Box<dyn SerialPort>, Box<dyn SerialPort>>;

pub fn open_serial_console(port: ComPort, baud: BaudRate) -> HvResult<SerialConsole> {
    let reader = serialport::new(&port, baud)
        .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .map_err(|e| HvError::Console(format!("Failed to open {}: {:?}", port, e)))?;
    let writer = reader
        .try_clone()
        .map_err(|e| HvError::Console(format!("Failed to clone {}: {:?}", port, e)))?;

    info!("Operator console on {} at {} baud", port, baud);
    Ok(TextConsole::new(reader, writer))
}
