// src/io/serial/mod.rs
//
// Serial port link for the capture pipeline.
// Provides cross-platform serial communication via the serialport crate.

mod port;
pub(crate) mod utils;

pub use port::{list_serial_ports, SerialLink, SerialPortInfo};
pub use utils::{FlowControl, Parity};
