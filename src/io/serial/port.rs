// src/io/serial/port.rs
//
// Serial port link built on the serialport crate, plus port enumeration.

use std::io::Read;
use std::time::Duration;

use serialport::SerialPort;

use super::utils::{
    to_serialport_data_bits, to_serialport_flow_control, to_serialport_parity,
    to_serialport_stop_bits,
};
use crate::io::{Link, LinkConfig};

/// Read timeout. Short enough that cancellation is noticed promptly.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Serial Link
// ============================================================================

pub struct SerialLink {
    config: LinkConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn new(config: LinkConfig) -> Self {
        Self { config, port: None }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
}

impl Link for SerialLink {
    fn id(&self) -> &str {
        &self.config.port
    }

    fn open(&mut self) -> Result<(), String> {
        if self.port.is_some() {
            return Ok(());
        }

        let config = &self.config;
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(to_serialport_data_bits(config.data_bits))
            .stop_bits(to_serialport_stop_bits(config.stop_bits))
            .parity(to_serialport_parity(&config.parity))
            .flow_control(to_serialport_flow_control(&config.flow_control))
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| format!("Cannot open {}: {}", config.port, e))?;

        tlog!(
            "[serial:{}] Opened at {} baud ({}-{}-{}, flow: {:?})",
            config.port,
            config.baud_rate,
            config.data_bits,
            config.parity.as_letter().to_ascii_uppercase(),
            config.stop_bits,
            config.flow_control
        );

        self.port = Some(port);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.port.as_mut() {
            Some(port) => port.read(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "serial port is not open",
            )),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tlog!("[serial:{}] Closed", self.config.port);
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// Information about an available serial port
#[derive(Clone, Debug)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// List available serial ports, sorted by name.
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty (terminal) devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports =
        serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    let mut ports: Vec<SerialPortInfo> = ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    ("USB".to_string(), info.manufacturer, info.product)
                }
                serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None),
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None),
                serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
            }
        })
        .collect();

    ports.sort_by(|a, b| natural_port_key(&a.port_name).cmp(&natural_port_key(&b.port_name)));
    Ok(ports)
}

/// Sort key that orders "COM2" before "COM10" and "ttyUSB2" before "ttyUSB10".
fn natural_port_key(name: &str) -> (String, u64) {
    let split = name
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let (prefix, digits) = name.split_at(split);
    (prefix.to_string(), digits.parse().unwrap_or(0))
}
