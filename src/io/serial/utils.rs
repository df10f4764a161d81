// src/io/serial/utils.rs
//
// Shared serial line-setting types and their conversions to the serialport crate.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl as SpFlowControl, Parity as SpParity, StopBits};

// ============================================================================
// Types
// ============================================================================

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Flow control (handshake) setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    /// RTS/CTS
    Hardware,
    /// XON/XOFF
    Software,
}

impl Parity {
    /// Single-letter form used in `db,sb,pa,fl` line configs.
    pub fn as_letter(&self) -> char {
        match self {
            Parity::None => 'n',
            Parity::Odd => 'o',
            Parity::Even => 'e',
        }
    }

    pub fn from_letter(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "n" | "none" => Some(Parity::None),
            "o" | "odd" => Some(Parity::Odd),
            "e" | "even" => Some(Parity::Even),
            _ => None,
        }
    }
}

impl FlowControl {
    /// Single-letter form used in `db,sb,pa,fl` line configs.
    pub fn as_letter(&self) -> char {
        match self {
            FlowControl::None => 'n',
            FlowControl::Hardware => 'r',
            FlowControl::Software => 'x',
        }
    }

    pub fn from_letter(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "n" | "none" => Some(FlowControl::None),
            "r" | "rts" | "hardware" => Some(FlowControl::Hardware),
            "x" | "xon" | "software" => Some(FlowControl::Software),
            _ => None,
        }
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: &Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert our FlowControl enum to serialport crate's FlowControl type
pub fn to_serialport_flow_control(f: &FlowControl) -> SpFlowControl {
    match f {
        FlowControl::None => SpFlowControl::None,
        FlowControl::Hardware => SpFlowControl::Hardware,
        FlowControl::Software => SpFlowControl::Software,
    }
}

/// Convert data bits count to serialport crate's DataBits type
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

/// Convert stop bits count to serialport crate's StopBits type
pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Tests
// ============================================================================
