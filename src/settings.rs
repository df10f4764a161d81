// src/settings.rs
//
// Capture settings: defaults, validation, TOML persistence of named
// configurations, and the small text helpers (line config strings, file
// sizes, session header) that go with them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::io::serial::{FlowControl, Parity};
use crate::io::LinkConfig;
use crate::supervisor::RetryPolicy;

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_DATA_BITS: u8 = 8;
pub const DEFAULT_STOP_BITS: u8 = 1;
pub const DEFAULT_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_HEX_COLUMNS: usize = 16;
pub const MIN_HEX_COLUMNS: usize = 8;
pub const MAX_HEX_COLUMNS: usize = 64;
/// Bytes requested from the link per read.
pub const DEFAULT_READ_CHUNK: usize = 512;
/// Channel capacity; an order of magnitude above one read chunk.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    /// Link identifier, e.g. "/dev/ttyUSB0" or "COM3"
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub read_chunk_size: usize,
    pub channel_capacity: usize,
    /// Directory for rotated text logs. None disables file logging.
    pub log_dir: Option<PathBuf>,
    pub max_file_size: u64,
    /// Byte-for-byte mirror of everything read from the link
    pub binary_log: Option<PathBuf>,
    pub hex_mode: bool,
    pub hex_columns: usize,
    pub ignore_empty_lines: bool,
    pub line_wrap: bool,
    /// Content width for line wrap; the caller fills this from the terminal when unset
    pub wrap_width: Option<usize>,
    /// Also print formatted output to stdout
    pub echo: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: DEFAULT_STOP_BITS,
            parity: Parity::None,
            flow_control: FlowControl::None,
            read_chunk_size: DEFAULT_READ_CHUNK,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            log_dir: None,
            max_file_size: DEFAULT_FILE_SIZE,
            binary_log: None,
            hex_mode: false,
            hex_columns: DEFAULT_HEX_COLUMNS,
            ignore_empty_lines: false,
            line_wrap: false,
            wrap_width: None,
            echo: true,
            max_reconnect_attempts: 10,
            reconnect_delay_ms: 5000,
            retry_delay_ms: 2000,
        }
    }
}

impl CaptureSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |msg: String| Err(SettingsError::Invalid(msg));

        if self.port.trim().is_empty() {
            return invalid("no port specified".to_string());
        }
        if self.baud_rate == 0 {
            return invalid("baud rate must be non-zero".to_string());
        }
        if !(5..=8).contains(&self.data_bits) {
            return invalid(format!("data bits must be 5-8, got {}", self.data_bits));
        }
        if self.stop_bits != 1 && self.stop_bits != 2 {
            return invalid(format!("stop bits must be 1 or 2, got {}", self.stop_bits));
        }
        if !(MIN_HEX_COLUMNS..=MAX_HEX_COLUMNS).contains(&self.hex_columns) {
            return invalid(format!(
                "hex columns must be between {} and {}, got {}",
                MIN_HEX_COLUMNS, MAX_HEX_COLUMNS, self.hex_columns
            ));
        }
        if self.read_chunk_size == 0 {
            return invalid("read chunk size must be non-zero".to_string());
        }
        if self.channel_capacity < self.read_chunk_size {
            return invalid(format!(
                "channel capacity ({}) must hold at least one read chunk ({})",
                self.channel_capacity, self.read_chunk_size
            ));
        }
        if self.max_file_size == 0 {
            return invalid("max log file size must be non-zero".to_string());
        }
        if self.max_reconnect_attempts == 0 {
            return invalid("reconnect attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn is_logging(&self) -> bool {
        self.log_dir.is_some()
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
            read_chunk_size: self.read_chunk_size,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Apply a `db,sb,pa,fl` line config string, e.g. "8,1,n,n".
    pub fn apply_line_config(&mut self, config: &str) -> Result<(), SettingsError> {
        let (data_bits, stop_bits, parity, flow) = parse_line_config(config)?;
        self.data_bits = data_bits;
        self.stop_bits = stop_bits;
        self.parity = parity;
        self.flow_control = flow;
        Ok(())
    }

    pub fn line_config(&self) -> String {
        format!(
            "{},{},{},{}",
            self.data_bits,
            self.stop_bits,
            self.parity.as_letter(),
            self.flow_control.as_letter()
        )
    }

    /// Session header written at the top of every log file.
    pub fn header_text(&self) -> String {
        fn line(header: &mut String, label: &str, value: impl std::fmt::Display) {
            header.push_str(&format!("{:<16}{}\n", format!("{}:", label), value));
        }

        let mut header = String::new();
        line(&mut header, "Port", &self.port);
        line(&mut header, "Baud rate", self.baud_rate);
        line(&mut header, "Data bits", self.data_bits);
        line(&mut header, "Stop bits", self.stop_bits);
        line(&mut header, "Parity", format!("{:?}", self.parity).to_lowercase());
        line(&mut header, "Flow control", format!("{:?}", self.flow_control).to_lowercase());
        line(&mut header, "Ignore empty", self.ignore_empty_lines);
        line(&mut header, "Line wrap", self.line_wrap);
        if self.hex_mode {
            line(&mut header, "Hex mode", format!("{} columns", self.hex_columns));
        }
        if let Some(ref bin) = self.binary_log {
            line(&mut header, "Binary log", bin.display());
        }
        match self.log_dir {
            Some(ref dir) => {
                line(&mut header, "Log path", dir.display());
                line(&mut header, "Log file size", format_file_size(self.max_file_size));
            }
            None => header.push_str("Not logging to file\n"),
        }
        header
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        let settings: CaptureSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load a configuration previously stored with `save_named`.
    pub fn load_named(name: &str) -> Result<Self, SettingsError> {
        Self::load_from_path(&named_settings_path(name)?)
    }

    /// Store this configuration under `name` in the user config directory.
    pub fn save_named(&self, name: &str) -> Result<PathBuf, SettingsError> {
        let path = named_settings_path(name)?;
        self.save_to_path(&path)?;
        Ok(path)
    }
}

/// `<config dir>/portcap/<name>.toml`
pub fn named_settings_path(name: &str) -> Result<PathBuf, SettingsError> {
    let name = name.trim();
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(SettingsError::Invalid(format!(
            "invalid configuration name '{}'",
            name
        )));
    }
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("portcap").join(format!("{}.toml", name)))
}

// ============================================================================
// Text helpers
// ============================================================================

/// Parse `db,sb,pa,fl` (e.g. "8,1,n,n" or "7, 2, e, r").
pub fn parse_line_config(config: &str) -> Result<(u8, u8, Parity, FlowControl), SettingsError> {
    let invalid = || SettingsError::Invalid(format!("invalid line config '{}'", config));
    let parts: Vec<&str> = config.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(invalid());
    }

    let data_bits: u8 = parts[0].parse().map_err(|_| invalid())?;
    if !(5..=8).contains(&data_bits) {
        return Err(invalid());
    }
    let stop_bits = match parts[1] {
        "1" => 1,
        "2" => 2,
        _ => return Err(invalid()),
    };
    let parity = Parity::from_letter(parts[2]).ok_or_else(invalid)?;
    let flow = FlowControl::from_letter(parts[3]).ok_or_else(invalid)?;

    Ok((data_bits, stop_bits, parity, flow))
}

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Parse a file size such as "512", "64KB" or "10 MB" (1024-based).
pub fn parse_file_size(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    if let Ok(bytes) = trimmed.parse::<u64>() {
        return Some(bytes);
    }

    let upper = trimmed.to_uppercase();
    let digits_end = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (number, unit) = upper.split_at(digits_end);
    let number: u64 = number.parse().ok()?;
    let power = SIZE_UNITS.iter().position(|u| *u == unit.trim())?;

    number.checked_mul(1024u64.checked_pow(power as u32)?)
}

/// Human-readable size with up to two decimals, e.g. "10 MB", "1.5 KB".
pub fn format_file_size(size: u64) -> String {
    let mut value = size as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, SIZE_UNITS[unit])
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> CaptureSettings {
        CaptureSettings {
            port: "/dev/ttyUSB0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.hex_columns, 16);
        assert_eq!(settings.max_file_size, 10 * 1024 * 1024);
        assert_eq!(settings.max_reconnect_attempts, 10);
        assert!(!settings.is_logging());
        assert!(settings.channel_capacity >= settings.read_chunk_size * 10);
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_settings().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_port() {
        let settings = CaptureSettings::default();
        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_hex_columns_out_of_range() {
        let mut settings = valid_settings();
        settings.hex_columns = 7;
        assert!(settings.validate().is_err());
        settings.hex_columns = 65;
        assert!(settings.validate().is_err());
        settings.hex_columns = 64;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_small_channel() {
        let mut settings = valid_settings();
        settings.read_chunk_size = 1024;
        settings.channel_capacity = 512;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_line_config() {
        let (db, sb, pa, fl) = parse_line_config("7, 2, e, r").unwrap();
        assert_eq!(db, 7);
        assert_eq!(sb, 2);
        assert_eq!(pa, Parity::Even);
        assert_eq!(fl, FlowControl::Hardware);

        assert!(parse_line_config("9,1,n,n").is_err());
        assert!(parse_line_config("8,1.5,n,n").is_err());
        assert!(parse_line_config("8,1,n").is_err());
    }

    #[test]
    fn test_line_config_round_trip_through_settings() {
        let mut settings = valid_settings();
        settings.apply_line_config("7,2,o,x").unwrap();
        assert_eq!(settings.line_config(), "7,2,o,x");
    }

    #[test]
    fn test_parse_file_size() {
        assert_eq!(parse_file_size("512"), Some(512));
        assert_eq!(parse_file_size("10KB"), Some(10 * 1024));
        assert_eq!(parse_file_size("10 mb"), Some(10 * 1024 * 1024));
        assert_eq!(parse_file_size("1GB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_file_size("ten MB"), None);
        assert_eq!(parse_file_size("10XB"), None);
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(10 * 1024 * 1024), "10 MB");
        assert_eq!(format_file_size(1536 * 1024), "1.5 MB");
    }

    #[test]
    fn test_header_text_logging() {
        let mut settings = valid_settings();
        settings.log_dir = Some(PathBuf::from("/var/log/portcap"));
        let header = settings.header_text();
        assert!(header.starts_with("Port:           /dev/ttyUSB0\n"));
        assert!(header.contains("Baud rate:      115200\n"));
        assert!(header.contains("Log file size:  10 MB\n"));
        assert!(!header.contains("Not logging"));
    }

    #[test]
    fn test_header_text_not_logging() {
        let header = valid_settings().header_text();
        assert!(header.ends_with("Not logging to file\n"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");

        let mut settings = valid_settings();
        settings.hex_mode = true;
        settings.hex_columns = 32;
        settings.log_dir = Some(dir.path().join("logs"));
        settings.save_to_path(&path).unwrap();

        let loaded = CaptureSettings::load_from_path(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "port = \"COM4\"\nbaud_rate = 9600\n").unwrap();

        let loaded = CaptureSettings::load_from_path(&path).unwrap();
        assert_eq!(loaded.port, "COM4");
        assert_eq!(loaded.baud_rate, 9600);
        assert_eq!(loaded.data_bits, DEFAULT_DATA_BITS);
    }

    #[test]
    fn test_named_settings_path_rejects_traversal() {
        assert!(named_settings_path("../etc").is_err());
        assert!(named_settings_path("").is_err());
        let path = named_settings_path("bench").unwrap();
        assert!(path.ends_with("portcap/bench.toml"));
    }
}
