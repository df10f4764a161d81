// src/cli.rs
//
// Command line arguments. Builds `CaptureSettings` from defaults, an optional
// saved or file configuration, and the flags given on the command line.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::format::{MIN_WRAP_WIDTH, TIMESTAMP_PREFIX_LEN};
use crate::settings::{parse_file_size, CaptureSettings, SettingsError};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no port given (use --list-ports to see what is available)")]
    MissingPort,
    #[error("invalid log size '{0}' (examples: 512KB, 10MB, 1GB)")]
    InvalidLogSize(String),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Capture a serial port to rotating text or hex log files.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "portcap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(value_name = "PORT")]
    pub port: Option<String>,

    /// Serial port (alternative to the positional argument)
    #[arg(short = 'p', long = "port", value_name = "PORT", conflicts_with = "port")]
    pub port_flag: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Line settings as data bits, stop bits, parity (n/o/e), flow (n/r/x)
    #[arg(short, long, value_name = "DB,SB,PA,FL")]
    pub config: Option<String>,

    /// Directory for log files; omit to capture without logging
    #[arg(short, long)]
    pub log_dir: Option<PathBuf>,

    /// Maximum size of one log file, e.g. 10MB
    #[arg(short = 's', long, value_name = "SIZE")]
    pub log_size: Option<String>,

    /// Also write every received byte, unformatted, to this file
    #[arg(long, value_name = "PATH")]
    pub bin_file: Option<PathBuf>,

    /// Hex dump output, optionally with the number of columns (8-64), e.g. --hex=32
    #[arg(short = 'x', long, value_name = "COLS", num_args = 0..=1, require_equals = true,
          default_missing_value = DEFAULT_HEX_COLUMNS_STR)]
    pub hex: Option<usize>,

    /// Drop empty lines in text mode
    #[arg(long)]
    pub no_empty: bool,

    /// Wrap long lines at the terminal width
    #[arg(short, long)]
    pub wrap: bool,

    /// Do not echo captured output to stdout
    #[arg(short, long)]
    pub quiet: bool,

    /// List available serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    /// Save the resulting settings under this name, then capture
    #[arg(long, value_name = "NAME")]
    pub save: Option<String>,

    /// Start from settings saved under this name
    #[arg(long, value_name = "NAME", conflicts_with = "settings")]
    pub load: Option<String>,

    /// Start from settings in this TOML file
    #[arg(long, value_name = "PATH")]
    pub settings: Option<PathBuf>,

    /// Write diagnostic logs to this directory
    #[arg(long, value_name = "DIR")]
    pub diag_log: Option<PathBuf>,
}

/// `--hex` without a value; matches `DEFAULT_HEX_COLUMNS`.
const DEFAULT_HEX_COLUMNS_STR: &str = "16";

impl Cli {
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref().or(self.port_flag.as_deref())
    }

    /// Base settings: named, from file, or defaults.
    pub fn base_settings(&self) -> Result<CaptureSettings, CliError> {
        if let Some(name) = &self.load {
            return Ok(CaptureSettings::load_named(name)?);
        }
        if let Some(path) = &self.settings {
            return Ok(CaptureSettings::load_from_path(path)?);
        }
        Ok(CaptureSettings::default())
    }

    /// Overlay command line flags on `settings`.
    pub fn apply(&self, settings: &mut CaptureSettings) -> Result<(), CliError> {
        if let Some(port) = self.port() {
            settings.port = port.to_string();
        }
        if let Some(baud) = self.baud {
            settings.baud_rate = baud;
        }
        if let Some(config) = &self.config {
            settings.apply_line_config(config)?;
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir = Some(dir.clone());
        }
        if let Some(size) = &self.log_size {
            settings.max_file_size =
                parse_file_size(size).ok_or_else(|| CliError::InvalidLogSize(size.clone()))?;
        }
        if let Some(path) = &self.bin_file {
            settings.binary_log = Some(path.clone());
        }
        if let Some(columns) = self.hex {
            settings.hex_mode = true;
            settings.hex_columns = columns;
        }
        if self.no_empty {
            settings.ignore_empty_lines = true;
        }
        if self.wrap {
            settings.line_wrap = true;
        }
        if self.quiet {
            settings.echo = false;
        }
        Ok(())
    }

    /// Validated settings as `--save` stores them. Nothing here depends on
    /// the current terminal.
    pub fn resolve_stored(&self) -> Result<CaptureSettings, CliError> {
        let mut settings = self.base_settings()?;
        self.apply(&mut settings)?;

        if settings.port.trim().is_empty() {
            return Err(CliError::MissingPort);
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Final settings for a capture, validated.
    pub fn resolve(&self, terminal_columns: Option<u16>) -> Result<CaptureSettings, CliError> {
        Ok(fit_to_terminal(self.resolve_stored()?, terminal_columns))
    }
}

/// Wrap at the terminal width when wrapping is on and no width is set.
pub fn fit_to_terminal(
    mut settings: CaptureSettings,
    terminal_columns: Option<u16>,
) -> CaptureSettings {
    if settings.line_wrap && settings.wrap_width.is_none() {
        settings.wrap_width = terminal_columns.map(wrap_width_for);
    }
    settings
}

/// Content width left on a terminal line after the timestamp prefix.
pub fn wrap_width_for(columns: u16) -> usize {
    (columns as usize)
        .saturating_sub(TIMESTAMP_PREFIX_LEN)
        .max(MIN_WRAP_WIDTH)
}

/// Current terminal width, if stdout is a terminal.
pub fn terminal_columns() -> Option<u16> {
    crossterm::terminal::size().ok().map(|(cols, _)| cols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FlowControl, Parity};
    use crate::settings::DEFAULT_HEX_COLUMNS;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("portcap").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_positional_port() {
        let cli = parse(&["/dev/ttyUSB0"]);
        assert_eq!(cli.port(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn test_port_flag() {
        let cli = parse(&["--port", "COM3"]);
        assert_eq!(cli.port(), Some("COM3"));
    }

    #[test]
    fn test_port_given_twice_rejected() {
        let result = Cli::try_parse_from(["portcap", "COM3", "--port", "COM4"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_resolve() {
        let cli = parse(&["COM3"]);
        let settings = cli.resolve(None).unwrap();
        assert_eq!(settings.port, "COM3");
        assert_eq!(settings.baud_rate, 115_200);
        assert!(!settings.hex_mode);
        assert!(settings.echo);
        assert!(settings.log_dir.is_none());
    }

    #[test]
    fn test_all_flags_applied() {
        let cli = parse(&[
            "COM3",
            "-b",
            "9600",
            "--config",
            "7,2,e,r",
            "--log-dir",
            "/tmp/caps",
            "--log-size",
            "512KB",
            "--bin-file",
            "/tmp/raw.bin",
            "--no-empty",
            "--quiet",
        ]);
        let settings = cli.resolve(None).unwrap();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, 7);
        assert_eq!(settings.stop_bits, 2);
        assert_eq!(settings.parity, Parity::Even);
        assert_eq!(settings.flow_control, FlowControl::Hardware);
        assert_eq!(settings.log_dir, Some(PathBuf::from("/tmp/caps")));
        assert_eq!(settings.max_file_size, 512 * 1024);
        assert_eq!(settings.binary_log, Some(PathBuf::from("/tmp/raw.bin")));
        assert!(settings.ignore_empty_lines);
        assert!(!settings.echo);
    }

    #[test]
    fn test_hex_without_columns_uses_default() {
        let cli = parse(&["COM3", "--hex"]);
        let settings = cli.resolve(None).unwrap();
        assert!(settings.hex_mode);
        assert_eq!(settings.hex_columns, DEFAULT_HEX_COLUMNS);
    }

    #[test]
    fn test_hex_with_columns() {
        let cli = parse(&["COM3", "--hex=32"]);
        assert_eq!(cli.resolve(None).unwrap().hex_columns, 32);
    }

    #[test]
    fn test_hex_columns_out_of_range() {
        let cli = parse(&["COM3", "--hex=100"]);
        assert!(matches!(cli.resolve(None), Err(CliError::Settings(_))));
    }

    #[test]
    fn test_hex_before_port_leaves_port_alone() {
        let cli = parse(&["--hex", "/dev/ttyUSB0"]);
        assert_eq!(cli.port(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.hex, Some(DEFAULT_HEX_COLUMNS));

        let short = parse(&["-x", "COM3"]);
        assert_eq!(short.port(), Some("COM3"));
        assert_eq!(short.hex, Some(DEFAULT_HEX_COLUMNS));
    }

    #[test]
    fn test_missing_port() {
        let cli = parse(&["--hex"]);
        assert!(matches!(cli.resolve(None), Err(CliError::MissingPort)));
    }

    #[test]
    fn test_bad_log_size() {
        let cli = parse(&["COM3", "--log-size", "lots"]);
        assert!(matches!(cli.resolve(None), Err(CliError::InvalidLogSize(_))));
    }

    #[test]
    fn test_wrap_width_from_terminal() {
        let cli = parse(&["COM3", "--wrap"]);
        let settings = cli.resolve(Some(120)).unwrap();
        assert!(settings.line_wrap);
        assert_eq!(settings.wrap_width, Some(120 - TIMESTAMP_PREFIX_LEN));

        let narrow = cli.resolve(Some(30)).unwrap();
        assert_eq!(narrow.wrap_width, Some(MIN_WRAP_WIDTH));
    }

    #[test]
    fn test_stored_settings_skip_terminal_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrapped.toml");
        let cli = parse(&["COM3", "--wrap"]);

        let stored = cli.resolve_stored().unwrap();
        assert!(stored.line_wrap);
        assert_eq!(stored.wrap_width, None);
        stored.save_to_path(&path).unwrap();
        assert_eq!(CaptureSettings::load_from_path(&path).unwrap().wrap_width, None);

        let live = fit_to_terminal(stored, Some(100));
        assert_eq!(live.wrap_width, Some(100 - TIMESTAMP_PREFIX_LEN));
    }

    #[test]
    fn test_settings_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        let saved = CaptureSettings {
            port: "COM7".to_string(),
            baud_rate: 57_600,
            hex_mode: true,
            ..CaptureSettings::default()
        };
        saved.save_to_path(&path).unwrap();

        let path_arg = path.to_string_lossy().to_string();
        let cli = parse(&["--settings", &path_arg, "-b", "19200"]);
        let settings = cli.resolve(None).unwrap();
        assert_eq!(settings.port, "COM7");
        assert_eq!(settings.baud_rate, 19_200);
        assert!(settings.hex_mode);
    }

    #[test]
    fn test_load_and_settings_conflict() {
        let result = Cli::try_parse_from(["portcap", "--load", "a", "--settings", "b.toml"]);
        assert!(result.is_err());
    }
}
