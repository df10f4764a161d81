// src/format/mod.rs
//
// Incremental formatters that turn the raw link byte stream into display
// lines. Both variants keep partial-line state across calls, so feeding the
// same bytes in any chunking yields the same text.

use chrono::NaiveDateTime;

use crate::settings::CaptureSettings;

mod hex;
mod text;

pub use hex::HexFormatter;
pub use text::{TextFormatter, TextOptions, MIN_WRAP_WIDTH, TIMESTAMP_PREFIX_LEN};

/// Wrap width used when line wrap is on and no width was supplied.
pub const DEFAULT_WRAP_WIDTH: usize = 120;

// =============================================================================
// Clock
// =============================================================================

/// Source of line timestamps.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Always returns the same instant. Makes formatted output reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

// =============================================================================
// Formatter
// =============================================================================

/// Output mode, chosen once at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatMode {
    Text(TextOptions),
    Hex { columns: usize },
}

impl FormatMode {
    pub fn from_settings(settings: &CaptureSettings) -> Self {
        if settings.hex_mode {
            FormatMode::Hex {
                columns: settings.hex_columns,
            }
        } else {
            FormatMode::Text(TextOptions::new(
                settings.ignore_empty_lines,
                settings
                    .line_wrap
                    .then(|| settings.wrap_width.unwrap_or(DEFAULT_WRAP_WIDTH)),
            ))
        }
    }
}

trait FormatterImpl {
    fn consume(&mut self, data: &[u8]) -> String;
    fn complete(&mut self) -> String;
}

/// Stateful formatter for one capture stream.
pub struct LineFormatter {
    formatter: Box<dyn FormatterImpl + Send>,
    completed: bool,
}

impl LineFormatter {
    pub fn new(mode: FormatMode, clock: Box<dyn Clock>) -> Self {
        let formatter: Box<dyn FormatterImpl + Send> = match mode {
            FormatMode::Text(options) => Box::new(TextFormatter::new(options, clock)),
            FormatMode::Hex { columns } => Box::new(HexFormatter::new(columns)),
        };
        Self {
            formatter,
            completed: false,
        }
    }

    pub fn from_settings(settings: &CaptureSettings) -> Self {
        Self::new(FormatMode::from_settings(settings), Box::new(LocalClock))
    }

    /// Feed raw bytes. Returns whatever text is ready (may be empty).
    pub fn consume(&mut self, data: &[u8]) -> String {
        if self.completed || data.is_empty() {
            return String::new();
        }
        self.formatter.consume(data)
    }

    /// Final flush at end of stream. Only the first call produces output.
    pub fn complete(&mut self) -> String {
        if self.completed {
            return String::new();
        }
        self.completed = true;
        self.formatter.complete()
    }
}

impl FormatterImpl for TextFormatter {
    fn consume(&mut self, data: &[u8]) -> String {
        TextFormatter::consume(self, data)
    }

    fn complete(&mut self) -> String {
        TextFormatter::complete(self)
    }
}

impl FormatterImpl for HexFormatter {
    fn consume(&mut self, data: &[u8]) -> String {
        HexFormatter::consume(self, data)
    }

    fn complete(&mut self) -> String {
        HexFormatter::complete(self)
    }
}

#[cfg(test)]
pub(crate) fn test_clock() -> Box<dyn Clock> {
    let instant = chrono::NaiveDate::from_ymd_opt(2024, 3, 9)
        .and_then(|d| d.and_hms_milli_opt(14, 5, 6, 789))
        .unwrap();
    Box::new(FixedClock(instant))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `input` split at every boundary in `cuts` and return all output.
    fn run_split(mode: FormatMode, input: &[u8], cuts: &[usize]) -> String {
        let mut formatter = LineFormatter::new(mode, test_clock());
        let mut out = String::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&input.len())) {
            out.push_str(&formatter.consume(&input[start..cut]));
            start = cut;
        }
        out.push_str(&formatter.complete());
        out
    }

    #[test]
    fn test_text_chunking_does_not_change_output() {
        let input = "boot ok\r\n\r\nµC temp 21°C\rnext\nwrapped line that goes on\r".as_bytes();
        let mode = FormatMode::Text(TextOptions::new(false, Some(MIN_WRAP_WIDTH)));
        let whole = run_split(mode.clone(), input, &[]);

        for cut in 0..=input.len() {
            assert_eq!(run_split(mode.clone(), input, &[cut]), whole, "cut at {}", cut);
        }
        let every_byte: Vec<usize> = (1..input.len()).collect();
        assert_eq!(run_split(mode, input, &every_byte), whole);
    }

    #[test]
    fn test_hex_chunking_does_not_change_output() {
        let input: Vec<u8> = (0..=255u8).chain(b"tail".iter().copied()).collect();
        let mode = FormatMode::Hex { columns: 16 };
        let whole = run_split(mode.clone(), &input, &[]);

        for cut in [1, 7, 16, 17, 100, 255] {
            assert_eq!(run_split(mode.clone(), &input, &[cut]), whole);
        }
        let every_byte: Vec<usize> = (1..input.len()).collect();
        assert_eq!(run_split(mode, &input, &every_byte), whole);
    }

    #[test]
    fn test_complete_only_once() {
        let mut formatter = LineFormatter::new(FormatMode::Hex { columns: 8 }, test_clock());
        formatter.consume(b"abc");
        assert!(!formatter.complete().is_empty());
        assert!(formatter.complete().is_empty());
        assert!(formatter.consume(b"more").is_empty());
    }

    #[test]
    fn test_mode_from_settings() {
        let mut settings = CaptureSettings::default();
        assert_eq!(
            FormatMode::from_settings(&settings),
            FormatMode::Text(TextOptions::new(false, None))
        );

        settings.line_wrap = true;
        assert_eq!(
            FormatMode::from_settings(&settings),
            FormatMode::Text(TextOptions::new(false, Some(DEFAULT_WRAP_WIDTH)))
        );

        settings.hex_mode = true;
        settings.hex_columns = 32;
        assert_eq!(FormatMode::from_settings(&settings), FormatMode::Hex { columns: 32 });
    }

    #[test]
    fn test_formatter_from_settings_in_hex() {
        let settings = CaptureSettings {
            hex_mode: true,
            hex_columns: 8,
            ..CaptureSettings::default()
        };
        let mut formatter = LineFormatter::from_settings(&settings);
        let mut out = formatter.consume(b"\x01\x02");
        out.push_str(&formatter.complete());
        assert!(out.starts_with("00000000: 01 02"));
        assert!(out.ends_with("; ..\n"));
    }
}
