// src/format/text.rs
//
// Text mode: every line is prefixed with a local timestamp. CR, LF and CRLF
// all end a line. Partial lines are streamed as they arrive; the timestamp
// is taken when the first character of a line is seen.

use super::Clock;

/// Length of the `YYYY-MM-DD HH:MM:SS.mmm: ` prefix.
pub const TIMESTAMP_PREFIX_LEN: usize = 25;

/// Narrowest allowed wrap width.
pub const MIN_WRAP_WIDTH: usize = 20;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOptions {
    /// Drop lines with no content
    pub ignore_empty_lines: bool,
    /// Hard-wrap lines at this many characters
    pub wrap_width: Option<usize>,
}

impl TextOptions {
    pub fn new(ignore_empty_lines: bool, wrap_width: Option<usize>) -> Self {
        Self {
            ignore_empty_lines,
            wrap_width: wrap_width.map(|w| w.max(MIN_WRAP_WIDTH)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    StartOfLine,
    InLine,
    /// A CR just ended the line; a following LF belongs to it
    AfterCr,
}

pub struct TextFormatter {
    options: TextOptions,
    clock: Box<dyn Clock>,
    state: LineState,
    /// Characters on the current line, excluding the prefix
    column: usize,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
}

impl TextFormatter {
    pub fn new(options: TextOptions, clock: Box<dyn Clock>) -> Self {
        Self {
            options,
            clock,
            state: LineState::StartOfLine,
            column: 0,
            pending: Vec::new(),
        }
    }

    pub fn consume(&mut self, data: &[u8]) -> String {
        let mut out = String::with_capacity(data.len() + TIMESTAMP_PREFIX_LEN);
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(data);

        let mut rest: &[u8] = &input;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    self.push_str(s, &mut out);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or_default(), &mut out);
                    match e.error_len() {
                        Some(len) => {
                            self.push_char(char::REPLACEMENT_CHARACTER, &mut out);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            // Sequence may finish in the next chunk
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn complete(&mut self) -> String {
        let mut out = String::new();
        let tail = std::mem::take(&mut self.pending);
        if !tail.is_empty() {
            self.push_str(&String::from_utf8_lossy(&tail), &mut out);
        }
        if self.state == LineState::InLine {
            out.push('\n');
        }
        self.state = LineState::StartOfLine;
        self.column = 0;
        out
    }

    fn push_str(&mut self, s: &str, out: &mut String) {
        for c in s.chars() {
            self.push_char(c, out);
        }
    }

    fn push_char(&mut self, c: char, out: &mut String) {
        match (self.state, c) {
            (LineState::AfterCr, '\n') => {
                self.state = LineState::StartOfLine;
            }
            (_, '\r') | (_, '\n') => {
                self.end_line(out);
                self.state = if c == '\r' {
                    LineState::AfterCr
                } else {
                    LineState::StartOfLine
                };
            }
            _ => {
                if self.state != LineState::InLine {
                    self.start_line(out);
                } else if self.options.wrap_width.is_some_and(|w| self.column >= w) {
                    out.push('\n');
                    self.start_line(out);
                }
                out.push(c);
                self.column += 1;
                self.state = LineState::InLine;
            }
        }
    }

    fn start_line(&mut self, out: &mut String) {
        out.push_str(&self.clock.now().format(TIMESTAMP_FORMAT).to_string());
        out.push_str(": ");
        self.column = 0;
    }

    fn end_line(&mut self, out: &mut String) {
        if self.state == LineState::InLine {
            out.push('\n');
        } else if !self.options.ignore_empty_lines {
            self.start_line(out);
            out.push('\n');
        }
        self.column = 0;
    }
}
