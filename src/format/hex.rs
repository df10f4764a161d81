// src/format/hex.rs
//
// Hex dump mode: `aaaaaaaa: xx xx ... ; ascii` with a fixed number of bytes
// per line and extra spacing every 4, 8 and 16 columns.

use std::fmt::Write;

pub struct HexFormatter {
    columns: usize,
    /// Offset of the next byte in the stream
    address: u64,
    /// Bytes already placed on the current line
    col: usize,
    ascii: String,
}

impl HexFormatter {
    pub fn new(columns: usize) -> Self {
        let columns = columns.max(1);
        Self {
            columns,
            address: 0,
            col: 0,
            ascii: String::with_capacity(columns),
        }
    }

    pub fn consume(&mut self, data: &[u8]) -> String {
        let mut out = String::with_capacity(data.len() * 4);
        for &b in data {
            if self.col == 0 {
                let _ = write!(out, "{:08x}: ", self.address);
            }
            let _ = write!(out, "{:02x} ", b);
            self.ascii.push(printable(b));
            self.col += 1;
            self.address += 1;

            if self.col == self.columns {
                self.end_line(&mut out);
            } else {
                push_spacer(self.col, &mut out);
            }
        }
        out
    }

    pub fn complete(&mut self) -> String {
        let mut out = String::new();
        if self.col == 0 {
            return out;
        }
        for c in self.col..self.columns {
            out.push_str("   ");
            if c + 1 < self.columns {
                push_spacer(c + 1, &mut out);
            }
        }
        self.end_line(&mut out);
        out
    }

    fn end_line(&mut self, out: &mut String) {
        out.push_str("; ");
        out.push_str(&self.ascii);
        out.push('\n');
        self.ascii.clear();
        self.col = 0;
    }
}

fn printable(b: u8) -> char {
    if (0x20..=0x7e).contains(&b) {
        b as char
    } else {
        '.'
    }
}

/// Group separators: one extra space at every 4th column, two at every 8th,
/// three at every 16th.
fn push_spacer(col: usize, out: &mut String) {
    if col % 4 == 0 {
        out.push(' ');
        if col % 8 == 0 {
            out.push(' ');
            if col % 16 == 0 {
                out.push(' ');
            }
        }
    }
}
