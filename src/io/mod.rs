// src/io/mod.rs
//
// Link abstraction for the capture pipeline.
// A `Link` is the physical connection; `LinkReader` owns one, performs
// cancellable blocking reads and pushes every chunk into the byte channel.

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::channel::{BoundedByteChannel, ChannelError};

pub mod serial; // serial port link and port enumeration
#[cfg(test)]
pub(crate) mod scripted;

pub use serial::{FlowControl, Parity, SerialLink};

// ============================================================================
// Types
// ============================================================================

/// Immutable link settings. Validated by `CaptureSettings::validate` before
/// the pipeline starts.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub read_chunk_size: usize,
}

/// A connection that can be opened, read and closed repeatedly.
pub trait Link: Send {
    /// Identifier used in messages and log file names
    fn id(&self) -> &str;

    /// Single attempt to acquire and configure the link. No internal retry.
    fn open(&mut self) -> Result<(), String>;

    fn is_open(&self) -> bool;

    /// Blocking read. `ErrorKind::TimedOut`/`WouldBlock` mean "no data yet";
    /// `Ok(0)` means the far end went away.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Release the link. Idempotent; safe when never opened.
    fn close(&mut self);
}

/// Result of one `LinkReader::read_chunk` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes read from the link and accepted by the channel
    Data(usize),
    Cancelled,
    Failed(String),
}

// ============================================================================
// Link Reader
// ============================================================================

pub struct LinkReader<L: Link> {
    link: L,
    channel: Arc<BoundedByteChannel>,
    buf: Vec<u8>,
    total_bytes: u64,
}

impl<L: Link> LinkReader<L> {
    pub fn new(link: L, channel: Arc<BoundedByteChannel>, chunk_size: usize) -> Self {
        Self {
            link,
            channel,
            buf: vec![0u8; chunk_size.max(1)],
            total_bytes: 0,
        }
    }

    pub fn id(&self) -> &str {
        self.link.id()
    }

    /// Open the link once. Already-open links are left as they are.
    pub fn open(&mut self) -> Result<(), String> {
        if self.link.is_open() {
            return Ok(());
        }
        self.link.open()
    }

    /// Perform one blocking read of up to one chunk and push it to the channel.
    ///
    /// Read timeouts are not failures; the read is retried after checking the
    /// cancellation signal. An empty or failed read while the signal is raised
    /// counts as cancellation, otherwise as a link failure.
    pub fn read_chunk(&mut self, cancel: &CancelToken) -> ReadOutcome {
        loop {
            if cancel.is_cancelled() {
                return ReadOutcome::Cancelled;
            }
            if !self.link.is_open() {
                return ReadOutcome::Failed("link is not open".to_string());
            }

            match self.link.read(&mut self.buf) {
                Ok(n) if n > 0 => {
                    return match self.channel.send(&self.buf[..n], cancel) {
                        Ok(()) => {
                            self.total_bytes += n as u64;
                            ReadOutcome::Data(n)
                        }
                        Err(ChannelError::Cancelled) => ReadOutcome::Cancelled,
                        Err(e) => ReadOutcome::Failed(e.to_string()),
                    };
                }
                Ok(_) => {
                    if cancel.is_cancelled() {
                        return ReadOutcome::Cancelled;
                    }
                    return ReadOutcome::Failed("link closed by remote end".to_string());
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::TimedOut
                            | std::io::ErrorKind::WouldBlock
                            | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    // No data yet
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        return ReadOutcome::Cancelled;
                    }
                    return ReadOutcome::Failed(format!("read error: {}", e));
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.link.close();
    }

    /// Bytes successfully handed to the channel since creation.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Direct access for the reconnect supervisor.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

// ============================================================================
// Tests
// ============================================================================
