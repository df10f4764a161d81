// src/capture.rs
//
// Capture orchestrator. Runs the read, format+write and control activities
// around one shared cancellation signal:
//
//   link -> LinkReader -> BoundedByteChannel -> LineFormatter -> RotatingWriter
//                                            \-> raw mirror file
//
// Whichever activity ends first cancels the others. The write activity is
// always awaited last so every byte accepted by the channel reaches the output.
// It is also the only owner of the output files; the control activity asks it
// to rotate through a flag.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::channel::{BoundedByteChannel, ChannelError};
use crate::format::{Clock, FormatMode, LineFormatter, LocalClock};
use crate::io::{Link, LinkReader, ReadOutcome};
use crate::logging::MessageSink;
use crate::rotation::RotatingWriter;
use crate::settings::{CaptureSettings, SettingsError};
use crate::supervisor::{ReconnectSupervisor, RetryPolicy, SupervisorState};

/// Longest the write activity waits for data before checking for a rotate request.
const ROTATE_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("cannot open {port}: {reason}")]
    LinkOpen { port: String, reason: String },
    #[error("gave up on {port} after {attempts} reconnect attempts")]
    LinkExhausted { port: String, attempts: u32 },
    #[error("output failure: {0}")]
    Output(String),
    #[error("{0} captured bytes were never written")]
    Undrained(usize),
}

/// Requests accepted by a running capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Graceful stop: drain the channel, then exit
    Stop,
    /// Start a new log file now
    Rotate,
}

/// Why a capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    LinkOpenFailed,
    LinkExhausted,
    OutputFailed(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Stopped => write!(f, "stopped"),
            ExitReason::LinkOpenFailed => write!(f, "link could not be opened"),
            ExitReason::LinkExhausted => write!(f, "link reconnect attempts exhausted"),
            ExitReason::OutputFailed(e) => write!(f, "output failed: {}", e),
        }
    }
}

impl From<&CaptureError> for ExitReason {
    fn from(error: &CaptureError) -> Self {
        match error {
            CaptureError::LinkOpen { .. } => ExitReason::LinkOpenFailed,
            CaptureError::LinkExhausted { .. } => ExitReason::LinkExhausted,
            CaptureError::Undrained(_) => ExitReason::Stopped,
            other => ExitReason::OutputFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub reason: ExitReason,
    /// Bytes taken off the channel and written out
    pub bytes_captured: u64,
    /// Bytes still in the channel at teardown
    pub undrained: usize,
}

impl CaptureReport {
    pub fn exit_code(&self) -> i32 {
        crate::exit::exit_code_for(&self.reason, self.undrained)
    }
}

/// Cloneable handle for stopping or rotating a running capture.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    tx: mpsc::UnboundedSender<ControlRequest>,
}

impl CaptureHandle {
    /// Returns false if the capture has already finished.
    pub fn stop(&self) -> bool {
        self.tx.send(ControlRequest::Stop).is_ok()
    }

    pub fn rotate(&self) -> bool {
        self.tx.send(ControlRequest::Rotate).is_ok()
    }
}

// ============================================================================
// Capture
// ============================================================================

pub struct Capture<L: Link + 'static> {
    settings: CaptureSettings,
    link: L,
    sink: Arc<dyn MessageSink>,
    clock: Box<dyn Clock>,
    echo: Option<Box<dyn Write + Send>>,
    control_tx: mpsc::UnboundedSender<ControlRequest>,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
}

impl<L: Link + 'static> Capture<L> {
    pub fn new(
        settings: CaptureSettings,
        link: L,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, CaptureError> {
        settings.validate()?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let echo: Option<Box<dyn Write + Send>> = if settings.echo {
            Some(Box::new(std::io::stdout()))
        } else {
            None
        };
        Ok(Self {
            settings,
            link,
            sink,
            clock: Box::new(LocalClock),
            echo,
            control_tx,
            control_rx,
        })
    }

    /// Replace the timestamp source for text mode.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send echoed output somewhere other than stdout.
    pub fn with_echo(mut self, echo: Box<dyn Write + Send>) -> Self {
        self.echo = Some(echo);
        self
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            tx: self.control_tx.clone(),
        }
    }

    pub async fn run(self) -> CaptureReport {
        let Capture {
            settings,
            link,
            sink,
            clock,
            echo,
            control_tx,
            control_rx,
        } = self;
        // Keeps the control channel open even if every handle is dropped
        let _control_tx = control_tx;

        let port = link.id().to_string();
        let header = settings.header_text();

        let mut outputs = match Outputs::open(&settings, &port, &header, echo, sink.clone()) {
            Ok(outputs) => outputs,
            Err(e) => {
                sink.error(&e.to_string());
                return CaptureReport {
                    reason: ExitReason::from(&e),
                    bytes_captured: 0,
                    undrained: 0,
                };
            }
        };

        let cancel = CancelToken::new();
        let channel = Arc::new(BoundedByteChannel::new(settings.channel_capacity));
        let formatter = LineFormatter::new(FormatMode::from_settings(&settings), clock);
        let reader = LinkReader::new(link, channel.clone(), settings.read_chunk_size);

        tlog!(
            "[capture] Starting on {} ({}, channel {} bytes)",
            port,
            if settings.hex_mode { "hex" } else { "text" },
            settings.channel_capacity
        );

        let mut read_task: JoinHandle<Result<(), CaptureError>> = {
            let channel = channel.clone();
            let cancel = cancel.clone();
            let sink = sink.clone();
            let policy = settings.retry_policy();
            tokio::task::spawn_blocking(move || {
                read_activity(reader, channel, policy, &cancel, sink.as_ref())
            })
        };

        let rotate_flag = Arc::new(AtomicBool::new(false));

        let mut write_task: JoinHandle<WriteSummary> = {
            let channel = channel.clone();
            let cancel = cancel.clone();
            let rotate_flag = rotate_flag.clone();
            let chunk = settings.read_chunk_size;
            tokio::task::spawn_blocking(move || {
                write_activity(&channel, &cancel, &rotate_flag, formatter, &mut outputs, chunk)
            })
        };

        let control = control_activity(control_rx, rotate_flag);

        // First activity to finish decides the shutdown
        let first = tokio::select! {
            result = &mut read_task => Finished::Read(join_result(result, "read")),
            summary = &mut write_task => Finished::Write(join_summary(summary)),
            _ = control => Finished::Stop,
        };

        if cancel.cancel() {
            tlog!("[capture] Shutting down ({})", first.name());
        }

        // The write activity is always the last one awaited
        let (read_result, summary, write_first) = match first {
            Finished::Read(read) => (read, join_summary(write_task.await), false),
            Finished::Write(summary) => (join_result(read_task.await, "read"), summary, true),
            Finished::Stop => (
                join_result(read_task.await, "read"),
                join_summary(write_task.await),
                false,
            ),
        };

        let undrained = match channel.close() {
            Err(ChannelError::Undrained(n)) => {
                sink.error(&CaptureError::Undrained(n).to_string());
                n
            }
            _ => 0,
        };

        let errors = if write_first {
            [summary.result.err(), read_result.err()]
        } else {
            [read_result.err(), summary.result.err()]
        };
        let reason = errors
            .iter()
            .flatten()
            .next()
            .map(ExitReason::from)
            .unwrap_or(ExitReason::Stopped);

        let report = CaptureReport {
            reason,
            bytes_captured: summary.bytes,
            undrained,
        };
        let ended = format!(
            "Capture of {} ended: {} ({} bytes)",
            port, report.reason, report.bytes_captured
        );
        match report.reason {
            ExitReason::OutputFailed(_) => sink.error(&ended),
            _ => sink.info(&ended),
        }
        report
    }
}

enum Finished {
    Read(Result<(), CaptureError>),
    Write(WriteSummary),
    Stop,
}

impl Finished {
    fn name(&self) -> &'static str {
        match self {
            Finished::Read(_) => "read ended",
            Finished::Write(_) => "write ended",
            Finished::Stop => "stop requested",
        }
    }
}

struct WriteSummary {
    bytes: u64,
    result: Result<(), CaptureError>,
}

fn join_result(
    result: Result<Result<(), CaptureError>, tokio::task::JoinError>,
    name: &str,
) -> Result<(), CaptureError> {
    result.unwrap_or_else(|e| Err(CaptureError::Output(format!("{} activity failed: {}", name, e))))
}

fn join_summary(result: Result<WriteSummary, tokio::task::JoinError>) -> WriteSummary {
    result.unwrap_or_else(|e| WriteSummary {
        bytes: 0,
        result: Err(CaptureError::Output(format!("write activity failed: {}", e))),
    })
}

// ============================================================================
// Activities
// ============================================================================

/// Hangs up the channel when the read activity ends, however it ends.
struct HangUpOnDrop(Arc<BoundedByteChannel>);

impl Drop for HangUpOnDrop {
    fn drop(&mut self) {
        self.0.hang_up();
    }
}

fn read_activity<L: Link>(
    mut reader: LinkReader<L>,
    channel: Arc<BoundedByteChannel>,
    policy: RetryPolicy,
    cancel: &CancelToken,
    sink: &dyn MessageSink,
) -> Result<(), CaptureError> {
    let _hang_up = HangUpOnDrop(channel);
    let port = reader.id().to_string();

    if let Err(reason) = reader.open() {
        let error = CaptureError::LinkOpen { port, reason };
        sink.error(&error.to_string());
        return Err(error);
    }
    sink.info(&format!("Capturing from {}", port));

    let mut supervisor = ReconnectSupervisor::new(policy);
    let result = loop {
        match reader.read_chunk(cancel) {
            ReadOutcome::Data(_) => {}
            ReadOutcome::Cancelled => break Ok(()),
            ReadOutcome::Failed(reason) => {
                sink.warning(&format!("Cannot read from {}, retrying: {}", port, reason));
                match supervisor.recover(reader.link_mut(), cancel, sink) {
                    SupervisorState::Connected | SupervisorState::Reconnecting => {}
                    SupervisorState::Cancelled => break Ok(()),
                    SupervisorState::Exhausted => {
                        break Err(CaptureError::LinkExhausted {
                            port: port.clone(),
                            attempts: policy.max_attempts,
                        })
                    }
                }
            }
        }
    };

    reader.close();
    tlog!("[capture] Read activity for {} done, {} bytes", port, reader.total_bytes());
    result
}

fn write_activity(
    channel: &BoundedByteChannel,
    cancel: &CancelToken,
    rotate_flag: &AtomicBool,
    mut formatter: LineFormatter,
    outputs: &mut Outputs,
    chunk_size: usize,
) -> WriteSummary {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut bytes = 0u64;
    let mut draining = false;

    let mut result = loop {
        if rotate_flag.swap(false, Ordering::SeqCst) {
            outputs.rotate();
        }

        let n = if draining {
            channel.receive_remaining(&mut buf)
        } else {
            match channel.receive_timeout(&mut buf, cancel, ROTATE_POLL) {
                Some(n) => n,
                None => continue,
            }
        };
        if n == 0 {
            if draining {
                break Ok(());
            }
            // Cancelled or hung up: take whatever the reader still delivers
            draining = true;
            continue;
        }

        bytes += n as u64;
        let data = &buf[..n];
        if let Err(e) = outputs.raw(data).and_then(|_| outputs.text(&formatter.consume(data))) {
            cancel.cancel();
            break Err(e);
        }
    };

    let tail = formatter.complete();
    if result.is_ok() {
        result = outputs.text(&tail);
    }
    if let Err(e) = outputs.finish() {
        result = result.and(Err(e));
    }
    WriteSummary { bytes, result }
}

/// Waits for a stop. Rotate requests are handed to the write activity.
async fn control_activity(
    mut rx: mpsc::UnboundedReceiver<ControlRequest>,
    rotate_flag: Arc<AtomicBool>,
) {
    while let Some(request) = rx.recv().await {
        match request {
            ControlRequest::Stop => {
                tlog!("[capture] Stop requested");
                return;
            }
            ControlRequest::Rotate => {
                tlog!("[capture] Rotate requested");
                rotate_flag.store(true, Ordering::SeqCst);
            }
        }
    }
    std::future::pending::<()>().await
}

// ============================================================================
// Outputs
// ============================================================================

/// Everything the write activity writes to.
struct Outputs {
    writer: Option<RotatingWriter>,
    binary: Option<File>,
    echo: Option<Box<dyn Write + Send>>,
    sink: Arc<dyn MessageSink>,
}

impl Outputs {
    fn open(
        settings: &CaptureSettings,
        port: &str,
        header: &str,
        mut echo: Option<Box<dyn Write + Send>>,
        sink: Arc<dyn MessageSink>,
    ) -> Result<Self, CaptureError> {
        let writer = settings.log_dir.as_ref().map(|dir| {
            let mut writer =
                RotatingWriter::new(dir, port, settings.max_file_size).with_sink(sink.clone());
            writer.set_header(header);
            writer
        });

        let binary = match &settings.binary_log {
            Some(path) => Some(File::create(path).map_err(|e| {
                CaptureError::Output(format!("cannot create {}: {}", path.display(), e))
            })?),
            None => None,
        };

        if let Some(out) = echo.as_mut() {
            out.write_all(header.as_bytes())
                .and_then(|_| out.flush())
                .map_err(|e| CaptureError::Output(format!("echo: {}", e)))?;
        }

        Ok(Self {
            writer,
            binary,
            echo,
            sink,
        })
    }

    /// Start a new log file. A failed rotation is reported and capture goes on.
    fn rotate(&mut self) {
        let Some(writer) = self.writer.as_mut() else {
            self.sink.warning("Rotation requested but not logging to file");
            return;
        };
        if let Err(e) = writer.request_rotate() {
            self.sink.error(&format!("Log rotation failed: {}", e));
        }
    }

    fn raw(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        if let Some(file) = self.binary.as_mut() {
            file.write_all(data)
                .and_then(|_| file.flush())
                .map_err(|e| CaptureError::Output(format!("binary log: {}", e)))?;
        }
        Ok(())
    }

    fn text(&mut self, text: &str) -> Result<(), CaptureError> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(writer) = self.writer.as_mut() {
            writer
                .write(text)
                .map_err(|e| CaptureError::Output(format!("log file: {}", e)))?;
        }
        if let Some(out) = self.echo.as_mut() {
            out.write_all(text.as_bytes())
                .and_then(|_| out.flush())
                .map_err(|e| CaptureError::Output(format!("echo: {}", e)))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CaptureError> {
        if let Some(file) = self.binary.as_mut() {
            file.sync_all()
                .map_err(|e| CaptureError::Output(format!("binary log: {}", e)))?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
