#[macro_use]
mod logging;

pub mod cancel;
pub mod capture;
pub mod channel;
pub mod cli;
pub mod exit;
pub mod format;
pub mod io;
pub mod rotation;
pub mod settings;
pub mod supervisor;

use std::sync::Arc;

use clap::Parser;

pub use cancel::CancelToken;
pub use capture::{Capture, CaptureError, CaptureHandle, CaptureReport, ControlRequest, ExitReason};
pub use channel::{BoundedByteChannel, ChannelError};
pub use format::{Clock, FixedClock, FormatMode, LineFormatter, LocalClock};
pub use io::{Link, LinkConfig, LinkReader, ReadOutcome, SerialLink};
pub use logging::{init_file_logging, stop_file_logging, ConsoleSink, Level, MemorySink, MessageSink};
pub use rotation::RotatingWriter;
pub use settings::{CaptureSettings, SettingsError};
pub use supervisor::{ReconnectSupervisor, RetryPolicy, SupervisorState};

use cli::Cli;
use exit::codes;

// ============================================================================
// Entry point
// ============================================================================

/// Parse the command line, run the capture and return the process exit code.
pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { codes::INVALID_ARGS } else { codes::SUCCESS };
        }
    };

    if let Some(dir) = &cli.diag_log {
        if let Err(e) = init_file_logging(dir) {
            eprintln!("{}", e);
        }
    }

    let code = run_cli(&cli);
    stop_file_logging();
    code
}

fn run_cli(cli: &Cli) -> i32 {
    let sink: Arc<dyn MessageSink> = Arc::new(ConsoleSink);

    if cli.list_ports {
        return print_ports(sink.as_ref());
    }

    let stored = match cli.resolve_stored() {
        Ok(settings) => settings,
        Err(e) => {
            sink.error(&e.to_string());
            return codes::INVALID_ARGS;
        }
    };

    if let Some(name) = &cli.save {
        match stored.save_named(name) {
            Ok(path) => sink.info(&format!("Settings saved as '{}' ({})", name, path.display())),
            Err(e) => {
                sink.error(&e.to_string());
                return codes::IO_ERROR;
            }
        }
    }
    let settings = cli::fit_to_terminal(stored, cli::terminal_columns());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            sink.error(&format!("Failed to start runtime: {}", e));
            return codes::IO_ERROR;
        }
    };

    runtime.block_on(capture_serial(settings, sink))
}

async fn capture_serial(settings: CaptureSettings, sink: Arc<dyn MessageSink>) -> i32 {
    let link = SerialLink::new(settings.link_config());
    let capture = match Capture::new(settings, link, sink.clone()) {
        Ok(capture) => capture,
        Err(e) => {
            sink.error(&e.to_string());
            return exit::exit_code(&e);
        }
    };

    forward_signals(capture.handle());
    let report = capture.run().await;
    report.exit_code()
}

/// Ctrl-C stops the capture; on Unix, SIGHUP starts a new log file.
fn forward_signals(handle: CaptureHandle) {
    #[cfg(unix)]
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut hangup = match signal(SignalKind::hangup()) {
                Ok(hangup) => hangup,
                Err(e) => {
                    tlog!("[signal] Cannot listen for SIGHUP: {}", e);
                    return;
                }
            };
            while hangup.recv().await.is_some() {
                tlog!("[signal] SIGHUP, rotating log");
                if !handle.rotate() {
                    break;
                }
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tlog!("[signal] Ctrl-C, stopping");
            handle.stop();
        }
    });
}

fn print_ports(sink: &dyn MessageSink) -> i32 {
    match io::serial::list_serial_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("No serial ports found");
            codes::SUCCESS
        }
        Ok(ports) => {
            for port in ports {
                let description = [port.manufacturer, port.product]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                if description.is_empty() {
                    println!("{:<24} {}", port.port_name, port.port_type);
                } else {
                    println!("{:<24} {} ({})", port.port_name, port.port_type, description);
                }
            }
            codes::SUCCESS
        }
        Err(e) => {
            sink.error(&e);
            codes::IO_ERROR
        }
    }
}
