// src/rotation.rs
//
// Size-bounded log file writer. Files are named `<link> <YYYYMMDDHHMMSS>.log`
// and never deleted or merged; each one starts with the session header.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::logging::MessageSink;

pub struct RotatingWriter {
    dir: PathBuf,
    link_id: String,
    max_size: u64,
    header: String,
    file: Option<File>,
    current_path: Option<PathBuf>,
    /// Bytes flushed to the current file, header included
    bytes_written: u64,
    /// Size of the header at the top of the current file
    header_len: u64,
    files_created: usize,
    sink: Option<Arc<dyn MessageSink>>,
}

impl RotatingWriter {
    pub fn new(dir: impl Into<PathBuf>, link_id: &str, max_size: u64) -> Self {
        Self {
            dir: dir.into(),
            link_id: file_stem_for(link_id),
            max_size,
            header: String::new(),
            file: None,
            current_path: None,
            bytes_written: 0,
            header_len: 0,
            files_created: 0,
            sink: None,
        }
    }

    /// Report each new file to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Text written at the top of every file. Takes effect from the next file.
    pub fn set_header(&mut self, header: &str) {
        self.header = header.to_string();
    }

    /// Append `text`, opening the first file or rotating as needed.
    /// A single write is never split across files.
    pub fn write(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        let len = text.len() as u64;
        let holds_content = self.bytes_written > self.header_len;
        if self.file.is_none() || (holds_content && self.bytes_written + len > self.max_size) {
            self.open_next()?;
        }

        self.write_flushed(text.as_bytes())?;
        Ok(())
    }

    /// Close the current file and open a new one right away, whatever its size.
    pub fn request_rotate(&mut self) -> io::Result<PathBuf> {
        self.open_next()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn files_created(&self) -> usize {
        self.files_created
    }

    fn open_next(&mut self) -> io::Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self.bytes_written = 0;
        self.header_len = 0;

        std::fs::create_dir_all(&self.dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        let (file, path) = self.create_unique(&stamp)?;

        self.file = Some(file);
        self.current_path = Some(path.clone());
        self.files_created += 1;

        if !self.header.is_empty() {
            let header = std::mem::take(&mut self.header);
            let result = self.write_flushed(header.as_bytes());
            self.header = header;
            result?;
            self.header_len = self.bytes_written;
        }

        tlog!("[rotate] Opened {}", path.display());
        if let Some(sink) = &self.sink {
            if self.files_created == 1 {
                sink.info(&format!("Logging to {}", path.display()));
            } else {
                sink.info(&format!("Log rotated, now writing {}", path.display()));
            }
        }
        Ok(path)
    }

    /// Create `<link> <stamp>.log`, or `<link> <stamp>-N.log` if taken.
    fn create_unique(&self, stamp: &str) -> io::Result<(File, PathBuf)> {
        let mut suffix = 0u32;
        loop {
            let name = if suffix == 0 {
                format!("{} {}.log", self.link_id, stamp)
            } else {
                format!("{} {}-{}.log", self.link_id, stamp, suffix)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e),
            }
        }
    }

    fn write_flushed(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no log file open"))?;
        file.write_all(bytes)?;
        file.flush()?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

/// Reduce a link id such as `/dev/ttyUSB0` or `COM3` to something usable
/// in a file name.
fn file_stem_for(link_id: &str) -> String {
    let last = link_id
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or("link");
    last.chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
