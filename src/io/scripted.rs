// src/io/scripted.rs
//
// In-memory link that replays a fixed script of reads. Test support only.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::Link;

#[derive(Debug, Clone)]
pub(crate) enum ScriptStep {
    Data(Vec<u8>),
    Timeout,
    Eof,
    Error,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct LinkStats {
    pub open_attempts: usize,
    pub opens: usize,
    pub closes: usize,
    /// Bytes handed out by `read`
    pub bytes_read: usize,
}

pub(crate) struct ScriptedLink {
    id: String,
    steps: VecDeque<ScriptStep>,
    /// Outcome of successive open attempts; succeeds once exhausted
    open_results: VecDeque<bool>,
    open: bool,
    stats: Arc<Mutex<LinkStats>>,
}

impl ScriptedLink {
    pub fn new(id: &str, steps: Vec<ScriptStep>) -> Self {
        Self {
            id: id.to_string(),
            steps: steps.into(),
            open_results: VecDeque::new(),
            open: false,
            stats: Arc::new(Mutex::new(LinkStats::default())),
        }
    }

    pub fn with_open_results(mut self, results: Vec<bool>) -> Self {
        self.open_results = results.into();
        self
    }

    pub fn stats(&self) -> Arc<Mutex<LinkStats>> {
        self.stats.clone()
    }
}

impl Link for ScriptedLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self) -> Result<(), String> {
        let ok = self.open_results.pop_front().unwrap_or(true);
        let mut stats = self.stats.lock().unwrap();
        stats.open_attempts += 1;
        if ok {
            stats.opens += 1;
            self.open = true;
            Ok(())
        } else {
            Err(format!("{} unavailable", self.id))
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.steps.pop_front() {
            Some(ScriptStep::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    let rest = bytes.split_off(n);
                    self.steps.push_front(ScriptStep::Data(rest));
                }
                self.stats.lock().unwrap().bytes_read += n;
                Ok(n)
            }
            Some(ScriptStep::Eof) => Ok(0),
            Some(ScriptStep::Error) => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )),
            Some(ScriptStep::Timeout) | None => {
                std::thread::sleep(Duration::from_millis(1));
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"))
            }
        }
    }

    fn close(&mut self) {
        if self.open {
            self.stats.lock().unwrap().closes += 1;
        }
        self.open = false;
    }
}
