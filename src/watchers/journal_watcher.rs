use crate::error::CollectorError;
use crate::watchers::{LogLine, LogWatcher};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Subset of a `journalctl --output=json` entry we care about
#[derive(Debug, Deserialize)]
struct JournalEntry {
    #[serde(rename = "__REALTIME_TIMESTAMP")]
    realtime_timestamp: String,
    #[serde(rename = "MESSAGE")]
    message: serde_json::Value,
}

impl LogLine {
    /// Parse one JSON line emitted by `journalctl --output=json`
    ///
    /// `MESSAGE` may be a string or, for non UTF-8 payloads, an array of bytes.
    pub fn from_journal_json(line: &str) -> Result<Self, CollectorError> {
        let entry: JournalEntry = serde_json::from_str(line)
            .map_err(|e| CollectorError::ParseError(format!("journal entry: {}", e)))?;

        let micros: i64 = entry.realtime_timestamp.parse().map_err(|_| {
            CollectorError::ParseError(format!(
                "invalid __REALTIME_TIMESTAMP {:?}",
                entry.realtime_timestamp
            ))
        })?;
        let timestamp = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| {
            CollectorError::ParseError(format!("timestamp out of range: {}", micros))
        })?;

        let message = match entry.message {
            serde_json::Value::String(text) => text,
            serde_json::Value::Array(bytes) => {
                let raw: Vec<u8> = bytes
                    .iter()
                    .filter_map(|b| b.as_u64().and_then(|v| u8::try_from(v).ok()))
                    .collect();
                String::from_utf8_lossy(&raw).into_owned()
            }
            other => {
                return Err(CollectorError::ParseError(format!(
                    "unsupported MESSAGE value: {}",
                    other
                )))
            }
        };

        Ok(LogLine { timestamp, message })
    }
}

/// Follows the systemd journal through a supervised `journalctl` subprocess
///
/// The subprocess is restarted with exponential backoff when it dies, and the
/// watcher falls back to a slow retry cadence after repeated failures.
pub struct JournalWatcher {
    /// Only read the kernel ring buffer (`journalctl -k`)
    kernel: bool,
    /// Optional `SYSLOG_IDENTIFIER` filter
    identifier: Option<String>,
    /// Replay entries this far back on start
    lookback: Option<Duration>,
    /// Handle to the background thread
    thread_handle: Option<JoinHandle<()>>,
    /// Shared state for controlling the reader
    running: Arc<Mutex<bool>>,
}

impl JournalWatcher {
    pub fn new(kernel: bool, identifier: Option<String>, lookback: Option<Duration>) -> Self {
        Self {
            kernel,
            identifier,
            lookback,
            thread_handle: None,
            running: Arc::new(Mutex::new(false)),
        }
    }

    /// Command line arguments passed to `journalctl`
    fn arguments(&self) -> Vec<String> {
        let mut args = vec!["--follow".to_string(), "--output=json".to_string()];
        if self.kernel {
            args.push("--dmesg".to_string());
        }
        if let Some(identifier) = &self.identifier {
            args.push(format!("--identifier={}", identifier));
        }
        match self.lookback {
            Some(lookback) => args.push(format!("--since=-{}s", lookback.as_secs().max(1))),
            None => args.push("--lines=0".to_string()),
        }
        args
    }

    fn is_running(running: &Arc<Mutex<bool>>) -> bool {
        *running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_running(running: &Arc<Mutex<bool>>, value: bool) {
        *running.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    /// Spawn the `journalctl` subprocess
    fn spawn_journalctl(args: &[String]) -> Result<Child, CollectorError> {
        debug!("Spawning journalctl {}", args.join(" "));

        let mut child = Command::new("journalctl")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CollectorError::SubprocessSpawn(format!("journalctl: {}", e)))?;

        // Non-blocking stdout so a stop request is noticed while idle
        if let Some(ref mut stdout) = child.stdout {
            #[cfg(unix)]
            {
                use std::os::unix::io::AsRawFd;
                let fd = stdout.as_raw_fd();
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                }
            }
        }

        Ok(child)
    }

    /// Supervisor loop: read from the current child, restart it when it dies
    fn reader_thread(
        args: Vec<String>,
        first_child: Child,
        channel: Sender<LogLine>,
        running: Arc<Mutex<bool>>,
    ) {
        let mut restart_delay = Duration::from_secs(1);
        let max_delay = Duration::from_secs(60);
        let mut consecutive_failures = 0;
        const MAX_CONSECUTIVE_FAILURES: u32 = 5;

        let mut next_child = Some(first_child);
        while Self::is_running(&running) {
            let spawned = match next_child.take() {
                Some(child) => Ok(child),
                None => Self::spawn_journalctl(&args),
            };

            match spawned {
                Ok(mut child) => {
                    match Self::process_stream(&mut child, &channel, &running) {
                        Ok(StreamEnd::Shutdown) => {
                            consecutive_failures = 0;
                            restart_delay = Duration::from_secs(1);
                        }
                        Ok(StreamEnd::ReceiverGone) => {
                            debug!("Journal line receiver dropped, stopping reader");
                            Self::set_running(&running, false);
                        }
                        Ok(StreamEnd::Eof) => {
                            warn!("journalctl exited: {:?}", child.try_wait());
                            consecutive_failures += 1;
                        }
                        Err(e) => {
                            error!("Error reading journal stream: {}", e);
                            consecutive_failures += 1;
                        }
                    }

                    if let Err(e) = child.kill() {
                        debug!("Failed to kill journalctl: {}", e);
                    }
                    let _ = child.wait();
                }
                Err(e) => {
                    error!("Failed to spawn journalctl: {}", e);
                    consecutive_failures += 1;
                }
            }

            if !Self::is_running(&running) {
                break;
            }

            let delay = if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                warn!(
                    "Too many consecutive journalctl failures ({}), entering degraded mode",
                    consecutive_failures
                );
                consecutive_failures = 0;
                restart_delay = Duration::from_secs(1);
                Duration::from_secs(60)
            } else {
                let delay = restart_delay;
                restart_delay = std::cmp::min(restart_delay * 2, max_delay);
                warn!(
                    "Restarting journalctl in {:?} (failure #{}/{})",
                    delay, consecutive_failures, MAX_CONSECUTIVE_FAILURES
                );
                delay
            };

            // Sleep in short slices to stay responsive to stop()
            let slice = Duration::from_millis(200);
            let mut remaining = delay;
            while remaining > Duration::ZERO && Self::is_running(&running) {
                let step = std::cmp::min(remaining, slice);
                thread::sleep(step);
                remaining = remaining.saturating_sub(step);
            }
        }

        info!("Journal reader thread finished");
    }

    /// Read complete lines from the child until EOF, shutdown or a dead receiver
    fn process_stream(
        child: &mut Child,
        channel: &Sender<LogLine>,
        running: &Arc<Mutex<bool>>,
    ) -> Result<StreamEnd, CollectorError> {
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollectorError::ParseError("No stdout available".to_string()))?;
        Self::read_entries(&mut stdout, channel, running)
    }

    /// Split a byte stream into lines and forward the parsed entries
    ///
    /// Lines are decoded only once complete, so a multibyte character split
    /// across two reads survives intact.
    fn read_entries(
        reader: &mut impl Read,
        channel: &Sender<LogLine>,
        running: &Arc<Mutex<bool>>,
    ) -> Result<StreamEnd, CollectorError> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut temp_buf = [0u8; 4096];

        loop {
            if !Self::is_running(running) {
                return Ok(StreamEnd::Shutdown);
            }

            match reader.read(&mut temp_buf) {
                Ok(0) => return Ok(StreamEnd::Eof),
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);

                    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();
                        let line = String::from_utf8_lossy(&raw);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match LogLine::from_journal_json(line) {
                            Ok(entry) => {
                                if channel.send(entry).is_err() {
                                    return Ok(StreamEnd::ReceiverGone);
                                }
                            }
                            Err(e) => debug!("Skipping journal entry: {}", e),
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(CollectorError::IoError(e)),
            }
        }
    }
}

/// Why a single subprocess read loop ended
enum StreamEnd {
    Eof,
    Shutdown,
    ReceiverGone,
}

impl LogWatcher for JournalWatcher {
    fn watch(&mut self) -> Result<Receiver<LogLine>, CollectorError> {
        if self.thread_handle.is_some() {
            return Err(CollectorError::SubprocessSpawn(
                "journal watcher already started".to_string(),
            ));
        }

        let args = self.arguments();
        // A spawn failure here means journald is unusable on this host.
        let child = Self::spawn_journalctl(&args)?;

        let (sender, receiver) = mpsc::channel();
        Self::set_running(&self.running, true);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("journal-watcher".to_string())
            .spawn(move || Self::reader_thread(args, child, sender, running))
            .map_err(CollectorError::IoError)?;

        self.thread_handle = Some(handle);
        info!("Journal watcher started (kernel: {})", self.kernel);
        Ok(receiver)
    }

    fn stop(&mut self) {
        Self::set_running(&self.running, false);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("Journal reader thread panicked");
            }
            info!("Journal watcher stopped");
        }
    }
}

impl Drop for JournalWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
