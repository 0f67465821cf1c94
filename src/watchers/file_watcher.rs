use crate::error::CollectorError;
use crate::watchers::{LogLine, LogWatcher};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Follows a plain text log file from its current end
///
/// Lines carry the time they were read. Truncation and rotation are detected
/// on every poll and cause the file to be reopened from the start.
pub struct FileWatcher {
    path: PathBuf,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
}

/// Open file plus the read position we have consumed up to
struct Cursor {
    reader: BufReader<File>,
    position: u64,
    #[cfg(unix)]
    inode: u64,
}

impl Cursor {
    fn open(path: &Path, from_end: bool) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        let mut reader = BufReader::new(file);
        let position = if from_end {
            reader.seek(SeekFrom::End(0))?
        } else {
            0
        };

        Ok(Self {
            reader,
            position,
            #[cfg(unix)]
            inode: {
                use std::os::unix::fs::MetadataExt;
                metadata.ino()
            },
        })
    }

    /// True if the file on disk is no longer the one we are reading
    fn replaced(&self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(metadata) => {
                if metadata.len() < self.position {
                    return true;
                }
                #[cfg(unix)]
                {
                    use std::os::unix::fs::MetadataExt;
                    if metadata.ino() != self.inode {
                        return true;
                    }
                }
                false
            }
            // Rotated away and not recreated yet; keep draining the old handle.
            Err(_) => false,
        }
    }

    /// Read every complete line appended since the last call
    ///
    /// Bytes that are not valid UTF-8 are replaced, never rejected, so one
    /// bad byte cannot stall or rewind the cursor.
    fn read_lines(&mut self) -> std::io::Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = self.reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                // Partial line; rewind and wait for the writer to finish it.
                self.reader.seek(SeekFrom::Start(self.position))?;
                break;
            }
            self.position += read as u64;
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\n', '\r']).to_string());
        }
        Ok(lines)
    }
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            thread_handle: None,
            running: Arc::new(Mutex::new(false)),
        }
    }

    fn is_running(running: &Arc<Mutex<bool>>) -> bool {
        *running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_running(running: &Arc<Mutex<bool>>, value: bool) {
        *running.lock().unwrap_or_else(|e| e.into_inner()) = value;
    }

    fn reader_thread(
        path: PathBuf,
        mut cursor: Cursor,
        channel: Sender<LogLine>,
        running: Arc<Mutex<bool>>,
    ) {
        while Self::is_running(&running) {
            match cursor.read_lines() {
                Ok(lines) => {
                    for message in lines {
                        let line = LogLine {
                            timestamp: Utc::now(),
                            message,
                        };
                        if channel.send(line).is_err() {
                            debug!("Log line receiver for {} dropped", path.display());
                            Self::set_running(&running, false);
                            return;
                        }
                    }
                }
                Err(e) => warn!("Error reading {}: {}", path.display(), e),
            }

            if cursor.replaced(&path) {
                match Cursor::open(&path, false) {
                    Ok(reopened) => {
                        info!("{} was truncated or rotated, reopening", path.display());
                        cursor = reopened;
                        continue;
                    }
                    Err(e) => debug!("Could not reopen {}: {}", path.display(), e),
                }
            }

            thread::sleep(POLL_INTERVAL);
        }

        info!("File watcher for {} finished", path.display());
    }
}

impl LogWatcher for FileWatcher {
    fn watch(&mut self) -> Result<Receiver<LogLine>, CollectorError> {
        if self.thread_handle.is_some() {
            return Err(CollectorError::SourceClosed(format!(
                "{} is already being watched",
                self.path.display()
            )));
        }

        let cursor = Cursor::open(&self.path, true)?;
        let (sender, receiver) = mpsc::channel();
        Self::set_running(&self.running, true);

        let path = self.path.clone();
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("file-watcher".to_string())
            .spawn(move || Self::reader_thread(path, cursor, sender, running))?;

        self.thread_handle = Some(handle);
        info!("Watching log file {}", self.path.display());
        Ok(receiver)
    }

    fn stop(&mut self) {
        Self::set_running(&self.running, false);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("File watcher thread for {} panicked", self.path.display());
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
