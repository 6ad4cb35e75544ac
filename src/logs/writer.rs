use crate::config::{DEFAULT_FLUSH_THRESHOLD, DEFAULT_MAX_SIZE, FILE_DATE_FORMAT};
use crate::error::{Result, RoteeError};
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::StreamKind;

/// A currently open log file
struct OpenLog {
    handle: File,
    path: PathBuf,
    /// Bytes durably written to `handle` since it was opened
    written_bytes: u64,
}

struct WriterState {
    /// Text queued since the last flush; byte length measured as UTF-8
    pending: String,
    file: Option<OpenLog>,
    closed: bool,
    max_size_bytes: u64,
    flush_threshold_bytes: u64,
    /// Truncate files on open instead of appending
    truncate: bool,
    /// Root folder under which the date layout is derived
    root: PathBuf,
    /// Per-stream subfolder under the date folder, when not merged
    stream_dir: Option<StreamKind>,
    /// Incremented by set_path so an in-flight flush does not reinstall a
    /// handle that points at the old destination
    path_epoch: u64,
}

/// Buffered file writer that rotates by size and calendar date
///
/// Writes accumulate in an in-memory buffer and only reach disk when the
/// flush threshold is crossed or `flush()` is called explicitly. Files live
/// under `root/YYYY/MM/DD[/stdout|stderr]/` and are named by timestamp; a
/// new file is opened once the current one reaches the maximum size.
///
/// Two locks are involved: the state lock guards the buffer and counters
/// and is never held across disk I/O; the flush gate serializes flush and
/// rotation I/O and is always acquired before the state lock.
pub struct RotatingFileWriter {
    state: Mutex<WriterState>,
    flush_gate: Mutex<()>,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicU32,
}

impl RotatingFileWriter {
    /// Create a writer with default size limits
    ///
    /// No file is opened until the first flush.
    pub fn new(root: impl Into<PathBuf>, stream_dir: Option<StreamKind>) -> Self {
        Self::with_limits(root, stream_dir, DEFAULT_MAX_SIZE, DEFAULT_FLUSH_THRESHOLD)
    }

    /// Create a writer with explicit rotation and flush thresholds
    ///
    /// # Arguments
    /// * `root` - Base folder for the date layout
    /// * `stream_dir` - Optional per-stream subfolder (split mode)
    /// * `max_size_bytes` - File size at which rotation happens
    /// * `flush_threshold_bytes` - Buffered bytes that trigger a flush
    pub fn with_limits(
        root: impl Into<PathBuf>,
        stream_dir: Option<StreamKind>,
        max_size_bytes: u64,
        flush_threshold_bytes: u64,
    ) -> Self {
        Self {
            state: Mutex::new(WriterState {
                pending: String::new(),
                file: None,
                closed: false,
                max_size_bytes,
                flush_threshold_bytes,
                truncate: false,
                root: root.into(),
                stream_dir,
                path_epoch: 0,
            }),
            flush_gate: Mutex::new(()),
            #[cfg(test)]
            fail_writes: std::sync::atomic::AtomicU32::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue text for writing
    ///
    /// Appends to the pending buffer under the state lock; no disk I/O
    /// happens here unless this write crosses the flush threshold, in which
    /// case the flush runs on the calling thread after the lock is
    /// released.
    ///
    /// # Errors
    /// Returns `ClosedWriter` if the writer has been shut down.
    pub fn write(&self, text: &str) -> Result<()> {
        let should_flush = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(RoteeError::ClosedWriter);
            }
            state.pending.push_str(text);
            state.pending.len() as u64 >= state.flush_threshold_bytes
        };

        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the pending buffer to disk and evaluate rotation
    ///
    /// Swap-buffer pattern: the buffer is detached under the state lock and
    /// written with no lock held, so concurrent writers are only ever
    /// blocked for the O(1) swap. A failed disk write is retried once with
    /// the identical chunk; if the retry also fails the chunk is re-merged
    /// at the front of the pending buffer and `Flush` is returned, so no
    /// buffered data is lost.
    pub fn flush(&self) -> Result<()> {
        let _gate = self
            .flush_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Detach the buffer and handle under the state lock
        let (chunk, file, snapshot) = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(RoteeError::ClosedWriter);
            }
            if state.pending.is_empty() {
                return Ok(());
            }
            let chunk = mem::take(&mut state.pending);
            let file = state.file.take();
            let snapshot = FlushSnapshot {
                max_size_bytes: state.max_size_bytes,
                truncate: state.truncate,
                root: state.root.clone(),
                stream_dir: state.stream_dir,
                path_epoch: state.path_epoch,
            };
            (chunk, file, snapshot)
        };

        // All disk I/O happens here, with no lock held. In append mode the
        // first open continues the day's newest file from a prior session.
        let mut log = match file {
            Some(log) => log,
            None => match open_log(
                &snapshot.root,
                snapshot.stream_dir,
                snapshot.truncate,
                !snapshot.truncate,
            ) {
                Ok(log) => log,
                Err(e) => {
                    self.restore_pending(chunk, None, snapshot.path_epoch);
                    return Err(e);
                }
            },
        };

        if !chunk.is_empty() {
            if let Err(first) = self.disk_write(&mut log.handle, chunk.as_bytes()) {
                warn!(
                    path = %log.path.display(),
                    error = %first,
                    "log write failed, retrying once"
                );
                if let Err(second) = self.disk_write(&mut log.handle, chunk.as_bytes()) {
                    self.restore_pending(chunk, Some(log), snapshot.path_epoch);
                    return Err(RoteeError::Flush(second.to_string()));
                }
            }
            log.written_bytes += chunk.len() as u64;
        }

        // Rotation check: only ever after a completed flush, so the old
        // file keeps everything that was buffered for it
        if log.written_bytes >= snapshot.max_size_bytes {
            debug!(
                path = %log.path.display(),
                written = log.written_bytes,
                "rotating log file"
            );
            drop(log);
            // Rotation always moves to a fresh file, never back into the
            // one that just filled up
            log = open_log(&snapshot.root, snapshot.stream_dir, snapshot.truncate, false)?;
        }

        // Commit the handle back, unless the destination changed meanwhile
        let mut state = self.lock_state();
        if state.path_epoch == snapshot.path_epoch && state.file.is_none() {
            state.file = Some(log);
        }
        Ok(())
    }

    /// Flush pending content and close the writer
    ///
    /// Subsequent `write`/`flush` calls fail with `ClosedWriter`.
    pub fn shutdown(&self) -> Result<()> {
        let flush_result = self.flush();
        let old = {
            let mut state = self.lock_state();
            state.closed = true;
            state.file.take()
        };
        drop(old);
        flush_result
    }

    /// Change the maximum file size; applies to the next flush decision
    pub fn set_max_size(&self, max_size_bytes: u64) {
        self.lock_state().max_size_bytes = max_size_bytes;
    }

    /// Change the flush threshold; applies to the next write
    pub fn set_flush_threshold(&self, flush_threshold_bytes: u64) {
        self.lock_state().flush_threshold_bytes = flush_threshold_bytes;
    }

    /// Choose between starting a fresh file and continuing an existing one
    ///
    /// With `truncate` unset (the default) the first flush of a session
    /// appends to the day's newest log file when one exists; with it set,
    /// every open creates a fresh file.
    pub fn set_override(&self, truncate: bool) {
        self.lock_state().truncate = truncate;
    }

    /// Point the writer at a new root folder
    ///
    /// The current handle is closed; the next flush opens a file under the
    /// new folder's date layout.
    pub fn set_path(&self, root: impl Into<PathBuf>) {
        let old = {
            let mut state = self.lock_state();
            state.root = root.into();
            state.path_epoch += 1;
            state.file.take()
        };
        // Close the old handle outside the lock
        drop(old);
    }

    /// Path of the currently open file, if one is open
    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock_state().file.as_ref().map(|f| f.path.clone())
    }

    /// Bytes durably written to the current file
    pub fn written_bytes(&self) -> u64 {
        self.lock_state()
            .file
            .as_ref()
            .map(|f| f.written_bytes)
            .unwrap_or(0)
    }

    /// Byte length of the pending (unflushed) buffer
    pub fn pending_bytes(&self) -> u64 {
        self.lock_state().pending.len() as u64
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    // Re-merge a detached chunk at the front of the pending buffer after a
    // failed flush, and reinstall the handle if one was detached
    fn restore_pending(&self, chunk: String, file: Option<OpenLog>, epoch: u64) {
        let mut state = self.lock_state();
        state.pending.insert_str(0, &chunk);
        if state.path_epoch == epoch && state.file.is_none() {
            state.file = file;
        }
    }

    fn disk_write(&self, handle: &mut File, bytes: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            if self.fail_writes.load(Ordering::SeqCst) > 0 {
                self.fail_writes.fetch_sub(1, Ordering::SeqCst);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected write failure",
                ));
            }
        }
        handle.write_all(bytes)?;
        handle.flush()
    }

    /// Make the next `n` disk writes fail, for failure-path tests
    #[cfg(test)]
    fn inject_write_failures(&self, n: u32) {
        self.fail_writes
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }
}

/// Directory for the current date under the root: `root/YYYY/MM/DD[/stream]`
fn log_dir(root: &Path, stream_dir: Option<StreamKind>, now: DateTime<Local>) -> PathBuf {
    let mut dir = root
        .join(now.format("%Y").to_string())
        .join(now.format("%m").to_string())
        .join(now.format("%d").to_string());
    if let Some(kind) = stream_dir {
        dir = dir.join(kind.folder_name());
    }
    dir
}

/// Timestamp-named path in `dir` that does not collide with an existing
/// file; rotations within the same second get a numeric suffix
fn unique_log_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = now.format(FILE_DATE_FORMAT).to_string();
    let mut candidate = dir.join(format!("{}.log", stem));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{}_{}.log", stem, n));
        n += 1;
    }
    candidate
}

/// Newest log file already present in `dir`; timestamp-named files sort
/// chronologically by name
fn newest_log(dir: &Path) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "log"))
        .max()
}

fn open_log(
    root: &Path,
    stream_dir: Option<StreamKind>,
    truncate: bool,
    reuse_existing: bool,
) -> Result<OpenLog> {
    let now = Local::now();
    let dir = log_dir(root, stream_dir, now);
    fs::create_dir_all(&dir)?;

    let path = if reuse_existing {
        newest_log(&dir).unwrap_or_else(|| unique_log_path(&dir, now))
    } else {
        unique_log_path(&dir, now)
    };
    let mut options = OpenOptions::new();
    options.create(true);
    if truncate {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    let handle = options.open(&path)?;

    let written_bytes = handle.metadata().map(|m| m.len()).unwrap_or(0);
    Ok(OpenLog {
        handle,
        path,
        written_bytes,
    })
}

struct FlushSnapshot {
    max_size_bytes: u64,
    truncate: bool,
    root: PathBuf,
    stream_dir: Option<StreamKind>,
    path_epoch: u64,
}
