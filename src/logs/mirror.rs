use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

use super::{RotatingFileWriter, StreamKind};

/// Tag prepended to the mirror's own diagnostics on the alternate stream
const MODULE_NAME: &str = "[rotee]";

/// Behavior when the mirrored terminal stream hits a broken pipe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Report on the alternate stream and keep going
    #[default]
    WarnAndContinue,
    /// Report and terminate the process on the calling thread
    WarnAndExit,
}

/// Duplicates writes to a terminal stream and a [`RotatingFileWriter`]
///
/// Everything runs on the caller's thread: the terminal echo happens first,
/// then the text is forwarded to the writer's buffer. No background thread
/// is involved, so terminal output ordering is identical to an unmirrored
/// process.
///
/// With `prefix` enabled every line forwarded to the file is tagged with
/// the stream's marker (`[STDOUT] ` or `[STDERR] `), which keeps merged
/// files attributable per stream. The terminal copy is never tagged.
pub struct StreamMirror {
    target: StreamKind,
    original: Mutex<Box<dyn Write + Send>>,
    writer: Arc<RotatingFileWriter>,
    error_policy: ErrorPolicy,
    prefix: bool,
    /// Whether the next forwarded byte starts a new log line
    at_line_start: AtomicBool,
}

impl StreamMirror {
    /// Create a mirror over the real stream for `target`
    pub fn new(
        target: StreamKind,
        writer: Arc<RotatingFileWriter>,
        error_policy: ErrorPolicy,
        prefix: bool,
    ) -> Self {
        let sink: Box<dyn Write + Send> = match target {
            StreamKind::Stdout => Box::new(io::stdout()),
            StreamKind::Stderr => Box::new(io::stderr()),
        };
        Self::with_sink(target, sink, writer, error_policy, prefix)
    }

    /// Create a mirror over an arbitrary terminal sink
    pub fn with_sink(
        target: StreamKind,
        sink: Box<dyn Write + Send>,
        writer: Arc<RotatingFileWriter>,
        error_policy: ErrorPolicy,
        prefix: bool,
    ) -> Self {
        Self {
            target,
            original: Mutex::new(sink),
            writer,
            error_policy,
            prefix,
            at_line_start: AtomicBool::new(true),
        }
    }

    fn lock_original(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.original.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Echo `text` to the terminal, then forward it to the file writer
    ///
    /// Only I/O faults on the terminal side are intercepted: a broken pipe
    /// is handled per the configured [`ErrorPolicy`], any other write error
    /// is reported and execution continues. The text is forwarded to the
    /// writer unconditionally; buffering failures there are the writer's
    /// concern and are returned to the caller.
    pub fn write(&self, text: &str) -> Result<()> {
        let echo = self.lock_original().write_all(text.as_bytes());
        if let Err(e) = echo {
            if e.kind() == io::ErrorKind::BrokenPipe {
                self.handle_broken_pipe();
            } else {
                eprintln!(
                    "{} I/O error writing to original {} stream: {}",
                    MODULE_NAME,
                    self.target.as_str(),
                    e
                );
            }
        }

        if self.prefix {
            self.writer.write(&self.tag_lines(text))
        } else {
            self.writer.write(text)
        }
    }

    // Insert the stream tag wherever `text` starts a new log line; a write
    // that ends mid-line leaves the next write untagged
    fn tag_lines(&self, text: &str) -> String {
        let tag = self.target.prefix();
        let mut tagged = String::with_capacity(text.len() + tag.len());
        let mut at_start = self.at_line_start.load(Ordering::Relaxed);
        for piece in text.split_inclusive('\n') {
            if at_start {
                tagged.push_str(tag);
            }
            tagged.push_str(piece);
            at_start = piece.ends_with('\n');
        }
        if !text.is_empty() {
            self.at_line_start.store(at_start, Ordering::Relaxed);
        }
        tagged
    }

    /// Flush the file writer, then best-effort flush the terminal
    ///
    /// Writer-side flush failures propagate; terminal flush faults are
    /// reported and swallowed, flushing a terminal is not safety-critical.
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()?;
        if let Err(e) = self.lock_original().flush() {
            warn!(
                stream = self.target.as_str(),
                error = %e,
                "failed to flush original stream"
            );
        }
        Ok(())
    }

    pub fn target(&self) -> StreamKind {
        self.target
    }

    /// The file writer this mirror forwards to
    pub fn writer(&self) -> &Arc<RotatingFileWriter> {
        &self.writer
    }

    fn handle_broken_pipe(&self) {
        eprintln!(
            "{} Broken pipe on {}",
            MODULE_NAME,
            self.target.as_str()
        );
        if self.error_policy == ErrorPolicy::WarnAndExit {
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// A Write sink backed by shared memory, so tests can observe echoes
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A sink whose writes always fail with a broken pipe
    struct BrokenPipeSink;

    impl Write for BrokenPipeSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn collect_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        let mut files = Vec::new();
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    files.extend(collect_files(&path));
                } else {
                    files.push(path);
                }
            }
        }
        files
    }

    #[test]
    fn test_write_echoes_and_forwards() {
        let temp_dir = TempDir::new().unwrap();
        let writer = Arc::new(RotatingFileWriter::new(temp_dir.path(), None));
        let sink = SharedSink::default();
        let mirror = StreamMirror::with_sink(
            StreamKind::Stdout,
            Box::new(sink.clone()),
            writer,
            ErrorPolicy::WarnAndContinue,
            false,
        );

        mirror.write("hello\n").unwrap();

        // Terminal sees the text immediately
        assert_eq!(sink.contents(), "hello\n");
        // The file side is still buffered
        assert!(collect_files(temp_dir.path()).is_empty());

        mirror.flush().unwrap();
        let files = collect_files(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "hello\n");
    }

    #[test]
    fn test_broken_pipe_warn_and_continue_still_logs() {
        let temp_dir = TempDir::new().unwrap();
        let writer = Arc::new(RotatingFileWriter::new(temp_dir.path(), None));
        let mirror = StreamMirror::with_sink(
            StreamKind::Stdout,
            Box::new(BrokenPipeSink),
            writer,
            ErrorPolicy::WarnAndContinue,
            false,
        );

        // The terminal write fails, but the text still reaches the file
        mirror.write("survives\n").unwrap();
        mirror.flush().unwrap();

        let files = collect_files(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "survives\n");
    }

    #[test]
    fn test_write_after_writer_shutdown_fails() {
        let temp_dir = TempDir::new().unwrap();
        let writer = Arc::new(RotatingFileWriter::new(temp_dir.path(), None));
        let sink = SharedSink::default();
        let mirror = StreamMirror::with_sink(
            StreamKind::Stderr,
            Box::new(sink.clone()),
            Arc::clone(&writer),
            ErrorPolicy::WarnAndContinue,
            false,
        );

        writer.shutdown().unwrap();
        assert!(mirror.write("late\n").is_err());
        // The echo still happened before the writer rejected the text
        assert_eq!(sink.contents(), "late\n");
    }

    #[test]
    fn test_shared_writer_across_mirrors() {
        let temp_dir = TempDir::new().unwrap();
        let writer = Arc::new(RotatingFileWriter::new(temp_dir.path(), None));
        let out = StreamMirror::with_sink(
            StreamKind::Stdout,
            Box::new(SharedSink::default()),
            Arc::clone(&writer),
            ErrorPolicy::WarnAndContinue,
            false,
        );
        let err = StreamMirror::with_sink(
            StreamKind::Stderr,
            Box::new(SharedSink::default()),
            Arc::clone(&writer),
            ErrorPolicy::WarnAndContinue,
            false,
        );

        // Merged mode: both mirrors feed one file
        out.write("a").unwrap();
        err.write("b").unwrap();
        out.flush().unwrap();

        let files = collect_files(temp_dir.path());
        assert_eq!(files.len(), 1);
        assert_eq!(fs::read_to_string(&files[0]).unwrap(), "ab");
    }

    #[test]
    fn test_prefix_tags_merged_file_per_stream() {
        let temp_dir = TempDir::new().unwrap();
        let writer = Arc::new(RotatingFileWriter::new(temp_dir.path(), None));
        let out_sink = SharedSink::default();
        let out = StreamMirror::with_sink(
            StreamKind::Stdout,
            Box::new(out_sink.clone()),
            Arc::clone(&writer),
            ErrorPolicy::WarnAndContinue,
            true,
        );
        let err = StreamMirror::with_sink(
            StreamKind::Stderr,
            Box::new(SharedSink::default()),
            Arc::clone(&writer),
            ErrorPolicy::WarnAndContinue,
            true,
        );

        out.write("out line\n").unwrap();
        err.write("err line\n").unwrap();
        out.flush().unwrap();

        // The file copy carries the stream tags, the terminal does not
        assert_eq!(out_sink.contents(), "out line\n");
        let files = collect_files(temp_dir.path());
        assert_eq!(
            fs::read_to_string(&files[0]).unwrap(),
            "[STDOUT] out line\n[STDERR] err line\n"
        );
    }

    #[test]
    fn test_prefix_only_at_line_starts() {
        let temp_dir = TempDir::new().unwrap();
        let writer = Arc::new(RotatingFileWriter::new(temp_dir.path(), None));
        let mirror = StreamMirror::with_sink(
            StreamKind::Stdout,
            Box::new(SharedSink::default()),
            Arc::clone(&writer),
            ErrorPolicy::WarnAndContinue,
            true,
        );

        // A write ending mid-line leaves the following write untagged
        mirror.write("par").unwrap();
        mirror.write("tial\nnext\n").unwrap();
        mirror.flush().unwrap();

        let files = collect_files(temp_dir.path());
        assert_eq!(
            fs::read_to_string(&files[0]).unwrap(),
            "[STDOUT] partial\n[STDOUT] next\n"
        );
    }
}
