use crate::error::Result;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use super::StreamMirror;

/// Identity of a mirrored process stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    /// Subfolder name used for this stream in split (non-merged) mode
    pub fn folder_name(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }

    /// Line tag written in front of this stream's log lines
    pub fn prefix(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "[STDOUT] ",
            StreamKind::Stderr => "[STDERR] ",
        }
    }
}

#[derive(Default)]
struct Slots {
    stdout: Option<Arc<StreamMirror>>,
    stderr: Option<Arc<StreamMirror>>,
}

impl Slots {
    fn slot_mut(&mut self, kind: StreamKind) -> &mut Option<Arc<StreamMirror>> {
        match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        }
    }

    fn slot(&self, kind: StreamKind) -> &Option<Arc<StreamMirror>> {
        match kind {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }
}

/// Process-wide registry of output stream slots
///
/// All application output is routed through here. Each slot either holds an
/// installed [`StreamMirror`] or falls through to the real stream, so
/// uninstalled slots behave exactly like an unmirrored process.
pub struct StreamRegistry {
    slots: Mutex<Slots>,
}

static GLOBAL: OnceLock<Arc<StreamRegistry>> = OnceLock::new();

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
        }
    }

    /// The process-wide registry instance
    pub fn global() -> Arc<StreamRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(StreamRegistry::new()))
            .clone()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install a mirror into a stream slot
    ///
    /// Fails when the slot is already occupied, so at most one mirror is
    /// ever active per stream. The returned guard restores the slot when
    /// dropped, on every exit path.
    pub fn install(
        self: &Arc<Self>,
        kind: StreamKind,
        mirror: Arc<StreamMirror>,
    ) -> Result<SlotGuard> {
        let mut slots = self.lock_slots();
        let slot = slots.slot_mut(kind);
        if slot.is_some() {
            return Err(crate::error::RoteeError::Other(format!(
                "A mirror is already installed for {}",
                kind.as_str()
            )));
        }
        *slot = Some(mirror);
        Ok(SlotGuard {
            registry: Arc::clone(self),
            kind,
        })
    }

    fn clear(&self, kind: StreamKind) -> Option<Arc<StreamMirror>> {
        self.lock_slots().slot_mut(kind).take()
    }

    /// Whether a mirror is currently installed for the stream
    pub fn is_redirected(&self, kind: StreamKind) -> bool {
        self.lock_slots().slot(kind).is_some()
    }

    /// Snapshot of the installed mirror, if any
    pub fn mirror(&self, kind: StreamKind) -> Option<Arc<StreamMirror>> {
        self.lock_slots().slot(kind).clone()
    }

    /// Write to a stream, through the installed mirror or directly
    ///
    /// The slot lock is only held to snapshot the mirror reference; the
    /// write itself runs without it.
    pub fn write(&self, kind: StreamKind, text: &str) -> Result<()> {
        let mirror = self.mirror(kind);
        match mirror {
            Some(mirror) => mirror.write(text),
            None => {
                write_direct(kind, text.as_bytes())?;
                Ok(())
            }
        }
    }

    /// Flush a stream, through the installed mirror or directly
    pub fn flush(&self, kind: StreamKind) -> Result<()> {
        let mirror = self.mirror(kind);
        match mirror {
            Some(mirror) => mirror.flush(),
            None => {
                flush_direct(kind)?;
                Ok(())
            }
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn write_direct(kind: StreamKind, bytes: &[u8]) -> io::Result<()> {
    match kind {
        StreamKind::Stdout => io::stdout().write_all(bytes),
        StreamKind::Stderr => io::stderr().write_all(bytes),
    }
}

fn flush_direct(kind: StreamKind) -> io::Result<()> {
    match kind {
        StreamKind::Stdout => io::stdout().flush(),
        StreamKind::Stderr => io::stderr().flush(),
    }
}

/// Scoped ownership of a stream slot
///
/// Dropping the guard uninstalls the mirror and restores direct output for
/// that stream.
pub struct SlotGuard {
    registry: Arc<StreamRegistry>,
    kind: StreamKind,
}

impl SlotGuard {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.clear(self.kind);
    }
}
