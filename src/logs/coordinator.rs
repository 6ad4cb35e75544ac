use crate::config::{LoggerConfig, LOG_FOLDER_BASE_NAME};
use crate::error::{Result, RoteeError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::{ExitHooks, HookId, RotatingFileWriter, SlotGuard, StreamKind, StreamMirror, StreamRegistry};

/// Name of the probe file used to test folder writability
const WRITE_PROBE: &str = ".rotee_write_test";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Running,
    Paused,
}

/// Writers retained across pause/resume so the exact same destinations are
/// reinstalled
struct RetainedSetup {
    stdout_writer: Arc<RotatingFileWriter>,
    stderr_writer: Arc<RotatingFileWriter>,
}

impl RetainedSetup {
    /// The distinct writers (one in merged mode, two in split mode)
    fn unique_writers(&self) -> Vec<Arc<RotatingFileWriter>> {
        let mut writers = vec![Arc::clone(&self.stdout_writer)];
        if !Arc::ptr_eq(&self.stdout_writer, &self.stderr_writer) {
            writers.push(Arc::clone(&self.stderr_writer));
        }
        writers
    }
}

struct CoordinatorState {
    phase: Phase,
    guards: Vec<SlotGuard>,
    retained: Option<RetainedSetup>,
    hook_ids: Vec<HookId>,
    resolved_folder: Option<PathBuf>,
}

/// Owns logging lifecycle: destination layout, mirror installation, and
/// pause/resume/stop semantics
///
/// Lock order is always coordinator before writer; writers never hold a
/// reference back to the coordinator, so the reverse order cannot occur.
/// Folder probing and writer flushing run with the coordinator lock
/// released.
pub struct LogCoordinator {
    config: LoggerConfig,
    registry: Arc<StreamRegistry>,
    hooks: Arc<ExitHooks>,
    state: Mutex<CoordinatorState>,
}

impl LogCoordinator {
    /// Create a coordinator over the process-wide stream registry and exit
    /// hook list
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_registry(config, StreamRegistry::global(), ExitHooks::global())
    }

    /// Create a coordinator over an explicit registry and hook list
    pub fn with_registry(
        config: LoggerConfig,
        registry: Arc<StreamRegistry>,
        hooks: Arc<ExitHooks>,
    ) -> Self {
        Self {
            config,
            registry,
            hooks,
            state: Mutex::new(CoordinatorState {
                phase: Phase::Stopped,
                guards: Vec::new(),
                retained: None,
                hook_ids: Vec::new(),
                resolved_folder: None,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin mirroring both output streams
    ///
    /// Resolves and probes the destination folder (falling back to the
    /// default folder if the requested one is unusable), builds writers per
    /// the merge policy, and atomically installs a mirror over each stream
    /// slot. Exit-time flush callables are registered by identity so `stop`
    /// can remove exactly those.
    ///
    /// # Errors
    /// `UnwritableDestination` when neither the requested nor the default
    /// folder accepts writes.
    pub fn start(&self) -> Result<()> {
        {
            let state = self.lock_state();
            match state.phase {
                Phase::Running => return Ok(()),
                Phase::Paused => {
                    drop(state);
                    self.resume()?;
                    return Ok(());
                }
                Phase::Stopped => {}
            }
        }

        if !self.config.write_to_file {
            debug!("file logging disabled, streams left untouched");
            return Ok(());
        }

        // Folder probing is disk I/O, done with no lock held
        let folder = self.resolve_destination()?;

        let (stdout_writer, stderr_writer) = self.build_writers(&folder);
        let retained = RetainedSetup {
            stdout_writer,
            stderr_writer,
        };

        // Slot substitution is the one operation done under the
        // coordinator lock, so no caller observes a half-installed state
        let mut state = self.lock_state();
        if state.phase != Phase::Stopped {
            return Ok(());
        }
        let guards = self.install_mirrors(&retained)?;
        let hook_ids = self.register_flush_hooks(&retained);

        state.guards = guards;
        state.hook_ids = hook_ids;
        state.retained = Some(retained);
        state.resolved_folder = Some(folder);
        state.phase = Phase::Running;
        Ok(())
    }

    /// Detach mirrors and restore direct output, keeping writers and
    /// configuration for a later `resume`
    ///
    /// Returns the new paused state. Idempotent.
    pub fn pause(&self) -> bool {
        let guards = {
            let mut state = self.lock_state();
            match state.phase {
                Phase::Paused => return true,
                Phase::Stopped => return false,
                Phase::Running => {}
            }
            state.phase = Phase::Paused;
            std::mem::take(&mut state.guards)
        };
        // Guard drops restore the stream slots
        drop(guards);
        true
    }

    /// Reinstall mirrors over the retained writers
    ///
    /// Returns the new paused state (false). Idempotent: resuming while
    /// running is a no-op.
    pub fn resume(&self) -> Result<bool> {
        let mut state = self.lock_state();
        match state.phase {
            Phase::Running => return Ok(false),
            Phase::Stopped => return Ok(false),
            Phase::Paused => {}
        }
        let retained = state
            .retained
            .as_ref()
            .ok_or_else(|| RoteeError::Other("No retained configuration to resume".to_string()))?;
        let guards = self.install_mirrors(retained)?;
        state.guards = guards;
        state.phase = Phase::Running;
        Ok(false)
    }

    /// Restore streams, flush and shut down writers, and unregister the
    /// exact exit hooks registered at `start`
    ///
    /// Idempotent: stopping while stopped is a no-op.
    pub fn stop(&self) -> Result<()> {
        let (guards, retained, hook_ids) = {
            let mut state = self.lock_state();
            if state.phase == Phase::Stopped {
                return Ok(());
            }
            state.phase = Phase::Stopped;
            state.resolved_folder = None;
            (
                std::mem::take(&mut state.guards),
                state.retained.take(),
                std::mem::take(&mut state.hook_ids),
            )
        };

        drop(guards);
        for id in hook_ids {
            self.hooks.unregister(id);
        }

        // Final flush and shutdown run with the coordinator lock released
        let mut result = Ok(());
        if let Some(retained) = retained {
            for writer in retained.unique_writers() {
                if let Err(e) = writer.shutdown() {
                    warn!(error = %e, "writer shutdown failed");
                    if result.is_ok() {
                        result = Err(e);
                    }
                }
            }
        }
        result
    }

    /// Flush all active writers
    pub fn flush(&self) -> Result<()> {
        let writers = {
            let state = self.lock_state();
            state
                .retained
                .as_ref()
                .map(|r| r.unique_writers())
                .unwrap_or_default()
        };
        for writer in writers {
            writer.flush()?;
        }
        Ok(())
    }

    /// True iff mirroring is active (not paused, not stopped)
    pub fn is_logging(&self) -> bool {
        self.lock_state().phase == Phase::Running
    }

    pub fn is_paused(&self) -> bool {
        self.lock_state().phase == Phase::Paused
    }

    /// True iff a mirror is currently installed for the stream; pausing
    /// uninstalls mirrors, so this is false while paused
    pub fn is_redirected(&self, kind: StreamKind) -> bool {
        self.registry.is_redirected(kind)
    }

    /// The destination folder resolved at start, while running or paused
    pub fn resolved_folder(&self) -> Option<PathBuf> {
        self.lock_state().resolved_folder.clone()
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    fn build_writers(
        &self,
        folder: &Path,
    ) -> (Arc<RotatingFileWriter>, Arc<RotatingFileWriter>) {
        let make = |stream_dir: Option<StreamKind>| {
            let writer = RotatingFileWriter::with_limits(
                folder,
                stream_dir,
                self.config.max_size_bytes,
                self.config.flush_threshold_bytes,
            );
            writer.set_override(self.config.override_existing);
            Arc::new(writer)
        };

        if self.config.merge_streams {
            let shared = make(None);
            (Arc::clone(&shared), shared)
        } else {
            (make(Some(StreamKind::Stdout)), make(Some(StreamKind::Stderr)))
        }
    }

    fn install_mirrors(&self, retained: &RetainedSetup) -> Result<Vec<SlotGuard>> {
        let stdout_mirror = Arc::new(StreamMirror::new(
            StreamKind::Stdout,
            Arc::clone(&retained.stdout_writer),
            self.config.error_policy,
            self.config.prefix_stdout,
        ));
        let stderr_mirror = Arc::new(StreamMirror::new(
            StreamKind::Stderr,
            Arc::clone(&retained.stderr_writer),
            self.config.error_policy,
            self.config.prefix_stderr,
        ));

        // If the second install fails, dropping the first guard restores
        // the stdout slot on the way out
        let stdout_guard = self.registry.install(StreamKind::Stdout, stdout_mirror)?;
        let stderr_guard = self.registry.install(StreamKind::Stderr, stderr_mirror)?;
        Ok(vec![stdout_guard, stderr_guard])
    }

    fn register_flush_hooks(&self, retained: &RetainedSetup) -> Vec<HookId> {
        retained
            .unique_writers()
            .into_iter()
            .map(|writer| {
                self.hooks.register(Box::new(move || {
                    let _ = writer.flush();
                }))
            })
            .collect()
    }

    /// Resolve, create, and probe the destination folder, falling back to
    /// the default folder when the requested one is unusable
    fn resolve_destination(&self) -> Result<PathBuf> {
        let requested = self
            .config
            .base_folder
            .clone()
            .unwrap_or_else(LoggerConfig::default_folder);

        match prepare_folder(&requested) {
            Ok(folder) => Ok(folder),
            Err(e) => {
                warn!(
                    requested = %requested.display(),
                    error = %e,
                    "requested log folder unusable, falling back to default"
                );
                let fallback = LoggerConfig::default_folder();
                prepare_folder(&fallback).map_err(|e2| {
                    RoteeError::UnwritableDestination(format!(
                        "{} (requested), {} (default)",
                        e, e2
                    ))
                })
            }
        }
    }
}

/// Normalize a base folder, create it, and verify it accepts writes
///
/// A path whose final component is not the log folder base name gets it
/// appended, so `data` becomes `data/logs`. Over-long paths are rejected.
fn prepare_folder(requested: &Path) -> Result<PathBuf> {
    let mut candidate = requested.to_path_buf();
    let needs_base = candidate
        .file_name()
        .map(|name| name != LOG_FOLDER_BASE_NAME)
        .unwrap_or(true);
    if needs_base {
        candidate = candidate.join(LOG_FOLDER_BASE_NAME);
    }

    if candidate.as_os_str().len() > 255 {
        return Err(RoteeError::Config(format!(
            "Path too long: {}",
            candidate.display()
        )));
    }

    fs::create_dir_all(&candidate)?;

    // Write-permission probe: create and remove a marker file
    let probe = candidate.join(WRITE_PROBE);
    fs::write(&probe, b"x")?;
    fs::remove_file(&probe)?;

    Ok(candidate)
}
