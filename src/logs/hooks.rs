use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

type Hook = Box<dyn Fn() + Send + Sync>;

/// Identity of a registered exit hook
///
/// Unregistration goes through this id, so the coordinator removes exactly
/// the callables it registered and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

/// Registrable list of best-effort exit-time callbacks
///
/// The hosting process decides when to run these (normal exit, Ctrl-C).
/// Running them provides no cross-process durability guarantee.
pub struct ExitHooks {
    hooks: Mutex<Vec<(u64, Arc<dyn Fn() + Send + Sync>)>>,
    next_id: AtomicU64,
}

static GLOBAL: OnceLock<Arc<ExitHooks>> = OnceLock::new();

impl ExitHooks {
    pub fn new() -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide hook list
    pub fn global() -> Arc<ExitHooks> {
        GLOBAL.get_or_init(|| Arc::new(ExitHooks::new())).clone()
    }

    /// Register a callback, returning its identity
    pub fn register(&self, hook: Hook) -> HookId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::from(hook)));
        HookId(id)
    }

    /// Remove a previously registered callback by identity
    ///
    /// Returns false when the id is unknown (already unregistered).
    pub fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id.0);
        hooks.len() < before
    }

    /// Run every registered callback, in registration order
    ///
    /// The list is snapshotted and the lock released before any callback
    /// runs, so callbacks may do slow I/O and may register or unregister
    /// hooks themselves. Hooks registered during a run join the next one.
    pub fn run(&self) {
        let snapshot: Vec<Arc<dyn Fn() + Send + Sync>> = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in snapshot {
            hook();
        }
    }

    pub fn len(&self) -> usize {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ExitHooks {
    fn default() -> Self {
        Self::new()
    }
}
