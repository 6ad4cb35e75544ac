// Logs module - stream mirroring, buffered writing, rotation

mod coordinator;
mod hooks;
mod mirror;
mod registry;
mod writer;

pub use coordinator::LogCoordinator;
pub use hooks::{ExitHooks, HookId};
pub use mirror::{ErrorPolicy, StreamMirror};
pub use registry::{SlotGuard, StreamKind, StreamRegistry};
pub use writer::RotatingFileWriter;
