use parking_lot::RwLock;
use std::sync::Arc;

/// Source position of a stopped thread, taken from its innermost frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub class_name: &'static str,
    pub function_name: &'static str,
    pub file_name: Option<&'static str>,
    pub line: u32,
}

/// Debugger event notifications.
///
/// Installed once by the debugger thread. `on_stop`/`on_resume` are invoked
/// from the stopping worker thread itself, strictly paired per thread; stops
/// of different threads may interleave. Errors returned by a hook are logged
/// and never propagate into the worker.
pub trait EventHook: Send + Sync {
    fn on_stop(&self, thread_number: i32, place: Option<Place>) -> anyhow::Result<()>;
    fn on_resume(&self, thread_number: i32) -> anyhow::Result<()>;
    fn on_thread_created(&self, thread_number: i32);
    fn on_thread_terminated(&self, thread_number: i32);
}

pub(crate) type SharedHook = RwLock<Option<Arc<dyn EventHook>>>;

/// A scope during which the host garbage collector may advance without the
/// cooperation of the current thread. Entered around every blocking wait so
/// a suspended worker does not stall collection.
pub trait GcFreeZone: Send + Sync {
    fn enter(&self);
    fn exit(&self);
}

/// Default zone for hosts without a cooperative collector.
pub struct NopGcZone;

impl GcFreeZone for NopGcZone {
    fn enter(&self) {}
    fn exit(&self) {}
}
