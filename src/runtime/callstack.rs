use crate::runtime::hook::{GcFreeZone, Place, SharedHook};
use crate::weak_error;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

/// Execution status of one application thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadStatus {
    Running = 0,
    StoppedBreakpoint = 1,
    StoppedBreakImmediate = 2,
    StoppedCriticalError = 3,
    Invalid = 4,
}

impl ThreadStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ThreadStatus::Running,
            1 => ThreadStatus::StoppedBreakpoint,
            2 => ThreadStatus::StoppedBreakImmediate,
            3 => ThreadStatus::StoppedCriticalError,
            _ => ThreadStatus::Invalid,
        }
    }
}

/// Compiler-emitted description of one function, shared by all its
/// activations. Name fields refer to the identifier table entries, which
/// keeps probe-side comparisons at pointer identity.
#[derive(Debug)]
pub struct FrameMeta {
    pub class_name: &'static str,
    pub function_name: &'static str,
    pub full_name: &'static str,
    /// `None` (or a name starting with '?') marks generated code without a
    /// real source file.
    pub file_name: Option<&'static str>,
    pub first_line: u32,
}

/// One local variable of a live frame. The reader and writer operate on the
/// variable's live location; they are invoked by the debugger thread only
/// while the owning thread is suspended (or under an explicitly unsafe
/// inspection).
pub struct StackVariable<V> {
    name: &'static str,
    read: Box<dyn Fn() -> V + Send + Sync>,
    write: Box<dyn Fn(V) + Send + Sync>,
}

impl<V> StackVariable<V> {
    pub fn new<R, W>(name: &'static str, read: R, write: W) -> Self
    where
        R: Fn() -> V + Send + Sync + 'static,
        W: Fn(V) + Send + Sync + 'static,
    {
        Self {
            name,
            read: Box::new(read),
            write: Box::new(write),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn read(&self) -> V {
        (self.read)()
    }

    pub(crate) fn write(&self, value: V) {
        (self.write)(value)
    }
}

/// A catch clause of a live frame, carrying the predicate that decides
/// whether it accepts a thrown value.
pub struct Catchable<V> {
    catches: Box<dyn Fn(&V) -> bool + Send + Sync>,
}

impl<V> Catchable<V> {
    pub fn new<P>(catches: P) -> Self
    where
        P: Fn(&V) -> bool + Send + Sync + 'static,
    {
        Self {
            catches: Box::new(catches),
        }
    }

    pub(crate) fn catches(&self, exception: &V) -> bool {
        (self.catches)(exception)
    }
}

/// One activation record. Owned by the thread's call stack and shared with
/// the debugger thread through `Arc` while it inspects a suspended thread.
pub(crate) struct Frame<V> {
    pub meta: &'static FrameMeta,
    pub line: AtomicU32,
    pub variables: Vec<StackVariable<V>>,
    pub catchables: Vec<Catchable<V>>,
}

impl<V> Frame<V> {
    pub fn new(
        meta: &'static FrameMeta,
        variables: Vec<StackVariable<V>>,
        catchables: Vec<Catchable<V>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            meta,
            line: AtomicU32::new(meta.first_line),
            variables,
            catchables,
        })
    }

    pub fn current_line(&self) -> u32 {
        self.line.load(Ordering::Relaxed)
    }

    pub fn place(&self) -> Place {
        Place {
            class_name: self.meta.class_name,
            function_name: self.meta.function_name,
            file_name: self.meta.file_name,
            line: self.current_line(),
        }
    }

    pub fn format(&self) -> String {
        format_frame(self.meta, self.current_line())
    }
}

/// Formats one frame for stack listings and exception traces. Frames without
/// a real source file keep the short form.
fn format_frame(meta: &FrameMeta, line: u32) -> String {
    match meta.file_name {
        None => format!("{}::{}", meta.class_name, meta.function_name),
        Some(file) if file.starts_with('?') => {
            format!("{}::{}", meta.class_name, meta.function_name)
        }
        Some(file) => format!(
            "{}::{}::{}::{}",
            meta.class_name, meta.function_name, file, line
        ),
    }
}

struct WaitState {
    waiting: bool,
    /// Residual count from a `continue N`; positive values absorb the next
    /// breakpoint stops.
    continue_count: u32,
}

/// Call-stack tracker of one application thread.
///
/// Frames and the exception stack are written only by the owning thread (the
/// worker handle is not `Send`, which pins every writer to that thread); the
/// debugger thread reads them while the owner is suspended in
/// [`CallStack::do_break`]. The wait mutex plus condvar form the one-shot
/// rendezvous between a stopping worker and the debugger's continue.
pub(crate) struct CallStack<V> {
    thread_number: i32,
    can_stop: AtomicBool,
    status: AtomicU8,
    /// Last hit breakpoint id, -1 when none.
    breakpoint_id: AtomicI32,
    critical_error: Mutex<Option<String>>,
    frames: Mutex<Vec<Arc<Frame<V>>>>,
    /// Frame strings captured while a thrown exception unwinds the stack.
    exception_stack: Mutex<Vec<String>>,
    wait: Mutex<WaitState>,
    resumed: Condvar,
}

impl<V> CallStack<V> {
    pub fn new(thread_number: i32) -> Self {
        Self {
            thread_number,
            can_stop: AtomicBool::new(true),
            status: AtomicU8::new(ThreadStatus::Running as u8),
            breakpoint_id: AtomicI32::new(-1),
            critical_error: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
            exception_stack: Mutex::new(Vec::new()),
            wait: Mutex::new(WaitState {
                waiting: false,
                continue_count: 0,
            }),
            resumed: Condvar::new(),
        }
    }

    pub fn thread_number(&self) -> i32 {
        self.thread_number
    }

    pub fn status(&self) -> ThreadStatus {
        ThreadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn breakpoint_id(&self) -> i32 {
        self.breakpoint_id.load(Ordering::Relaxed)
    }

    pub fn critical_error(&self) -> Option<String> {
        self.critical_error.lock().clone()
    }

    pub fn can_stop(&self) -> bool {
        self.can_stop.load(Ordering::Relaxed)
    }

    pub fn set_can_stop(&self, enable: bool) {
        self.can_stop.store(enable, Ordering::Relaxed);
    }

    /// Index of the innermost frame, -1 for an empty stack.
    pub fn depth(&self) -> i32 {
        self.frames.lock().len() as i32 - 1
    }

    pub fn push_frame(&self, frame: Arc<Frame<V>>) {
        self.frames.lock().push(frame);
    }

    /// Removes the innermost frame and returns the new top.
    pub fn pop_frame(&self) -> Option<Arc<Frame<V>>> {
        let mut frames = self.frames.lock();
        frames.pop();
        frames.last().cloned()
    }

    pub fn frame_at(&self, number: usize) -> Option<Arc<Frame<V>>> {
        self.frames.lock().get(number).cloned()
    }

    pub fn frames_snapshot(&self) -> Vec<Arc<Frame<V>>> {
        self.frames.lock().clone()
    }

    pub fn full_names(&self) -> Vec<&'static str> {
        self.frames.lock().iter().map(|f| f.meta.full_name).collect()
    }

    /// Stop in a breakpoint or immediate break, honoring any residual
    /// continue count. Owning thread only.
    pub fn break_on(
        &self,
        status: ThreadStatus,
        breakpoint_id: i32,
        hook: &SharedHook,
        gc: &dyn GcFreeZone,
    ) {
        {
            let mut wait = self.wait.lock();
            if status == ThreadStatus::StoppedBreakImmediate {
                // An immediate break eliminates the residue of the last
                // continue.
                wait.continue_count = 0;
            } else if wait.continue_count > 0 {
                wait.continue_count -= 1;
                return;
            }
        }
        self.do_break(status, breakpoint_id, None, hook, gc);
    }

    /// Suspend the owning thread until the debugger continues it.
    ///
    /// Announces the stop, then waits on the rendezvous condvar. No shared
    /// lock is held while blocked; the blocking wait itself runs inside the
    /// GC-free zone so the collector never waits for a suspended thread.
    pub fn do_break(
        &self,
        status: ThreadStatus,
        breakpoint_id: i32,
        critical_error: Option<String>,
        hook: &SharedHook,
        gc: &dyn GcFreeZone,
    ) {
        self.status.store(status as u8, Ordering::Release);
        self.breakpoint_id.store(breakpoint_id, Ordering::Relaxed);
        if let Some(description) = critical_error {
            *self.critical_error.lock() = Some(description);
        }

        // The stop callback itself must not be interrupted.
        self.can_stop.store(false, Ordering::Relaxed);

        // Publish the waiting flag before announcing the stop: a continue
        // issued as soon as the debugger learns about it must not be lost.
        self.wait.lock().waiting = true;

        let place = self.frames.lock().last().map(|f| f.place());
        notify_stop(hook, self.thread_number, place);

        {
            let mut wait = self.wait.lock();
            while wait.waiting {
                gc.enter();
                self.resumed.wait(&mut wait);
                gc.exit();
            }
        }

        self.status
            .store(ThreadStatus::Running as u8, Ordering::Release);
        self.breakpoint_id.store(-1, Ordering::Relaxed);

        notify_resume(hook, self.thread_number);

        self.can_stop.store(true, Ordering::Relaxed);
    }

    /// Wake the thread if it is waiting; safe no-op otherwise. Counts above
    /// one become a residual that absorbs further breakpoint stops.
    pub fn continue_resume(&self, count: u32) {
        let count = count.max(1);
        let mut wait = self.wait.lock();
        if wait.waiting {
            wait.waiting = false;
            wait.continue_count = count - 1;
            self.resumed.notify_one();
        }
    }

    pub fn is_waiting(&self) -> bool {
        self.wait.lock().waiting
    }

    /// Whether any live catch clause accepts the exception, innermost frame
    /// first.
    pub fn can_be_caught(&self, exception: &V) -> bool {
        self.frames
            .lock()
            .iter()
            .rev()
            .any(|frame| frame.catchables.iter().any(|c| c.catches(exception)))
    }

    /// Capture frame strings into the exception stack: the whole stack when
    /// `all`, otherwise just the innermost frame.
    pub fn begin_catch(&self, all: bool) {
        let captured: Vec<String> = {
            let frames = self.frames.lock();
            if frames.is_empty() {
                return;
            }
            let start = if all { 0 } else { frames.len() - 1 };
            frames[start..].iter().map(|f| f.format()).collect()
        };
        self.exception_stack.lock().extend(captured);
    }

    pub fn exception_stack_strings(&self) -> Vec<String> {
        self.exception_stack.lock().clone()
    }

    pub fn dump_exception_stack(&self) {
        for line in self.exception_stack.lock().iter() {
            log::error!(target: "stackline", "Called from {line}");
        }
    }

    pub fn call_stack_strings(&self, skip_last: bool) -> Vec<String> {
        let frames = self.frames.lock();
        let len = frames.len().saturating_sub(skip_last as usize);
        frames[..len].iter().map(|f| f.format()).collect()
    }
}

fn notify_stop(hook: &SharedHook, thread_number: i32, place: Option<Place>) {
    let hook = hook.read().clone();
    if let Some(hook) = hook {
        let _ = weak_error!(hook.on_stop(thread_number, place), "stop event hook:");
    }
}

fn notify_resume(hook: &SharedHook, thread_number: i32) {
    let hook = hook.read().clone();
    if let Some(hook) = hook {
        let _ = weak_error!(hook.on_resume(thread_number), "resume event hook:");
    }
}
