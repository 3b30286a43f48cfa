//! In-process debug and profiling runtime.
//!
//! Generated code keeps a logical call stack per thread and polls a single
//! armed flag at every tracked source line; the debugger client, running on
//! its own thread, drives breakpoints, stepping, suspension, inspection and
//! sampled profiling through [`DebugRuntime`].

pub mod breakpoint;
pub mod callstack;
pub mod error;
pub mod hook;
pub mod ident;
pub mod profiler;
pub mod step;
pub mod worker;

pub use callstack::{Catchable, FrameMeta, StackVariable, ThreadStatus};
pub use error::Error;
pub use hook::{EventHook, GcFreeZone, NopGcZone, Place};
pub use ident::{IdentTable, CLASSES_MARKER};
pub use step::StepKind;
pub use worker::{FrameGuard, WorkerHandle};

use crate::runtime::breakpoint::{BreakpointTarget, Registry};
use crate::runtime::callstack::CallStack;
use crate::runtime::hook::SharedHook;
use crate::runtime::profiler::SampleClock;
use crate::runtime::step::StepController;
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Inspection result for one application thread. Frames are present only
/// when the thread is stopped, or when the caller asked for an unsafe
/// snapshot of a running one.
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub thread_number: i32,
    pub status: ThreadStatus,
    /// Breakpoint the thread is stopped in, if any.
    pub breakpoint: Option<i32>,
    pub critical_error: Option<String>,
    pub frames: Vec<FrameSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub class_name: &'static str,
    pub function_name: &'static str,
    pub full_name: &'static str,
    pub file_name: Option<&'static str>,
    pub line: u32,
}

/// Configures and builds a [`DebugRuntime`].
pub struct DebugRuntimeBuilder<V> {
    idents: &'static [&'static str],
    gc_zone: Box<dyn GcFreeZone>,
    thread_numbers: Box<dyn Fn() -> i32 + Send + Sync>,
    stop_wait_slice: Duration,
    stop_wait_slices: u32,
    profile_tick: Duration,
    _value: PhantomData<V>,
}

impl<V: Send + 'static> DebugRuntimeBuilder<V> {
    fn new(idents: &'static [&'static str]) -> Self {
        Self {
            idents,
            gc_zone: Box::new(NopGcZone),
            thread_numbers: default_thread_numbers(),
            stop_wait_slice: Duration::from_millis(100),
            stop_wait_slices: 20,
            profile_tick: Duration::from_millis(1),
            _value: PhantomData,
        }
    }

    /// Collector cooperation for blocking waits, a no-op by default.
    pub fn gc_zone(mut self, zone: Box<dyn GcFreeZone>) -> Self {
        self.gc_zone = zone;
        self
    }

    /// Thread-number oracle of the host. The default numbers threads with a
    /// process-wide counter on first use.
    pub fn thread_numbers<F>(mut self, oracle: F) -> Self
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        self.thread_numbers = Box::new(oracle);
        self
    }

    /// Budget of the break-all barrier: `slices` polls of `slice` each.
    pub fn stop_wait(mut self, slice: Duration, slices: u32) -> Self {
        self.stop_wait_slice = slice;
        self.stop_wait_slices = slices;
        self
    }

    /// Resolution of the profiling clock.
    pub fn profile_tick(mut self, tick: Duration) -> Self {
        self.profile_tick = tick;
        self
    }

    pub fn build(self) -> Arc<DebugRuntime<V>> {
        Arc::new(DebugRuntime {
            idents: IdentTable::new(self.idents),
            hook: RwLock::new(None),
            debugger_thread: AtomicI32::new(-1),
            directory: Mutex::new(HashMap::new()),
            registry: Registry::new(),
            stepper: StepController::new(),
            armed: AtomicBool::new(false),
            clock: SampleClock::new(self.profile_tick),
            gc_zone: self.gc_zone,
            thread_numbers: self.thread_numbers,
            stop_wait_slice: self.stop_wait_slice,
            stop_wait_slices: self.stop_wait_slices,
        })
    }
}

/// The debug runtime. One instance owns every piece of state shared between
/// worker threads and the debugger thread; the debugger-facing entry points
/// are methods on it.
pub struct DebugRuntime<V: Send + 'static> {
    idents: IdentTable,
    hook: SharedHook,
    /// Thread number of the debugger, -1 until a hook is installed.
    debugger_thread: AtomicI32,
    directory: Mutex<HashMap<i32, Arc<CallStack<V>>>>,
    registry: Registry,
    stepper: StepController,
    /// True iff any breakpoint exists, a step is in progress, or a break-all
    /// is pending. Workers short-circuit their probe on this.
    armed: AtomicBool,
    clock: Arc<SampleClock>,
    gc_zone: Box<dyn GcFreeZone>,
    thread_numbers: Box<dyn Fn() -> i32 + Send + Sync>,
    stop_wait_slice: Duration,
    stop_wait_slices: u32,
}

impl<V: Send + 'static> DebugRuntime<V> {
    pub fn builder(idents: &'static [&'static str]) -> DebugRuntimeBuilder<V> {
        DebugRuntimeBuilder::new(idents)
    }

    // ------------------------------- worker side --------------------------------------------

    /// Register the calling thread and hand out its instrumentation handle.
    /// Re-attaching an already known thread number reuses its call stack.
    pub fn attach_current_thread(self: &Arc<Self>) -> WorkerHandle<V> {
        let thread_number = (self.thread_numbers)();
        let stack = {
            let mut directory = self.directory.lock();
            Arc::clone(
                directory
                    .entry(thread_number)
                    .or_insert_with(|| Arc::new(CallStack::new(thread_number))),
            )
        };
        WorkerHandle::new(Arc::clone(self), stack)
    }

    // ------------------------------- debugger side ------------------------------------------

    /// Install the event hook. The calling thread becomes the debugger
    /// thread: it is excluded from enumeration and never stops.
    pub fn set_event_hook(&self, hook: Arc<dyn EventHook>) {
        self.debugger_thread
            .store((self.thread_numbers)(), Ordering::Release);
        *self.hook.write() = Some(hook);
    }

    pub fn current_thread_number(&self) -> i32 {
        (self.thread_numbers)()
    }

    pub fn get_files(&self) -> Vec<&'static str> {
        self.idents.files().to_vec()
    }

    pub fn get_classes(&self) -> Vec<&'static str> {
        self.idents.classes().to_vec()
    }

    /// Thread records for every application thread, ordered by thread
    /// number. Running threads yield no frames.
    pub fn get_thread_infos(&self) -> Vec<ThreadInfo> {
        let debugger = self.debugger_thread();
        let directory = self.directory.lock();
        let mut infos: Vec<ThreadInfo> = directory
            .values()
            .filter(|stack| stack.thread_number() != debugger)
            .map(|stack| materialize(stack, stack.status() != ThreadStatus::Running))
            .collect();
        infos.sort_by_key(|info| info.thread_number);
        infos
    }

    /// Thread record of one thread. `unsafe_running` snapshots the frames of
    /// a running thread; that read races the owner and is only as good as
    /// the moment it was taken.
    pub fn get_thread_info(&self, thread_number: i32, unsafe_running: bool) -> Option<ThreadInfo> {
        if thread_number == self.debugger_thread() {
            return None;
        }
        let directory = self.directory.lock();
        let stack = directory.get(&thread_number)?;
        if stack.status() == ThreadStatus::Running && !unsafe_running {
            return None;
        }
        Some(materialize(stack, true))
    }

    pub fn add_file_line_breakpoint(&self, file: &str, line: u32) -> Result<i32, Error> {
        let file = self
            .idents
            .intern_file(file)
            .ok_or_else(|| Error::UnknownFile(file.to_string()))?;
        let id = self.registry.add(BreakpointTarget::FileLine { file, line });
        self.armed.store(true, Ordering::Release);
        Ok(id)
    }

    pub fn add_class_function_breakpoint(&self, class: &str, function: &str) -> Result<i32, Error> {
        let class = self
            .idents
            .intern_class(class)
            .ok_or_else(|| Error::UnknownClass(class.to_string()))?;
        let id = self.registry.add(BreakpointTarget::ClassFunction {
            class,
            function: function.to_string(),
        });
        self.armed.store(true, Ordering::Release);
        Ok(id)
    }

    pub fn delete_breakpoint(&self, id: i32) {
        self.registry.delete(id);
        if self.registry.is_empty() {
            self.armed
                .store(self.stepper.in_progress(), Ordering::Release);
        }
    }

    pub fn delete_all_breakpoints(&self) {
        self.registry.delete_all();
        self.armed
            .store(self.stepper.in_progress(), Ordering::Release);
    }

    /// Ask every stoppable thread to break at its next probed line. With
    /// `wait`, block until the threads are stopped, best effort within the
    /// configured budget.
    pub fn break_now(&self, wait: bool) {
        self.stepper.set_break_all();
        self.armed.store(true, Ordering::Release);
        if wait {
            self.wait_for_all_threads_to_stop();
        }
    }

    /// Resume every stopped thread. The thread `special_thread_number` gets
    /// `count` (counts above one skip the next `count - 1` breakpoint hits),
    /// all others get one.
    pub fn continue_threads(&self, special_thread_number: i32, count: u32) {
        self.stepper.clear();
        self.armed
            .store(!self.registry.is_empty(), Ordering::Release);

        let directory = self.directory.lock();
        for stack in directory.values() {
            if stack.thread_number() == special_thread_number {
                stack.continue_resume(count);
            } else {
                stack.continue_resume(1);
            }
        }
    }

    /// Resume one stopped thread in step mode.
    pub fn step_thread(&self, thread_number: i32, kind: StepKind, count: u32) {
        self.stepper.set_step(thread_number, kind, count);
        self.armed.store(true, Ordering::Release);

        let stack = self.directory.lock().get(&thread_number).cloned();
        if let Some(stack) = stack {
            self.stepper.set_depth(stack.depth());
            stack.continue_resume(1);
        }
    }

    /// Names of the locals of one frame. Frame numbers count from the
    /// outermost frame.
    pub fn get_stack_variables(
        &self,
        thread_number: i32,
        frame_number: usize,
        unsafe_running: bool,
    ) -> Result<Vec<&'static str>, Error> {
        let stack = self.stopped_stack(thread_number, unsafe_running)?;
        let frame = stack
            .frame_at(frame_number)
            .ok_or(Error::FrameNotFound(frame_number))?;
        Ok(frame.variables.iter().map(|v| v.name()).collect())
    }

    pub fn get_stack_variable_value(
        &self,
        thread_number: i32,
        frame_number: usize,
        name: &str,
        unsafe_running: bool,
    ) -> Result<V, Error> {
        let stack = self.stopped_stack(thread_number, unsafe_running)?;
        let frame = stack
            .frame_at(frame_number)
            .ok_or(Error::FrameNotFound(frame_number))?;
        frame
            .variables
            .iter()
            .find(|v| v.name() == name)
            .map(|v| v.read())
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))
    }

    /// Store a value into a local of a stopped thread and return the value
    /// read back. `this` is never writable.
    pub fn set_stack_variable_value(
        &self,
        thread_number: i32,
        frame_number: usize,
        name: &str,
        value: V,
        unsafe_running: bool,
    ) -> Result<V, Error> {
        if name == "this" {
            return Err(Error::VariableNotFound(name.to_string()));
        }
        let stack = self.stopped_stack(thread_number, unsafe_running)?;
        let frame = stack
            .frame_at(frame_number)
            .ok_or(Error::FrameNotFound(frame_number))?;
        let variable = frame
            .variables
            .iter()
            .find(|v| v.name() == name)
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))?;
        variable.write(value);
        Ok(variable.read())
    }

    /// Thread lifecycle notification from the host's thread primitive.
    /// Termination drops the thread's call stack from the directory.
    pub fn thread_created_or_terminated(&self, thread_number: i32, created: bool) {
        // Latch the hook: a debugger detaching concurrently may clear it
        // mid-call, and one extra event after detach is harmless.
        let hook = self.hook.read().clone();
        let Some(hook) = hook else { return };

        if !created {
            self.directory.lock().remove(&thread_number);
            hook.on_thread_terminated(thread_number);
        } else {
            hook.on_thread_created(thread_number);
        }
    }

    // ------------------------------- internals ----------------------------------------------

    /// Best-effort barrier for break-all: poll every known thread for its
    /// waiting flag within the shared budget. Threads that never stop are
    /// simply left running; a later enumeration will show them.
    fn wait_for_all_threads_to_stop(&self) {
        let debugger = self.debugger_thread();
        let thread_numbers: Vec<i32> = {
            let directory = self.directory.lock();
            directory
                .keys()
                .copied()
                .filter(|t| *t != debugger)
                .collect()
        };

        let mut slices_left = self.stop_wait_slices;
        let mut i = 0;
        while i < thread_numbers.len() {
            let stopped = {
                let directory = self.directory.lock();
                match directory.get(&thread_numbers[i]) {
                    // the thread went away while we were working
                    None => true,
                    Some(stack) => stack.is_waiting(),
                }
            };
            if stopped {
                i += 1;
                continue;
            }
            if slices_left == 0 {
                return;
            }
            thread::sleep(self.stop_wait_slice);
            slices_left -= 1;
            // budget spent, try the same thread again
        }
    }

    fn stopped_stack(
        &self,
        thread_number: i32,
        unsafe_running: bool,
    ) -> Result<Arc<CallStack<V>>, Error> {
        if thread_number == self.debugger_thread() {
            return Err(Error::ThreadNotFound(thread_number));
        }
        let stack = self
            .directory
            .lock()
            .get(&thread_number)
            .cloned()
            .ok_or(Error::ThreadNotFound(thread_number))?;
        if stack.status() == ThreadStatus::Running && !unsafe_running {
            return Err(Error::ThreadNotStopped(thread_number));
        }
        // The directory lock is already released here: the target is stopped
        // and only its own thread mutates frames.
        Ok(stack)
    }

    pub(crate) fn armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub(crate) fn debugger_thread(&self) -> i32 {
        self.debugger_thread.load(Ordering::Acquire)
    }

    pub(crate) fn hook_installed(&self) -> bool {
        self.hook.read().is_some()
    }

    pub(crate) fn hook(&self) -> &SharedHook {
        &self.hook
    }

    pub(crate) fn gc_zone(&self) -> &dyn GcFreeZone {
        self.gc_zone.as_ref()
    }

    pub(crate) fn stepper(&self) -> &StepController {
        &self.stepper
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn sample_clock(&self) -> Arc<SampleClock> {
        Arc::clone(&self.clock)
    }
}

fn materialize<V>(stack: &Arc<CallStack<V>>, with_frames: bool) -> ThreadInfo {
    let breakpoint_id = stack.breakpoint_id();
    let frames = if with_frames {
        stack
            .frames_snapshot()
            .iter()
            .map(|frame| FrameSnapshot {
                class_name: frame.meta.class_name,
                function_name: frame.meta.function_name,
                full_name: frame.meta.full_name,
                file_name: frame.meta.file_name,
                line: frame.current_line(),
            })
            .collect()
    } else {
        Vec::new()
    };
    ThreadInfo {
        thread_number: stack.thread_number(),
        status: stack.status(),
        breakpoint: (breakpoint_id >= 0).then_some(breakpoint_id),
        critical_error: stack.critical_error(),
        frames,
    }
}

/// Fallback thread numbering: a process-wide counter latched per thread on
/// first use.
fn default_thread_numbers() -> Box<dyn Fn() -> i32 + Send + Sync> {
    static NEXT: AtomicI32 = AtomicI32::new(1);
    thread_local! {
        static NUMBER: Cell<i32> = const { Cell::new(0) };
    }
    Box::new(|| {
        NUMBER.with(|number| {
            if number.get() == 0 {
                number.set(NEXT.fetch_add(1, Ordering::Relaxed));
            }
            number.get()
        })
    })
}
