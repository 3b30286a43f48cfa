use crate::runtime::breakpoint::BreakpointTable;
use crate::runtime::callstack::{CallStack, Catchable, Frame, FrameMeta, StackVariable, ThreadStatus};
use crate::runtime::profiler::Profiler;
use crate::runtime::{DebugRuntime, Error};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Per-thread instrumentation handle.
///
/// Generated code obtains one handle per application thread (the runtime's
/// thread-number oracle names it) and routes every frame push, line probe,
/// and throw check through it. The handle is deliberately not `Send`: the
/// call stack behind it may only ever be mutated by its owning thread, and
/// keeping the handle thread-bound turns that protocol into a compile-time
/// guarantee.
pub struct WorkerHandle<V: Send + 'static> {
    runtime: Arc<DebugRuntime<V>>,
    stack: Arc<CallStack<V>>,
    /// Innermost frame, cached so the line probe stores without locking.
    top: RefCell<Option<Arc<Frame<V>>>>,
    /// Breakpoint snapshot this thread observed last.
    breakpoints: RefCell<Option<Arc<BreakpointTable>>>,
    profiler: RefCell<Option<Profiler>>,
    _thread_bound: PhantomData<*mut ()>,
}

/// Activation record of one instrumented function, alive for the scope of
/// the call. Dropping it pops the frame.
pub struct FrameGuard<'a, V: Send + 'static> {
    worker: &'a WorkerHandle<V>,
}

impl<V: Send + 'static> WorkerHandle<V> {
    pub(crate) fn new(runtime: Arc<DebugRuntime<V>>, stack: Arc<CallStack<V>>) -> Self {
        Self {
            runtime,
            stack,
            top: RefCell::new(None),
            breakpoints: RefCell::new(None),
            profiler: RefCell::new(None),
            _thread_bound: PhantomData,
        }
    }

    pub fn thread_number(&self) -> i32 {
        self.stack.thread_number()
    }

    /// Opt the calling thread in or out of stopping. A thread that cannot
    /// stop still evaluates breakpoints but never suspends.
    pub fn enable_debugging(&self, enable: bool) {
        self.stack.set_can_stop(enable);
    }

    /// Enter an instrumented function. Local variable accessors and catch
    /// clauses are materialized here, once per activation.
    pub fn enter_frame(
        &self,
        meta: &'static FrameMeta,
        variables: Vec<StackVariable<V>>,
        catchables: Vec<Catchable<V>>,
    ) -> FrameGuard<'_, V> {
        self.sample_profiler();
        let frame = Frame::new(meta, variables, catchables);
        self.stack.push_frame(Arc::clone(&frame));
        *self.top.borrow_mut() = Some(frame);
        FrameGuard { worker: self }
    }

    /// The per-line probe. The cheap path is one relaxed store and one
    /// acquire load of the runtime's armed flag.
    #[inline]
    pub fn line_probe(&self, line: u32) {
        if let Some(frame) = self.top.borrow().as_ref() {
            frame.line.store(line, Ordering::Relaxed);
        }
        if !self.runtime.armed() {
            return;
        }
        self.check_break(line);
    }

    /// Slow path of the probe: step checks first, then the breakpoint
    /// snapshot, then the stop filters.
    fn check_break(&self, line: u32) {
        let runtime = &self.runtime;

        let mut status = None;
        let mut breakpoint_id = -1;

        if runtime
            .stepper()
            .immediate_break(self.thread_number(), self.stack.depth())
        {
            status = Some(ThreadStatus::StoppedBreakImmediate);
        }

        if status.is_none() {
            self.refresh_breakpoints();
            let table = self.breakpoints.borrow();
            let table = match table.as_ref() {
                Some(table) if !table.is_empty() => table,
                _ => return,
            };
            let top = self.top.borrow();
            let Some(frame) = top.as_ref() else { return };
            let meta = frame.meta;
            // a probe on the first line of the function may hit a
            // class:function breakpoint
            if line == meta.first_line {
                if let Some(id) = table.find_class_function(meta.class_name, meta.function_name) {
                    breakpoint_id = id;
                }
            }
            if breakpoint_id == -1 {
                if let Some(file) = meta.file_name {
                    if let Some(id) = table.find_file_line(file, line) {
                        breakpoint_id = id;
                    }
                }
            }
            if breakpoint_id == -1 {
                return;
            }
            status = Some(ThreadStatus::StoppedBreakpoint);
        }

        let Some(status) = status else { return };

        // the debugger thread never stops
        if self.thread_number() == runtime.debugger_thread() {
            return;
        }
        if !self.stack.can_stop() {
            return;
        }
        if status == ThreadStatus::StoppedBreakImmediate && runtime.stepper().consume_extra_step() {
            return;
        }

        self.stack
            .break_on(status, breakpoint_id, runtime.hook(), runtime.gc_zone());
    }

    /// Reload the cached snapshot when the published one moved. Bounded
    /// staleness: a thread sees a new snapshot no later than its next probe.
    fn refresh_breakpoints(&self) {
        let published = self.runtime.registry().generation();
        let stale = self
            .breakpoints
            .borrow()
            .as_ref()
            .map(|t| t.generation() != published)
            .unwrap_or(true);
        if stale {
            *self.breakpoints.borrow_mut() = Some(self.runtime.registry().current());
        }
    }

    /// Formatted live stack, outermost frame first.
    pub fn call_stack_strings(&self, skip_last: bool) -> Vec<String> {
        self.stack.call_stack_strings(skip_last)
    }

    pub fn exception_stack_strings(&self) -> Vec<String> {
        self.stack.exception_stack_strings()
    }

    /// Called when a catch block begins executing; captures the unwound
    /// frames so an uncaught exception can still be reported.
    pub fn begin_catch(&self, all: bool) {
        self.stack.begin_catch(all);
    }

    pub fn dump_exception_stack(&self) {
        self.stack.dump_exception_stack();
    }

    /// Capture the innermost frame and write the whole exception stack to
    /// the log.
    pub fn dump_stack(&self) {
        self.stack.begin_catch(false);
        self.stack.dump_exception_stack();
    }

    /// Whether any live catch clause of this thread accepts the exception.
    pub fn can_be_caught(&self, exception: &V) -> bool {
        self.stack.can_be_caught(exception)
    }

    /// Validate a throw before it happens. An exception no enclosing clause
    /// catches is routed through the critical-error funnel, giving an
    /// attached debugger one final break; the caller performs the actual
    /// throw afterwards as usual.
    pub fn checked_throw(&self, exception: &V) {
        if !self.stack.can_be_caught(exception) {
            self.critical_stop("Uncatchable Throw".to_string(), true);
        }
    }

    /// Report a null dereference of the named type.
    pub fn null_reference(&self, type_name: &str, allow_fixup: bool) {
        self.critical_stop(format!("Null {type_name} Reference"), allow_fixup);
    }

    /// Report an unrecoverable error and terminate.
    pub fn critical_error(&self, message: &str) -> ! {
        self.critical_stop(message.to_string(), false);
        unreachable!("critical errors without fixup do not resume");
    }

    fn critical_stop(&self, message: String, allow_fixup: bool) {
        if allow_fixup && self.runtime.hook_installed() {
            self.stack.do_break(
                ThreadStatus::StoppedCriticalError,
                -1,
                Some(message),
                self.runtime.hook(),
                self.runtime.gc_zone(),
            );
            return;
        }

        self.stack.begin_catch(true);
        self.stack.dump_exception_stack();
        log::error!(target: "stackline", "critical error: {message}");
        std::process::abort();
    }

    /// Attach a sampling profiler to this thread, replacing any previous
    /// one. Pass a path to get a report file; without one the report goes to
    /// the log.
    pub fn start_profiler(&self, dump_path: Option<PathBuf>) {
        *self.profiler.borrow_mut() = Some(Profiler::new(dump_path, self.runtime.sample_clock()));
    }

    /// Detach the profiler and write its report.
    pub fn stop_profiler(&self) -> Result<(), Error> {
        if let Some(profiler) = self.profiler.borrow_mut().take() {
            profiler.dump()?;
        }
        Ok(())
    }

    fn sample_profiler(&self) {
        if let Some(profiler) = self.profiler.borrow_mut().as_mut() {
            profiler.sample(&self.stack);
        }
    }
}

impl<V: Send + 'static> Drop for FrameGuard<'_, V> {
    fn drop(&mut self) {
        self.worker.sample_profiler();
        let top = self.worker.stack.pop_frame();
        *self.worker.top.borrow_mut() = top;
    }
}
