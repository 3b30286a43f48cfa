use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

/// Kind of a single-step request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Into,
    Over,
    Out,
}

const MODE_NONE: u8 = 0;
const MODE_INTO: u8 = 1;
const MODE_OVER: u8 = 2;
const MODE_OUT: u8 = 3;

impl StepKind {
    fn mode(self) -> u8 {
        match self {
            StepKind::Into => MODE_INTO,
            StepKind::Over => MODE_OVER,
            StepKind::Out => MODE_OUT,
        }
    }
}

/// Runtime-wide step state, read by every probing thread without locks.
///
/// Writers publish with release stores and readers reach this only after an
/// acquire load of the probe flag, so field values are at most one probe
/// stale. Torn combinations are benign: a spurious immediate break decays
/// into continue behavior on the next probe.
pub(crate) struct StepController {
    mode: AtomicU8,
    /// Target thread number, -1 targets all threads.
    thread: AtomicI32,
    /// Frame depth captured when the step was issued.
    depth: AtomicI32,
    /// Residual step count, counts above one absorb stops.
    count: AtomicI32,
}

impl StepController {
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(MODE_NONE),
            thread: AtomicI32::new(-1),
            depth: AtomicI32::new(0),
            count: AtomicI32::new(0),
        }
    }

    /// Arm an immediate break of every stoppable thread.
    pub fn set_break_all(&self) {
        self.thread.store(-1, Ordering::Release);
        self.count.store(0, Ordering::Release);
        self.mode.store(MODE_INTO, Ordering::Release);
    }

    pub fn set_step(&self, thread_number: i32, kind: StepKind, count: u32) {
        self.thread.store(thread_number, Ordering::Release);
        self.count.store(count as i32, Ordering::Release);
        self.mode.store(kind.mode(), Ordering::Release);
    }

    pub fn set_depth(&self, depth: i32) {
        self.depth.store(depth, Ordering::Release);
    }

    pub fn clear(&self) {
        self.mode.store(MODE_NONE, Ordering::Release);
    }

    pub fn in_progress(&self) -> bool {
        self.mode.load(Ordering::Acquire) != MODE_NONE
    }

    /// Whether the probing thread must stop with an immediate break.
    pub fn immediate_break(&self, thread_number: i32, depth: i32) -> bool {
        let mode = self.mode.load(Ordering::Acquire);
        if mode == MODE_NONE {
            return false;
        }
        let target = self.thread.load(Ordering::Relaxed);
        if target != -1 && target != thread_number {
            return false;
        }
        match mode {
            MODE_INTO => true,
            MODE_OVER => depth <= self.depth.load(Ordering::Relaxed),
            MODE_OUT => depth < self.depth.load(Ordering::Relaxed),
            _ => false,
        }
    }

    /// Absorb one stop of a multi-count step. Returns true when the stop
    /// must be skipped because more steps remain.
    pub fn consume_extra_step(&self) -> bool {
        let count = self.count.load(Ordering::Relaxed);
        if count > 1 {
            self.count.store(count - 1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}
