use crate::runtime::ident::same_ident;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BreakpointTarget {
    FileLine {
        file: &'static str,
        line: u32,
    },
    ClassFunction {
        class: &'static str,
        function: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Breakpoint {
    pub id: i32,
    pub target: BreakpointTarget,
}

/// One immutable snapshot of the breakpoint set.
///
/// Snapshots are never mutated after publication; every registry change
/// builds a new table carrying the next generation number. Probing threads
/// keep the `Arc` they last observed and only reload when the published
/// generation moves, so the hot path takes no lock at all.
pub(crate) struct BreakpointTable {
    generation: u64,
    breakpoints: Vec<Breakpoint>,
}

impl BreakpointTable {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            generation: 0,
            breakpoints: Vec::new(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    fn has(&self, id: i32) -> bool {
        self.breakpoints.iter().any(|b| b.id == id)
    }

    /// File names compare by identity, both sides are interned.
    pub fn find_file_line(&self, file: &'static str, line: u32) -> Option<i32> {
        self.breakpoints.iter().find_map(|b| match &b.target {
            BreakpointTarget::FileLine { file: f, line: l } if same_ident(f, file) && *l == line => {
                Some(b.id)
            }
            _ => None,
        })
    }

    pub fn find_class_function(&self, class: &'static str, function: &str) -> Option<i32> {
        self.breakpoints.iter().find_map(|b| match &b.target {
            BreakpointTarget::ClassFunction { class: c, function: f }
                if same_ident(c, class) && f == function =>
            {
                Some(b.id)
            }
            _ => None,
        })
    }

    fn with_added(&self, id: i32, target: BreakpointTarget) -> Arc<Self> {
        let mut breakpoints = self.breakpoints.clone();
        breakpoints.push(Breakpoint { id, target });
        Arc::new(Self {
            generation: self.generation + 1,
            breakpoints,
        })
    }

    fn without(&self, id: i32) -> Arc<Self> {
        let breakpoints = self
            .breakpoints
            .iter()
            .filter(|b| b.id != id)
            .cloned()
            .collect();
        Arc::new(Self {
            generation: self.generation + 1,
            breakpoints,
        })
    }
}

struct RegistryInner {
    published: Arc<BreakpointTable>,
    next_id: i32,
}

/// Copy-on-write breakpoint registry.
///
/// Mutations run under the mutex; the publication itself is the release
/// store of the generation counter, matched by the acquire load in
/// [`Registry::generation`] on the probe side.
pub(crate) struct Registry {
    inner: Mutex<RegistryInner>,
    generation: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                published: BreakpointTable::empty(),
                next_id: 0,
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn add(&self, target: BreakpointTarget) -> i32 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let table = inner.published.with_added(id, target);
        self.publish(&mut inner, table);
        id
    }

    pub fn delete(&self, id: i32) {
        let mut inner = self.inner.lock();
        if inner.published.has(id) {
            let table = inner.published.without(id);
            self.publish(&mut inner, table);
        }
    }

    pub fn delete_all(&self) {
        let mut inner = self.inner.lock();
        let table = Arc::new(BreakpointTable {
            generation: inner.published.generation + 1,
            breakpoints: Vec::new(),
        });
        self.publish(&mut inner, table);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().published.is_empty()
    }

    /// Published generation, acquire-paired with [`Registry::publish`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Arc<BreakpointTable> {
        self.inner.lock().published.clone()
    }

    fn publish(&self, inner: &mut RegistryInner, table: Arc<BreakpointTable>) {
        let generation = table.generation;
        inner.published = table;
        self.generation.store(generation, Ordering::Release);
    }
}
