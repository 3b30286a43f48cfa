use once_cell::sync::Lazy;
use stackline::runtime::{
    DebugRuntime, EventHook, FrameMeta, IdentTable, Place, StackVariable, WorkerHandle,
    CLASSES_MARKER,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type Runtime = Arc<DebugRuntime<i64>>;

/// The identifier table a compiler would emit for the test workload.
pub static IDENTS: &[&str] = &["Main.hx", "Worker.hx", CLASSES_MARKER, "Main", "Worker"];

static TABLE: Lazy<IdentTable> = Lazy::new(|| IdentTable::new(IDENTS));

fn file(name: &str) -> &'static str {
    TABLE.intern_file(name).expect("file in test table")
}

fn class(name: &str) -> &'static str {
    TABLE.intern_class(name).expect("class in test table")
}

pub static MAIN_RUN: Lazy<FrameMeta> = Lazy::new(|| FrameMeta {
    class_name: class("Main"),
    function_name: "run",
    full_name: "Main.run",
    file_name: Some(file("Main.hx")),
    first_line: 10,
});

pub static MAIN_INNER: Lazy<FrameMeta> = Lazy::new(|| FrameMeta {
    class_name: class("Main"),
    function_name: "inner",
    full_name: "Main.inner",
    file_name: Some(file("Main.hx")),
    first_line: 20,
});

pub static MAIN_LEAF: Lazy<FrameMeta> = Lazy::new(|| FrameMeta {
    class_name: class("Main"),
    function_name: "leaf",
    full_name: "Main.leaf",
    file_name: Some(file("Main.hx")),
    first_line: 30,
});

pub static MAIN_GENERATED: Lazy<FrameMeta> = Lazy::new(|| FrameMeta {
    class_name: class("Main"),
    function_name: "gen",
    full_name: "Main.gen",
    file_name: Some("?generated"),
    first_line: 0,
});

pub static WORKER_SPIN: Lazy<FrameMeta> = Lazy::new(|| FrameMeta {
    class_name: class("Worker"),
    function_name: "spin",
    full_name: "Worker.spin",
    file_name: Some(file("Worker.hx")),
    first_line: 5,
});

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Stopped { thread: i32, place: Option<Place> },
    Started { thread: i32 },
    Created(i32),
    Terminated(i32),
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<(i32, Option<Place>)> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::Stopped { thread, place } => Some((thread, place)),
                _ => None,
            })
            .collect()
    }

    /// Poll until the predicate holds for the recorded events.
    pub fn wait_for<F>(&self, timeout: Duration, pred: F) -> bool
    where
        F: Fn(&[Event]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&self.events.lock().unwrap()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn wait_for_stops(&self, count: usize) -> bool {
        self.wait_for(Duration::from_secs(5), |events| {
            events
                .iter()
                .filter(|e| matches!(e, Event::Stopped { .. }))
                .count()
                >= count
        })
    }
}

pub struct TestHook {
    log: Arc<EventLog>,
}

impl TestHook {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }
}

impl EventHook for TestHook {
    fn on_stop(&self, thread_number: i32, place: Option<Place>) -> anyhow::Result<()> {
        self.log.record(Event::Stopped {
            thread: thread_number,
            place,
        });
        Ok(())
    }

    fn on_resume(&self, thread_number: i32) -> anyhow::Result<()> {
        self.log.record(Event::Started {
            thread: thread_number,
        });
        Ok(())
    }

    fn on_thread_created(&self, thread_number: i32) {
        self.log.record(Event::Created(thread_number));
    }

    fn on_thread_terminated(&self, thread_number: i32) {
        self.log.record(Event::Terminated(thread_number));
    }
}

/// Fresh runtime with a recording hook installed from the calling (debugger)
/// thread. The stop-wait budget is shortened so break-all tests do not sleep
/// for the production two seconds.
pub fn runtime() -> (Runtime, Arc<EventLog>) {
    let rt = DebugRuntime::<i64>::builder(IDENTS)
        .stop_wait(Duration::from_millis(10), 20)
        .build();
    let log = Arc::new(EventLog::default());
    rt.set_event_hook(Arc::new(TestHook::new(log.clone())));
    (rt, log)
}

/// Spawn an instrumented worker thread and hand back its thread number once
/// it is attached.
pub fn spawn_worker<F>(rt: &Runtime, body: F) -> (i32, JoinHandle<()>)
where
    F: FnOnce(&WorkerHandle<i64>) + Send + 'static,
{
    let rt = Arc::clone(rt);
    let (tx, rx) = mpsc::channel();
    let join = std::thread::spawn(move || {
        let handle = rt.attach_current_thread();
        tx.send(handle.thread_number()).unwrap();
        body(&handle);
    });
    (rx.recv().unwrap(), join)
}

/// Local variable backed by a shared cell, the shape generated accessors
/// take for captured locals.
pub fn int_var(name: &'static str, cell: &Arc<AtomicI64>) -> StackVariable<i64> {
    let read = Arc::clone(cell);
    let write = Arc::clone(cell);
    StackVariable::new(
        name,
        move || read.load(Ordering::Relaxed),
        move |value| write.store(value, Ordering::Relaxed),
    )
}

pub fn wait_until<F>(timeout: Duration, pred: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
