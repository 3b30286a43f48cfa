use crate::runtime::callstack::CallStack;
use itertools::Itertools;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared profiling clock. One background ticker serves every attached
/// profiler; it starts with the first attachment and exits once the last
/// profiler detaches.
pub(crate) struct SampleClock {
    ticks: AtomicU32,
    refs: Mutex<u32>,
    tick: Duration,
}

impl SampleClock {
    pub fn new(tick: Duration) -> Arc<Self> {
        Arc::new(Self {
            ticks: AtomicU32::new(0),
            refs: Mutex::new(0),
            tick,
        })
    }

    pub fn now(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn retain(self: &Arc<Self>) {
        let mut refs = self.refs.lock();
        *refs += 1;
        if *refs == 1 {
            let clock = Arc::clone(self);
            thread::spawn(move || clock.run());
        }
    }

    fn release(&self) {
        let mut refs = self.refs.lock();
        *refs = refs.saturating_sub(1);
    }

    fn run(self: Arc<Self>) {
        loop {
            thread::sleep(self.tick);
            if *self.refs.lock() == 0 {
                break;
            }
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub fn advance(&self, ticks: u32) {
        self.ticks.fetch_add(ticks, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct ProfileEntry {
    self_time: u64,
    total: u64,
    children: HashMap<&'static str, u64>,
}

/// Call-stack-sampling profiler of a single thread.
///
/// Samples are taken at frame pushes and pops, so the resolution is the
/// clock tick but the attribution follows real call boundaries. Entries are
/// keyed by full function name; recursive appearances inside one sample
/// count toward inclusive time only once.
pub(crate) struct Profiler {
    dump_path: Option<PathBuf>,
    last_tick: u32,
    stats: HashMap<&'static str, ProfileEntry>,
    clock: Arc<SampleClock>,
}

impl Profiler {
    pub fn new(dump_path: Option<PathBuf>, clock: Arc<SampleClock>) -> Self {
        clock.retain();
        Self {
            dump_path,
            last_tick: 0,
            stats: HashMap::new(),
            clock,
        }
    }

    /// Account the time since the previous sample to the current stack.
    pub fn sample<V>(&mut self, stack: &CallStack<V>) {
        let now = self.clock.now();
        if now == self.last_tick {
            return;
        }
        let delta = u64::from(now.wrapping_sub(self.last_tick)).max(1);
        self.last_tick = now;

        let names = stack.full_names();
        let mut seen: HashSet<&'static str> = HashSet::new();

        for i in 0..names.len().saturating_sub(1) {
            let entry = self.stats.entry(names[i]).or_default();
            if seen.insert(names[i]) {
                entry.total += delta;
            }
            *entry.children.entry(names[i + 1]).or_insert(0) += delta;
        }

        if let Some(innermost) = names.last().copied() {
            self.stats.entry(innermost).or_default().self_time += delta;
        }
    }

    /// Render the collected statistics and write them to the dump file, or
    /// to the log when no file was requested.
    pub fn dump(&self) -> std::io::Result<()> {
        let report = self.render();
        match &self.dump_path {
            Some(path) => std::fs::write(path, report),
            None => {
                for line in report.lines() {
                    log::info!(target: "stackline", "{line}");
                }
                Ok(())
            }
        }
    }

    fn render(&self) -> String {
        let total_self: u64 = self.stats.values().map(|e| e.self_time).sum();
        let scale = if total_self > 0 {
            100.0 / total_self as f64
        } else {
            1.0
        };

        let entries = self
            .stats
            .iter()
            .sorted_by(|(_, a), (_, b)| {
                b.total.cmp(&a.total).then(a.self_time.cmp(&b.self_time))
            });

        let mut report = String::new();
        for (name, entry) in entries {
            let _ = writeln!(
                report,
                "{name} {:.2}%/{:.2}%",
                entry.total as f64 * scale,
                entry.self_time as f64 * scale,
            );

            // functions that never called anything get no child rows
            if entry.children.is_empty() {
                continue;
            }

            let children_plus_self: u64 =
                entry.self_time + entry.children.values().sum::<u64>();
            let children = entry
                .children
                .iter()
                .map(|(child, time)| (*child, *time))
                .chain(std::iter::once(("(internal)", entry.self_time)))
                .sorted_by(|a, b| b.1.cmp(&a.1));
            for (child, time) in children {
                let _ = writeln!(
                    report,
                    "  {child} {:.1}%",
                    100.0 * time as f64 / children_plus_self as f64,
                );
            }
        }
        report
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        self.clock.release();
    }
}
