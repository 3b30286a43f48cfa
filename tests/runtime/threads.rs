use crate::common::{runtime, spawn_worker, wait_until, Event, WORKER_SPIN};
use serial_test::serial;
use stackline::runtime::ThreadStatus;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

#[test]
#[serial]
fn test_thread_lifecycle_events() {
    let (rt, log) = runtime();
    rt.thread_created_or_terminated(7, true);
    rt.thread_created_or_terminated(7, false);
    assert_eq!(log.snapshot(), vec![Event::Created(7), Event::Terminated(7)]);
}

#[test]
#[serial]
fn test_terminated_thread_leaves_directory() {
    let (rt, _log) = runtime();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (tid, join) = spawn_worker(&rt, move |_handle| {
        release_rx.recv().unwrap();
    });

    assert!(rt
        .get_thread_infos()
        .iter()
        .any(|info| info.thread_number == tid));

    rt.thread_created_or_terminated(tid, false);
    assert!(rt.get_thread_infos().is_empty());
    assert!(rt.get_thread_info(tid, false).is_none());

    release_tx.send(()).unwrap();
    join.join().unwrap();
}

#[test]
#[serial]
fn test_thread_infos_exclude_debugger() {
    let (rt, _log) = runtime();
    // the debugger thread itself may run instrumented code
    let _own = rt.attach_current_thread();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (tid, join) = spawn_worker(&rt, move |_handle| {
        release_rx.recv().unwrap();
    });

    let infos = rt.get_thread_infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].thread_number, tid);
    assert_eq!(infos[0].status, ThreadStatus::Running);
    // a running thread yields no frames
    assert!(infos[0].frames.is_empty());

    assert!(rt.get_thread_info(rt.current_thread_number(), false).is_none());

    release_tx.send(()).unwrap();
    join.join().unwrap();
}

#[test]
#[serial]
fn test_break_all_is_best_effort() {
    let (rt, log) = runtime();
    let done = Arc::new(AtomicBool::new(false));

    // two threads probing instrumented lines
    let mut probing = Vec::new();
    for _ in 0..2 {
        let worker_done = Arc::clone(&done);
        probing.push(spawn_worker(&rt, move |handle| {
            let _frame = handle.enter_frame(&WORKER_SPIN, vec![], vec![]);
            while !worker_done.load(Ordering::Relaxed) {
                handle.line_probe(6);
            }
        }));
    }

    // one thread spinning outside instrumented code
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (free_tid, free_join) = spawn_worker(&rt, move |_handle| {
        release_rx.recv().unwrap();
    });

    let begin = Instant::now();
    rt.break_now(true);
    // the configured budget is 10ms x 20 slices
    assert!(begin.elapsed() < Duration::from_secs(2));

    let infos = rt.get_thread_infos();
    for info in &infos {
        if info.thread_number == free_tid {
            assert_eq!(info.status, ThreadStatus::Running);
        } else {
            assert_eq!(info.status, ThreadStatus::StoppedBreakImmediate);
            assert_eq!(info.breakpoint, None);
        }
    }

    done.store(true, Ordering::Relaxed);
    rt.continue_threads(-1, 1);

    assert!(log.wait_for(Duration::from_secs(5), |events| {
        events.iter().filter(|e| matches!(e, Event::Started { .. })).count() == 2
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        rt.get_thread_infos()
            .iter()
            .all(|info| info.status == ThreadStatus::Running)
    }));

    release_tx.send(()).unwrap();
    free_join.join().unwrap();
    for (_tid, join) in probing {
        join.join().unwrap();
    }
}

#[test]
#[serial]
fn test_stop_events_pair_up() {
    let (rt, log) = runtime();
    rt.add_file_line_breakpoint("Worker.hx", 6).unwrap();

    let (tid, join) = spawn_worker(&rt, |handle| {
        let _frame = handle.enter_frame(&WORKER_SPIN, vec![], vec![]);
        for _ in 0..3 {
            handle.line_probe(6);
        }
    });

    for expected in 1..=3 {
        assert!(log.wait_for_stops(expected));
        rt.continue_threads(tid, 1);
    }
    join.join().unwrap();

    // strict STOPPED -> STARTED alternation for the one worker
    let events = log.snapshot();
    assert_eq!(events.len(), 6);
    for pair in events.chunks(2) {
        assert!(matches!(pair[0], Event::Stopped { thread, .. } if thread == tid));
        assert!(matches!(pair[1], Event::Started { thread } if thread == tid));
    }
}

#[test]
#[serial]
fn test_disabled_thread_never_stops() {
    let (rt, log) = runtime();
    rt.add_file_line_breakpoint("Worker.hx", 6).unwrap();

    let iterations = Arc::new(AtomicI64::new(0));
    let worker_iterations = Arc::clone(&iterations);
    let (_tid, join) = spawn_worker(&rt, move |handle| {
        handle.enable_debugging(false);
        let _frame = handle.enter_frame(&WORKER_SPIN, vec![], vec![]);
        for _ in 0..100 {
            worker_iterations.fetch_add(1, Ordering::Relaxed);
            handle.line_probe(6);
        }
    });

    rt.break_now(false);
    join.join().unwrap();

    assert_eq!(iterations.load(Ordering::Relaxed), 100);
    assert!(log.stops().is_empty());
}
