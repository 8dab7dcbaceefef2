//! End-to-end tests of the run family and the scheduling guarantees.

#![cfg(not(feature = "loom"))]

use dagflow::{Executor, RunError, Taskflow};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn diamond_respects_dependencies() {
    init_tracing();
    // A -> B, A -> C, B -> D, C -> D. One pass: A before B and C, both
    // before D, four executions total.
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut tf = Taskflow::new();
    let record = |label: &'static str| {
        let order = Arc::clone(&order);
        move || order.lock().unwrap().push(label)
    };
    let a = tf.emplace(record("a"));
    let b = tf.emplace(record("b"));
    let c = tf.emplace(record("c"));
    let d = tf.emplace(record("d"));
    tf.precede(&a, [&b, &c]);
    tf.precede(&b, [&d]);
    tf.precede(&c, [&d]);

    let executor = Executor::with_workers(4);
    executor.run(&tf).wait().unwrap();

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 4);
    let position =
        |label| order.iter().position(|&o| o == label).unwrap_or_else(|| panic!("{label} missing"));
    assert!(position("a") < position("b"));
    assert!(position("a") < position("c"));
    assert!(position("b") < position("d"));
    assert!(position("c") < position("d"));
    assert_eq!(order.iter().filter(|&&o| o == "d").count(), 1);
}

#[test]
fn single_worker_executes_everything() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut tf = Taskflow::new();
    let mut previous = None;
    for _ in 0..16 {
        let counter = Arc::clone(&counter);
        let task = tf.emplace(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        if let Some(previous) = previous {
            tf.precede(&previous, [&task]);
        }
        previous = Some(task);
    }

    let executor = Executor::with_workers(1);
    executor.run(&tf).wait().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 16);
}

#[test]
fn runs_of_one_taskflow_never_interleave() {
    // Every body records whether the first run's completion callback has
    // fired. Nodes of the second run must all observe it: the second
    // topology is only launched after the first one is fulfilled.
    let first_done = Arc::new(AtomicBool::new(false));
    let seen: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));

    let mut tf = Taskflow::new();
    for _ in 0..3 {
        let first_done = Arc::clone(&first_done);
        let seen = Arc::clone(&seen);
        tf.emplace(move || {
            // A little jitter to tempt the scheduler into overlapping runs.
            thread::sleep(Duration::from_millis(2));
            seen.lock().unwrap().push(first_done.load(Ordering::SeqCst));
        });
    }

    let executor = Executor::with_workers(4);
    let flag = Arc::clone(&first_done);
    let first = executor.run_with(&tf, move || flag.store(true, Ordering::SeqCst));
    let second = executor.run(&tf);
    first.wait().unwrap();
    second.wait().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 6);
    assert!(seen[..3].iter().all(|&observed| !observed), "first run saw its own callback");
    assert!(seen[3..].iter().all(|&observed| observed), "second run started early");
}

#[test]
fn run_n_makes_exactly_n_passes() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut tf = Taskflow::new();
    let head = {
        let executions = Arc::clone(&executions);
        tf.emplace(move || {
            executions.fetch_add(1, Ordering::SeqCst);
        })
    };
    let tail = {
        let executions = Arc::clone(&executions);
        tf.emplace(move || {
            executions.fetch_add(1, Ordering::SeqCst);
        })
    };
    tf.precede(&head, [&tail]);

    let callback_fired = Arc::new(AtomicUsize::new(0));
    let seen_at_callback = Arc::new(AtomicUsize::new(0));

    let executor = Executor::with_workers(2);
    let handle = {
        let callback_fired = Arc::clone(&callback_fired);
        let seen_at_callback = Arc::clone(&seen_at_callback);
        let executions = Arc::clone(&executions);
        executor.run_n_with(&tf, 3, move || {
            callback_fired.fetch_add(1, Ordering::SeqCst);
            seen_at_callback.store(executions.load(Ordering::SeqCst), Ordering::SeqCst);
        })
    };
    handle.wait().unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 6);
    assert_eq!(callback_fired.load(Ordering::SeqCst), 1);
    // The callback fires after the final pass has fully completed.
    assert_eq!(seen_at_callback.load(Ordering::SeqCst), 6);
}

#[test]
fn run_n_zero_executes_nothing() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut tf = Taskflow::new();
    {
        let executions = Arc::clone(&executions);
        tf.emplace(move || {
            executions.fetch_add(1, Ordering::SeqCst);
        });
    }

    let callback_fired = Arc::new(AtomicUsize::new(0));
    let executor = Executor::with_workers(2);
    let handle = {
        let callback_fired = Arc::clone(&callback_fired);
        executor.run_n_with(&tf, 0, move || {
            callback_fired.fetch_add(1, Ordering::SeqCst);
        })
    };
    handle.wait().unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(callback_fired.load(Ordering::SeqCst), 1);
}

#[test]
fn empty_taskflow_completes_immediately() {
    let tf = Taskflow::new();
    let executor = Executor::with_workers(2);
    executor.run(&tf).wait().unwrap();
    executor.run_n(&tf, 5).wait().unwrap();
    executor.wait_for_all();
}

#[test]
fn run_until_checks_predicate_after_every_pass() {
    let executions = Arc::new(AtomicUsize::new(0));
    let evaluations = Arc::new(AtomicUsize::new(0));

    let mut tf = Taskflow::new();
    {
        let executions = Arc::clone(&executions);
        tf.emplace(move || {
            executions.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Record how many executions each evaluation observed; the pass
    // preceding an evaluation must have fully completed.
    let observed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let executor = Executor::with_workers(2);
    let handle = {
        let executions = Arc::clone(&executions);
        let evaluations = Arc::clone(&evaluations);
        let observed = Arc::clone(&observed);
        executor.run_until(&tf, move || {
            observed.lock().unwrap().push(executions.load(Ordering::SeqCst));
            evaluations.fetch_add(1, Ordering::SeqCst) + 1 >= 3
        })
    };
    handle.wait().unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 3);
    assert_eq!(evaluations.load(Ordering::SeqCst), 3);
    assert_eq!(*observed.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn wait_for_all_spans_taskflows() {
    let counter = Arc::new(AtomicUsize::new(0));
    let executor = Executor::with_workers(3);

    let mut flows = Vec::new();
    for _ in 0..3 {
        let mut tf = Taskflow::new();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            tf.emplace(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        flows.push(tf);
    }
    for tf in &flows {
        let _handle = executor.run(tf);
        let _handle = executor.run(tf);
    }

    executor.wait_for_all();
    assert_eq!(counter.load(Ordering::SeqCst), 3 * 4 * 2);
}

#[test]
fn panicking_body_fails_the_run_and_spares_independents() {
    let independent_ran = Arc::new(AtomicBool::new(false));
    let mut tf = Taskflow::new();
    let boom = tf.emplace(|| panic!("kaboom"));
    boom.set_name("boom");
    {
        let independent_ran = Arc::clone(&independent_ran);
        tf.emplace(move || {
            independent_ran.store(true, Ordering::SeqCst);
        });
    }

    let executor = Executor::with_workers(2);
    let error = executor.run(&tf).wait().unwrap_err();
    match error {
        RunError::TaskPanicked { task, message } => {
            assert_eq!(task, "boom");
            assert!(message.contains("kaboom"), "unexpected message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The run only completes once every node, the panicking one included,
    // has been accounted for.
    assert!(independent_ran.load(Ordering::SeqCst));
}

#[test]
fn failure_does_not_cut_remaining_passes() {
    let executions = Arc::new(AtomicUsize::new(0));
    let mut tf = Taskflow::new();
    {
        let executions = Arc::clone(&executions);
        tf.emplace(move || {
            if executions.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first pass only");
            }
        });
    }

    let executor = Executor::with_workers(2);
    let result = executor.run_n(&tf, 3).wait();
    assert!(result.is_err());
    assert_eq!(executions.load(Ordering::SeqCst), 3);
}

#[test]
fn handle_supports_timeout_and_polling() {
    let mut tf = Taskflow::new();
    tf.emplace(|| thread::sleep(Duration::from_millis(50)));

    let executor = Executor::with_workers(2);
    let handle = executor.run(&tf);
    assert!(handle.wait_timeout(Duration::from_millis(1)).is_none());
    assert!(handle.wait().is_ok());
    assert_eq!(handle.try_wait(), Some(Ok(())));
}

#[test]
fn worker_count_is_honored() {
    let executor = Executor::with_workers(4);
    assert_eq!(executor.num_workers(), 4);
    // Zero is clamped: the pool always has at least one worker.
    let executor = Executor::with_workers(0);
    assert_eq!(executor.num_workers(), 1);
}
