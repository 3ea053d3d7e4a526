// Copyright 2026 The Interpose Project Authors
// Use of this source code is governed by an MIT-style license that can be
// found in the LICENSE file.

//! Runs a user-supplied unit of work over a bounded queue of items with a
//! fixed number of OS-thread workers.
//!
//! There is no work-stealing, backpressure or cancellation: items are
//! independent and numerous, and the queue is drained to completion. Each
//! worker owns a private, lazily-initialised `ctx` slot so it can build a
//! thread-local resource (a database connection, typically) on first use
//! and reuse it across the items it dequeues.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use diagnostics::Diagnostics;

/// `max(2, floor(1.5 * cpu_count))`, the reference tool's default worker
/// count when the caller doesn't pin one down explicitly.
pub fn default_worker_count() -> usize {
    let ncpu = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    std::cmp::max(2, (1.5 * ncpu as f64).floor() as usize)
}

/// The two parallel vectors `join` hands back: per-worker result lists and
/// per-worker errors, both of length `num_workers`.
pub struct JoinResult<T> {
    pub results: Vec<Vec<T>>,
    pub errors: Vec<Vec<anyhow::Error>>,
}

/// Runs `action` over `items` with `num_workers` worker threads.
///
/// Within one worker, items are processed in queue-dequeue order; the first
/// error `action` returns ends that worker's loop (it stops consuming the
/// queue), but other workers are unaffected and keep draining it. Ordering
/// between workers is unspecified.
pub fn run<Item, Ctx, T, F>(items: Vec<Item>, num_workers: usize, action: F) -> JoinResult<T>
where
    Item: Send + 'static,
    T: Send + 'static,
    Ctx: Send + 'static,
    F: Fn(Item, &mut Option<Ctx>) -> anyhow::Result<T> + Send + Sync + 'static,
{
    let queue = Arc::new(Mutex::new(VecDeque::from(items)));
    let action = Arc::new(action);
    let num_workers = num_workers.max(1);

    tracing::debug!(num_workers, "starting task pool");

    let handles: Vec<_> = (0..num_workers)
        .map(|worker| {
            let queue = Arc::clone(&queue);
            let action = Arc::clone(&action);
            thread::spawn(move || {
                let mut ctx: Option<Ctx> = None;
                let mut results = Vec::new();
                let mut errors = Vec::new();
                loop {
                    let item = {
                        let mut queue = queue.lock().unwrap();
                        queue.pop_front()
                    };
                    let Some(item) = item else {
                        break;
                    };
                    match action(item, &mut ctx) {
                        Ok(value) => results.push(value),
                        Err(err) => {
                            tracing::debug!(worker, error = %err, "worker stopping after error");
                            errors.push(err);
                            break;
                        }
                    }
                }
                (results, errors)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(num_workers);
    let mut errors = Vec::with_capacity(num_workers);
    for handle in handles {
        let (worker_results, worker_errors) = handle.join().expect("taskpool worker panicked");
        results.push(worker_results);
        errors.push(worker_errors);
    }

    JoinResult { results, errors }
}

/// Warns once per collected error (through `diag`) and returns the first
/// one, if any: surface failures rather than silently discarding them.
pub fn raise_first(errors: Vec<Vec<anyhow::Error>>, diag: &Diagnostics) -> Option<anyhow::Error> {
    let mut first = None;
    for (worker, worker_errors) in errors.into_iter().enumerate() {
        for err in worker_errors {
            diag.warn(
                "worker-exception",
                &worker.to_string(),
                &format!("{err:#}"),
            );
            if first.is_none() {
                first = Some(err);
            }
        }
    }
    first
}
