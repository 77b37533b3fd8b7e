//! Worker pool
//!
//! One long-lived rayon pool per solver, sized by `n_threads`. Work is
//! claimed from a shared monotonic counter, so node distribution adapts to
//! whichever worker is free; per-node results are merged back by index so
//! output ordering never depends on completion order.
//!
//! nalgebra performs no internal threading, so nesting this pool over the
//! dense kernels cannot oversubscribe.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use horizon_core::error::SolverError;

/// Shared monotonic work counter; each worker claims the next index with a
/// wait-free `fetch_add`.
#[derive(Debug, Default)]
pub struct WorkIndex(AtomicUsize);

impl WorkIndex {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    pub fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Long-lived thread pool with per-worker task dispatch.
pub struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
    n_threads: usize,
}

impl WorkerPool {
    /// Builds a pool of `n_threads` workers. A single-threaded pool runs
    /// tasks inline on the caller, which keeps that mode bit-reproducible.
    pub fn new(n_threads: usize) -> Result<Self, SolverError> {
        if n_threads == 0 {
            return Err(SolverError::InvalidConfiguration(
                "n_threads must be at least 1".into(),
            ));
        }
        let pool = if n_threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n_threads)
                    .build()
                    .map_err(|e| SolverError::InvalidConfiguration(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self { pool, n_threads })
    }

    pub fn n_threads(&self) -> usize {
        self.n_threads
    }

    /// Runs `task(worker_id)` once per worker and returns the results in
    /// worker order. Blocks until every worker has finished.
    pub fn run<R, F>(&self, task: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        match &self.pool {
            None => vec![task(0)],
            Some(pool) => pool.broadcast(|ctx| task(ctx.index())),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("n_threads", &self.n_threads)
            .finish()
    }
}

/// Exclusive per-worker resources (problem clones, rollout engines). Each
/// worker locks only its own slot, so the mutexes are uncontended.
pub struct WorkerLocal<T>(Vec<Mutex<T>>);

impl<T> WorkerLocal<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(items.into_iter().map(Mutex::new).collect())
    }

    pub fn lock(&self, worker_id: usize) -> std::sync::MutexGuard<'_, T> {
        self.0[worker_id].lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mutable access to every slot from the owning thread.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.0.iter_mut().map(|m| m.get_mut().unwrap())
    }
}

/// Merges `(index, value)` pairs produced by racing workers into a dense,
/// node-ordered vector. Every index in `0..len` must be produced exactly
/// once.
pub fn merge_by_index<T>(len: usize, batches: Vec<Vec<(usize, T)>>) -> Vec<T> {
    let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
    for batch in batches {
        for (i, value) in batch {
            debug_assert!(slots[i].is_none(), "node {i} written twice");
            slots[i] = Some(value);
        }
    }
    slots
        .into_iter()
        .map(|s| s.expect("every node index must be produced"))
        .collect()
}
