//! Parallel sufficient-statistics accumulation.
//!
//! Generic map-reduce over a list of work items: items are partitioned
//! across a bounded pool of worker threads by static round-robin
//! assignment, each worker accumulates a fully local partial result, and
//! the coordinator merges exactly one tagged completion message per worker.
//! The reduction is elementwise summation, which is commutative and
//! associative, so worker completion order does not affect the result
//! beyond floating-point rounding order.
//!
//! Workers never share mutable state; failures inside a worker abort its
//! shard and travel back through the completion channel as tagged errors.
//! The coordinator blocks until all workers have reported and every thread
//! handle is joined before this module returns, on success and on error.

use std::sync::mpsc;
use std::thread;

use crate::errors::{validate_nonzero, CompensationError, CompensationResult};

/// Partial statistics produced by one worker shard.
///
/// `merge` folds another worker's partial result into `self` by elementwise
/// summation (or an equivalent commutative, associative combination).
pub trait ShardStats: Send {
    /// Folds `other` into `self`.
    fn merge(&mut self, other: Self);
}

/// Side-effect-only work units reduce to a unit completion token.
impl ShardStats for () {
    fn merge(&mut self, _other: ()) {}
}

/// Returns the host's available core count, falling back to 1.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Resolves a caller-supplied worker count.
///
/// `None` resolves to [`default_workers`]; an explicit `0` is rejected.
pub fn resolve_workers(requested: Option<usize>) -> CompensationResult<usize> {
    match requested {
        Some(count) => {
            validate_nonzero(count, "workers")?;
            Ok(count)
        }
        None => Ok(default_workers()),
    }
}

/// Runs `per_item` over every work item in parallel and reduces the
/// per-worker partial results with [`ShardStats::merge`].
///
/// Item `i` is assigned to worker `i mod P`, deterministically and
/// independently of runtime timing, so splitting the same list across a
/// different worker count yields numerically equivalent statistics up to
/// floating-point summation order. The pool never exceeds the item count.
///
/// Any worker error aborts the whole operation with
/// [`CompensationError::WorkerFailure`] wrapping the original cause; there
/// is no partial success. All spawned threads are joined before returning.
pub fn accumulate_parallel<I, S, Z, F>(
    items: &[I],
    workers: usize,
    zero: Z,
    per_item: F,
) -> CompensationResult<S>
where
    I: Sync,
    S: ShardStats,
    Z: Fn() -> S + Sync,
    F: Fn(&I, &mut S) -> CompensationResult<()> + Sync,
{
    validate_nonzero(workers, "workers")?;
    let pool = workers.min(items.len()).max(1);
    log::debug!(
        "accumulating {} work items across {} workers",
        items.len(),
        pool
    );

    // Bounded to the pool size so a worker's single send never blocks.
    let (sender, receiver) = mpsc::sync_channel::<(usize, CompensationResult<S>)>(pool);

    thread::scope(|scope| {
        for worker in 0..pool {
            let sender = sender.clone();
            let zero = &zero;
            let per_item = &per_item;
            scope.spawn(move || {
                let mut local = zero();
                let mut outcome: CompensationResult<()> = Ok(());
                for item in items.iter().skip(worker).step_by(pool) {
                    if let Err(cause) = per_item(item, &mut local) {
                        outcome = Err(cause);
                        break;
                    }
                }
                // Exactly one completion message per worker. The receiver
                // outlives the scope, so a send can only fail if the
                // coordinator itself panicked.
                let _ = sender.send((worker, outcome.map(|()| local)));
            });
        }
        drop(sender);

        // Partials are parked by worker index and folded in index order
        // once all have arrived, so the reduction is deterministic and
        // independent of completion timing.
        let mut partials: Vec<Option<S>> = (0..pool).map(|_| None).collect();
        let mut failure: Option<CompensationError> = None;
        for _ in 0..pool {
            match receiver.recv() {
                Ok((worker, Ok(partial))) => {
                    partials[worker] = Some(partial);
                }
                Ok((worker, Err(cause))) => {
                    failure.get_or_insert(CompensationError::WorkerFailure {
                        worker,
                        source: Some(Box::new(cause)),
                    });
                }
                // Every sender is gone without a full count of reports: a
                // worker died without sending. The scope still joins every
                // handle before we return.
                Err(mpsc::RecvError) => break,
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }
        let mut merged = zero();
        for (worker, slot) in partials.into_iter().enumerate() {
            match slot {
                Some(partial) => merged.merge(partial),
                None => {
                    return Err(CompensationError::WorkerFailure {
                        worker,
                        source: None,
                    })
                }
            }
        }
        Ok(merged)
    })
}
