//! Worker pool (spec §4.8): wires the poller and N worker tasks together
//! behind a single capacity-1 job channel — the Rust analogue of Go's
//! unbounded-consumer channel fan-in, with the same backpressure property
//! (the poller's `send` blocks until a worker is free).

use std::sync::Arc;
use std::time::Duration;

use runner_core::{Clock, Job, RunnerId};
use runner_wire::ControlPlaneClient;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::poller::Poller;
use crate::worker::{worker_loop, WorkerDeps};

/// Job-channel capacity. One in flight between the poller and the worker
/// pool is sufficient to provide backpressure (spec §4.8: "send... blocks
/// if all workers are busy — this is the intended backpressure") without
/// buffering a second job nobody has claimed yet.
const JOB_CHANNEL_CAPACITY: usize = 1;

pub struct WorkerPoolHandle {
    workers: Vec<JoinHandle<()>>,
    poller: JoinHandle<()>,
}

impl WorkerPoolHandle {
    /// Waits for the poller to observe cancellation (closing the channel)
    /// and every worker to finish its current job and drain.
    pub async fn join(self) {
        let _ = self.poller.await;
        for w in self.workers {
            let _ = w.await;
        }
    }
}

/// Concurrency clamped to at least 1 (spec §8 boundary behavior: zero or
/// negative configured concurrency is clamped to 1).
pub fn clamp_concurrency(configured: i64) -> usize {
    configured.max(1) as usize
}

/// Spawns the poller and `concurrency` worker tasks, returning a handle the
/// caller joins after cancelling `cancel`.
pub fn spawn<C: Clock>(
    control_plane: Arc<dyn ControlPlaneClient>,
    runner_id: RunnerId,
    concurrency: usize,
    poll_interval: Duration,
    worker_deps: WorkerDeps<C>,
    cancel: CancellationToken,
) -> WorkerPoolHandle {
    let (tx, rx) = mpsc::channel::<Job>(JOB_CHANNEL_CAPACITY);
    let shared_rx = Arc::new(AsyncMutex::new(rx));

    let workers = (0..concurrency.max(1))
        .map(|index| {
            let deps = worker_deps.clone();
            let jobs = shared_rx.clone();
            tokio::spawn(worker_loop(index, jobs, deps))
        })
        .collect();

    let poller = Poller::new(control_plane, runner_id, poll_interval);
    let poller_handle = tokio::spawn(poller.run(tx, cancel));

    WorkerPoolHandle { workers, poller: poller_handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_negative_concurrency_clamp_to_one() {
        assert_eq!(clamp_concurrency(0), 1);
        assert_eq!(clamp_concurrency(-3), 1);
        assert_eq!(clamp_concurrency(5), 5);
    }
}
