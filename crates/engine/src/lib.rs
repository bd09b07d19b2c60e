// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! runner-engine: the worker pool, poller, and leader-elected autoscaler
//! (spec §4.8-§4.9). Built on `runner-adapters`' per-job building blocks;
//! consumed by `runner-daemon`'s startup wiring.

pub mod autoscaler;
pub mod leader;
pub mod metrics;
pub mod pool;
pub mod poller;
pub mod worker;

pub use autoscaler::{Autoscaler, AutoscalerLimits};
pub use leader::{LeaderCallbacks, LeaderElectionConfig, LeaseElector};
pub use metrics::{JobMetricsSink, NoopMetricsSink};
pub use pool::{clamp_concurrency, spawn, WorkerPoolHandle};
pub use poller::Poller;
pub use worker::{run_job, worker_loop, WorkerDeps};
