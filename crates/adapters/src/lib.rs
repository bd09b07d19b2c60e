// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! runner-adapters: the per-job building blocks that touch the outside
//! world — the safe byte buffer and bounded stack leaves, the log
//! processor chain and streamer built on top of them, and the Kubernetes
//! workload driver. Nothing here knows about the worker pool, the poller,
//! or the autoscaler; those live in `runner-engine`.

pub mod buffer;
pub mod log;
pub mod outcome;
pub mod stack;
pub mod workload;

pub use buffer::{ReadResult, SafeBuffer};
pub use log::streamer::LogStreamer;
pub use log::{LogProcessor, MirrorProcessor, PrefixProcessor, SanitizeProcessor, ShipProcessor};
pub use outcome::OutcomeVariableProcessor;
pub use stack::Stack;
pub use workload::{KubernetesWorkloadDriver, WorkloadDriver, WorkloadError, WorkloadHandle};

#[cfg(feature = "test-support")]
pub use workload::FakeWorkloadDriver;
