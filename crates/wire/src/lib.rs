// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! runner-wire: the Control Plane wire contract (spec §6) plus broker mode
//! (spec §9). Everything here is consumed by `runner-engine`'s poller and
//! worker pool; nothing here knows about Kubernetes or log processing.

pub mod broker;
pub mod client;
pub mod error_reporter;
pub mod types;

pub use broker::{BrokerControlPlaneClient, BrokerEnvelope, BrokerJobSource, InMemoryJobQueue, JobQueue};
pub use client::{ControlPlaneClient, ControlPlaneError, GraphqlControlPlaneClient};
pub use error_reporter::{ErrorReporter, TracingErrorReporter};
pub use types::{BrokerJobFields, LogBatch, OutcomeReport, PendingJobResponse};
