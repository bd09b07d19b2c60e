//! Log processor chain (spec §4.4): a flat sequence of processors behind one
//! capability trait, composed in order by the streamer. A processor
//! returning the empty string drops the line from the downstream stream;
//! any other return value is the (possibly transformed) line passed onward.
//!
//! Grounded in `original_source/src/pkg/{sanitizeLogProcessor,
//! prefixLogProcessor,loggerLogProcessor,opslevelAppendLogProcessor}.go`,
//! generalized from a single `Process(line)` method to the `ProcessStdout`/
//! `ProcessStderr` split spec §4.4 requires (most processors treat both the
//! same way; the outcome-variable capturer in the original only looks at
//! stdout, but spec §4.4 names both hooks uniformly, so every processor here
//! implements both explicitly rather than inheriting a shared default).

pub mod mirror;
pub mod prefix;
pub mod sanitizer;
pub mod shipper;
pub mod streamer;

pub use mirror::MirrorProcessor;
pub use prefix::PrefixProcessor;
pub use sanitizer::SanitizeProcessor;
pub use shipper::ShipProcessor;

use async_trait::async_trait;
use runner_core::JobOutcome;

#[async_trait]
pub trait LogProcessor: Send + Sync {
    async fn process_stdout(&self, line: &str) -> String;
    async fn process_stderr(&self, line: &str) -> String;
    async fn flush(&self, outcome: &JobOutcome);
}
