//! Error-reporting sink (SPEC_FULL §10.4): a trait seam standing in for the
//! Sentry SaaS integration named out of scope in spec §1/§7, grounded in
//! `original_source/src/pkg/errors.go`'s `SENTRY_DSN`-presence branch. Lives
//! alongside the Control Plane contract rather than in `runner-core` because
//! both `runner-engine` (the caller, on non-success job outcomes and caught
//! task panics) and `runner-daemon` (the wiring site) already depend on this
//! crate for `ControlPlaneClient`.

use std::collections::HashMap;

/// Reports an error plus free-form tags to whatever sink is configured.
/// `TracingErrorReporter` is the only implementation in this workspace; a
/// real Sentry adapter would implement this trait without touching callers.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, message: &str, tags: HashMap<String, String>);
}

/// Default reporter: logs at ERROR with the tags as structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, message: &str, tags: HashMap<String, String>) {
        tracing::error!(?tags, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_reporter_does_not_panic_on_empty_tags() {
        TracingErrorReporter.report("boom", HashMap::new());
    }
}
