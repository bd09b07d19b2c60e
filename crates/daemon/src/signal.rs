//! Signal handling (spec §5, §8 scenario 6): cancels the root
//! `CancellationToken` on SIGINT/SIGTERM so the poller stops accepting new
//! jobs while in-flight workers finish naturally. Grounded in
//! `original_source/src/cmd/root.go`'s `signal.NotifyContext` wiring.

use tokio_util::sync::CancellationToken;

/// Waits for an OS interrupt/termination signal, then cancels `token`.
/// Intended to be spawned once at startup; returns when the signal fires.
pub async fn wait_and_cancel(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM, starting graceful shutdown"),
            _ = sigint.recv() => tracing::info!("received SIGINT, starting graceful shutdown"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received ctrl-c, starting graceful shutdown");
    }
    token.cancel();
}
