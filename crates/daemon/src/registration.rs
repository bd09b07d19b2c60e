//! Registration (spec §4.8, §7): register once at startup to obtain a
//! `RunnerIdentity`, deregister once at clean shutdown. Failure to register
//! is fatal at startup (spec §7 taxonomy).

use runner_core::RunnerIdentity;
use runner_wire::{ControlPlaneClient, ControlPlaneError};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to register with the control plane: {0}")]
pub struct RegistrationError(#[from] ControlPlaneError);

pub async fn register(
    client: &dyn ControlPlaneClient,
    queue: Option<&str>,
) -> Result<RunnerIdentity, RegistrationError> {
    let identity = client.register(queue).await?;
    tracing::info!(runner_id = %identity.id, "registered with control plane");
    Ok(identity)
}

pub async fn deregister(client: &dyn ControlPlaneClient, identity: &RunnerIdentity) {
    if let Err(e) = client.deregister(&identity.id).await {
        tracing::warn!(runner_id = %identity.id, error = %e, "failed to deregister with control plane");
    } else {
        tracing::info!(runner_id = %identity.id, "deregistered with control plane");
    }
}
