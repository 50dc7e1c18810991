//! Errors surfaced by the driver.

use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::RemoteError;
use crate::status::InstanceStatus;

/// Errors raised while provisioning or operating a machine.
///
/// Provisioning variants name the step that failed; none of them imply
/// that earlier steps were undone.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DriverError {
    /// Required input is missing or invalid; no remote call was made.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    /// The driver already tracks an instance.
    #[error("machine {machine} already has instance {instance_id}")]
    InstanceExists {
        /// Machine name.
        machine: String,
        /// Recorded instance id.
        instance_id: String,
    },
    /// Key pair creation failed.
    #[error("unable to create key pair: {0}")]
    KeyPair(#[source] RemoteError),
    /// Instance creation failed.
    #[error("create UHost failed: {0}")]
    InstanceCreate(#[source] RemoteError),
    /// The instance did not reach `Running` within the polling budget.
    #[error(
        "wait for instance {instance_id} running timed out after {attempts} attempts \
         (last status: {last_status})"
    )]
    ProvisioningTimeout {
        /// Instance being waited on.
        instance_id: String,
        /// Polls made.
        attempts: u32,
        /// Last status observed.
        last_status: InstanceStatus,
    },
    /// The wait was cancelled before the instance reached `Running`.
    #[error("wait for instance {instance_id} running cancelled after {attempts} attempts")]
    ProvisioningCancelled {
        /// Instance being waited on.
        instance_id: String,
        /// Polls completed.
        attempts: u32,
    },
    /// Network creation failed; the instance is running but unreachable.
    #[error("create networks failed for instance {instance_id}: {source}")]
    Network {
        /// Instance the network was for.
        instance_id: String,
        /// Provider failure.
        #[source]
        source: RemoteError,
    },
    /// The key pair could not be installed on the instance.
    #[error("upload key pair failed for instance {instance_id}: {reason}")]
    KeyPairUpload {
        /// Target instance.
        instance_id: String,
        /// What went wrong.
        reason: String,
        /// Provider failure, when the upload was attempted.
        #[source]
        source: Option<RemoteError>,
    },
    /// An operation needs an instance but none is recorded.
    #[error("cannot {operation}: no instance recorded for machine {machine}")]
    MissingInstance {
        /// Machine name.
        machine: String,
        /// Operation that was attempted.
        operation: &'static str,
    },
    /// No IP address has been recorded yet.
    #[error("IP address is not set")]
    MissingIpAddress,
    /// A remote call on an existing instance failed.
    #[error("cannot {verb} instance {instance_id}: {source}")]
    RemoteProvider {
        /// Operation verb.
        verb: &'static str,
        /// Target instance.
        instance_id: String,
        /// Provider failure.
        #[source]
        source: RemoteError,
    },
}
