//! Remote instance client abstraction.
//!
//! A [`RemoteInstanceClient`] issues single calls against the cloud
//! provider. It never retries and keeps no per-instance state; region and
//! instance id travel with every call so one client can serve many drivers
//! at once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ProvisioningConfig, Secret};
use crate::status::{InstanceStatus, map_status};

/// Identifies the remote instance owned by one driver.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider identifier; empty until the instance has been created.
    pub instance_id: String,
    /// Region the instance lives in.
    pub region: String,
}

impl InstanceHandle {
    /// Creates an unassigned handle for `region`.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            instance_id: String::new(),
            region: region.into(),
        }
    }

    /// Returns the instance id once one has been recorded.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        let id = self.instance_id.trim();
        (!id.is_empty()).then_some(id)
    }

    pub(crate) fn assign(&mut self, instance_id: impl Into<String>) {
        self.instance_id = instance_id.into();
    }

    pub(crate) fn clear(&mut self) {
        self.instance_id.clear();
    }
}

/// Provider view of an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceDescription {
    /// Raw provider state, for example `Running` or `Install Fail`.
    pub raw_state: String,
    /// Private address, once assigned.
    pub private_ip: Option<String>,
    /// Public address, once bound.
    pub public_ip: Option<String>,
}

impl InstanceDescription {
    /// Returns the canonical status for the raw provider state.
    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        map_status(&self.raw_state)
    }
}

/// Addresses and firewall attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkInfo {
    /// Private address inside the region.
    pub private_ip: String,
    /// Elastic IP, absent for private-only machines.
    pub public_ip: Option<String>,
    /// Security group attached to the instance.
    pub security_group_id: u64,
}

impl NetworkInfo {
    /// Returns the address a client should use to reach the instance.
    #[must_use]
    pub fn reachable_address(&self, private_ip_only: bool) -> Option<&str> {
        let public = if private_ip_only {
            None
        } else {
            self.public_ip.as_deref().filter(|ip| !ip.is_empty())
        };
        public.or_else(|| Some(self.private_ip.as_str()).filter(|ip| !ip.is_empty()))
    }
}

/// SSH key pair created for a machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPairRecord {
    /// OpenSSH public key line.
    pub public_key_material: String,
    /// Location of the private key on the local host.
    pub private_key_ref: Utf8PathBuf,
}

/// Where and as whom to connect when pushing a key pair.
#[derive(Clone)]
pub struct SshTarget {
    /// Host name or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Login password set at instance creation.
    pub password: Secret,
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Power and teardown operations on an existing instance.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InstanceAction {
    /// Power on a stopped instance.
    Start,
    /// Shut the instance down gracefully.
    Stop,
    /// Reboot the instance.
    Reboot,
    /// Cut power immediately.
    Kill,
    /// Delete the instance.
    Terminate,
}

impl InstanceAction {
    /// Verb used in log lines and error messages.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reboot => "restart",
            Self::Kill => "kill",
            Self::Terminate => "remove",
        }
    }
}

/// Classified failures surfaced by a remote client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// The provider could not be reached or the response was unreadable.
    #[error("network error: {message}")]
    Network {
        /// Transport-level description.
        message: String,
    },
    /// The provider rejected the credentials or request signature.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Provider message.
        message: String,
    },
    /// The referenced resource does not exist.
    #[error("not found: {resource}")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },
    /// The provider refused the request.
    #[error("provider rejected request (code {code}): {message}")]
    Rejected {
        /// Provider return code.
        code: i64,
        /// Provider message.
        message: String,
    },
    /// A local helper such as `ssh-keygen` or `ssh` failed.
    #[error("{program} failed: {message}")]
    Command {
        /// Program that failed.
        program: String,
        /// Exit status or error output.
        message: String,
    },
}

/// Future returned by remote client operations.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Operations the provisioning state machine and lifecycle controller need
/// from the cloud provider.
pub trait RemoteInstanceClient: Send + Sync {
    /// Creates the key pair later installed on the instance.
    fn create_key_pair<'a>(
        &'a self,
        config: &'a ProvisioningConfig,
    ) -> RemoteFuture<'a, KeyPairRecord>;

    /// Creates an instance and returns its provider id.
    fn create_instance<'a>(
        &'a self,
        config: &'a ProvisioningConfig,
        key_pair: &'a KeyPairRecord,
    ) -> RemoteFuture<'a, String>;

    /// Fetches the current provider view of an instance.
    fn describe_instance<'a>(
        &'a self,
        region: &'a str,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, InstanceDescription>;

    /// Applies a power or teardown action.
    fn instance_action<'a>(
        &'a self,
        action: InstanceAction,
        region: &'a str,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, ()>;

    /// Creates the firewall and addresses for an instance.
    fn create_network<'a>(
        &'a self,
        config: &'a ProvisioningConfig,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, NetworkInfo>;

    /// Installs the public half of `key_pair` on a running instance.
    fn upload_key_pair<'a>(
        &'a self,
        handle: &'a InstanceHandle,
        target: &'a SshTarget,
        key_pair: &'a KeyPairRecord,
    ) -> RemoteFuture<'a, ()>;
}
