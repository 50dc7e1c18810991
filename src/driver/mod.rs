//! The per-machine driver.
//!
//! A [`Driver`] owns the configuration and instance handle for exactly one
//! UHost. Provisioning lives in `provision`, power and status operations in
//! `lifecycle`.

mod lifecycle;
mod provision;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_SSH_USER, ProvisioningConfig};
use crate::error::DriverError;
use crate::remote::{InstanceHandle, KeyPairRecord, NetworkInfo, RemoteInstanceClient};
use crate::wait::WaitPolicy;

pub use provision::Rollback;

/// Name reported to the host tool.
pub const DRIVER_NAME: &str = "ucloud";
/// Port the Docker daemon listens on.
pub const DOCKER_PORT: u16 = 2376;

/// Host-visible state of a machine, persisted between invocations.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DriverState {
    /// Machine name.
    pub machine_name: String,
    /// Region of the instance.
    pub region: String,
    /// Provider instance id; empty before creation.
    pub instance_id: String,
    /// Address used for SSH and Docker.
    pub ip_address: Option<String>,
    /// Network details recorded during provisioning.
    pub network: Option<NetworkInfo>,
    /// SSH login user.
    pub ssh_user: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Path to the machine's private key.
    pub ssh_key_path: Utf8PathBuf,
}

/// Provisions and operates one UHost instance.
#[derive(Debug)]
pub struct Driver<C> {
    machine_name: String,
    config: ProvisioningConfig,
    client: C,
    handle: InstanceHandle,
    network: Option<NetworkInfo>,
    key_pair: Option<KeyPairRecord>,
    ip_address: Option<String>,
    wait_policy: WaitPolicy,
    rollback: Rollback,
    cancel: CancellationToken,
}

impl<C: RemoteInstanceClient> Driver<C> {
    /// Creates a driver for a machine that has not been provisioned yet.
    #[must_use]
    pub fn new(machine_name: impl Into<String>, config: ProvisioningConfig, client: C) -> Self {
        let handle = InstanceHandle::new(config.region.as_str());
        Self {
            machine_name: machine_name.into(),
            config,
            client,
            handle,
            network: None,
            key_pair: None,
            ip_address: None,
            wait_policy: WaitPolicy::default(),
            rollback: Rollback::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Rebuilds a driver from state saved after an earlier `create`.
    #[must_use]
    pub fn restore(state: DriverState, config: ProvisioningConfig, client: C) -> Self {
        let region = if state.region.trim().is_empty() {
            config.region.as_str().to_owned()
        } else {
            state.region
        };
        let mut driver = Self::new(state.machine_name, config, client);
        driver.handle = InstanceHandle {
            instance_id: state.instance_id,
            region,
        };
        driver.ip_address = state.ip_address;
        driver.network = state.network;
        if !state.ssh_user.trim().is_empty() {
            driver.config.ssh_user = state.ssh_user;
        }
        if state.ssh_port != 0 {
            driver.config.ssh_port = state.ssh_port;
        }
        if !state.ssh_key_path.as_str().is_empty() {
            driver.config.ssh_key_path = state.ssh_key_path;
        }
        driver
    }

    /// Overrides the status polling policy.
    #[must_use]
    pub const fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Chooses what happens to a half-provisioned instance.
    #[must_use]
    pub const fn with_rollback(mut self, rollback: Rollback) -> Self {
        self.rollback = rollback;
        self
    }

    /// Uses `token` to cancel status polling.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the status polling policy.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        self.wait_policy
    }

    /// Returns a token that cancels in-flight status polling.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the driver name.
    #[must_use]
    pub const fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    /// Returns the machine name.
    #[must_use]
    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    /// Returns the provisioning configuration.
    #[must_use]
    pub const fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Returns the instance handle.
    #[must_use]
    pub const fn handle(&self) -> &InstanceHandle {
        &self.handle
    }

    /// Returns the recorded instance id, if any.
    #[must_use]
    pub fn instance_id(&self) -> Option<&str> {
        self.handle.instance_id()
    }

    /// Returns the network details recorded during provisioning.
    #[must_use]
    pub const fn network(&self) -> Option<&NetworkInfo> {
        self.network.as_ref()
    }

    /// Returns the key pair created during provisioning.
    #[must_use]
    pub const fn key_pair(&self) -> Option<&KeyPairRecord> {
        self.key_pair.as_ref()
    }

    /// Records the address used for SSH and Docker.
    pub fn set_ip_address(&mut self, ip: impl Into<String>) {
        self.ip_address = Some(ip.into());
    }

    /// Returns the address used for SSH and Docker.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingIpAddress`] when none is recorded.
    pub fn get_ip(&self) -> Result<String, DriverError> {
        self.ip_address
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .map(str::to_owned)
            .ok_or(DriverError::MissingIpAddress)
    }

    /// Returns the Docker endpoint, `tcp://<ip>:2376`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingIpAddress`] when no IP is recorded.
    pub fn get_url(&self) -> Result<String, DriverError> {
        let ip = self.get_ip()?;
        Ok(format!("tcp://{ip}:{DOCKER_PORT}"))
    }

    /// Returns the SSH host name, which is the machine's IP.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingIpAddress`] when no IP is recorded.
    pub fn get_ssh_hostname(&self) -> Result<String, DriverError> {
        self.get_ip()
    }

    /// Returns the SSH login user, `root` unless configured otherwise.
    #[must_use]
    pub fn get_ssh_username(&self) -> &str {
        let user = self.config.ssh_user.trim();
        if user.is_empty() { DEFAULT_SSH_USER } else { user }
    }

    /// Captures the state a host tool needs to reopen this machine later.
    #[must_use]
    pub fn state(&self) -> DriverState {
        DriverState {
            machine_name: self.machine_name.clone(),
            region: self.handle.region.clone(),
            instance_id: self.handle.instance_id.clone(),
            ip_address: self.ip_address.clone(),
            network: self.network.clone(),
            ssh_user: self.get_ssh_username().to_owned(),
            ssh_port: self.config.ssh_port,
            ssh_key_path: self.config.ssh_key_path.clone(),
        }
    }

    fn require_instance(&self, operation: &'static str) -> Result<(&str, &str), DriverError> {
        let region = self.handle.region.trim();
        match self.handle.instance_id() {
            Some(instance_id) if !region.is_empty() => Ok((region, instance_id)),
            _ => Err(DriverError::MissingInstance {
                machine: self.machine_name.clone(),
                operation,
            }),
        }
    }
}

#[cfg(test)]
mod tests;
