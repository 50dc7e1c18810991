//! UCloud implementation of [`RemoteInstanceClient`].
//!
//! Every call is a signed GET against the UCloud public API. The client
//! keeps only immutable credentials and an HTTP connection pool, so one
//! value can be cloned into any number of drivers.

mod api;
mod keys;
mod network;
mod signature;

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use camino::Utf8PathBuf;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::command::{CommandRunner, ProcessCommandRunner};
use crate::config::{ConfigError, Credentials, ProvisioningConfig, UCloudConfig};
use crate::driver::{Driver, DriverState};
use crate::remote::{
    InstanceAction, InstanceDescription, InstanceHandle, KeyPairRecord, NetworkInfo, RemoteError,
    RemoteFuture, RemoteInstanceClient, SshTarget,
};

use api::{
    CreateUHostInstanceResponse, DescribeUHostInstanceResponse, Empty, PRIVATE_IP_TYPE, Params,
    UHostInstance,
};

/// Public UCloud API endpoint.
pub const UCLOUD_API_BASE: &str = "https://api.ucloud.cn";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_MODE: &str = "Password";
const CHARGE_TYPE: &str = "Dynamic";

/// Client for the UCloud UHost, security group, and EIP APIs.
///
/// Local helpers (`ssh-keygen`, `sshpass`) run through `R`, which tests
/// replace with a scripted runner.
#[derive(Clone, Debug)]
pub struct UCloudClient<R = ProcessCommandRunner> {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    runner: R,
}

impl UCloudClient {
    /// Creates a client that shells out to the host's SSH tools.
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self::with_runner(credentials, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> UCloudClient<R> {
    /// Creates a client that runs local helpers through `runner`.
    #[must_use]
    pub fn with_runner(credentials: Credentials, runner: R) -> Self {
        Self {
            http: http_client(HTTP_TIMEOUT),
            base_url: UCLOUD_API_BASE.to_owned(),
            credentials,
            runner,
        }
    }

    /// Points the client at a different API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Replaces the per-request timeout (30 seconds by default).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = http_client(timeout);
        self
    }

    /// Returns the API endpoint in use.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the command runner.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    async fn call<T: DeserializeOwned>(&self, params: Params) -> Result<T, RemoteError> {
        let action = params.action();
        debug!(action, "calling UCloud API");
        let query = params.signed(&self.credentials);
        let response = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|err| transport_error(action, &err))?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| transport_error(action, &err))?;
        api::parse_response(action, body)
    }

    async fn fetch_instance(
        &self,
        region: &str,
        instance_id: &str,
    ) -> Result<UHostInstance, RemoteError> {
        let response: DescribeUHostInstanceResponse = self
            .call(
                Params::new("DescribeUHostInstance")
                    .set("Region", region)
                    .set("UHostIds.0", instance_id),
            )
            .await?;
        response
            .uhost_set
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound {
                resource: format!("instance {instance_id}"),
            })
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|err| {
            warn!(error = %err, ?timeout, "cannot build HTTP client; requests will not time out");
            reqwest::Client::new()
        })
}

fn transport_error(action: &str, err: &reqwest::Error) -> RemoteError {
    RemoteError::Network {
        message: format!("{action}: {err}"),
    }
}

const fn action_name(action: InstanceAction) -> &'static str {
    match action {
        InstanceAction::Start => "StartUHostInstance",
        InstanceAction::Stop => "StopUHostInstance",
        InstanceAction::Reboot => "RebootUHostInstance",
        InstanceAction::Kill => "PoweroffUHostInstance",
        InstanceAction::Terminate => "TerminateUHostInstance",
    }
}

fn create_instance_params(config: &ProvisioningConfig) -> Params {
    Params::new("CreateUHostInstance")
        .set("Region", config.region.as_str())
        .set("ImageId", &config.image_id)
        .set("LoginMode", LOGIN_MODE)
        .set("Password", STANDARD.encode(config.password.expose()))
        .set("CPU", config.cpu)
        .set("Memory", config.memory_mb)
        .set("DiskSpace", config.disk_space_mb)
        .set("Name", &config.instance_name)
        .set("ChargeType", CHARGE_TYPE)
}

impl<R: CommandRunner> RemoteInstanceClient for UCloudClient<R> {
    fn create_key_pair<'a>(
        &'a self,
        config: &'a ProvisioningConfig,
    ) -> RemoteFuture<'a, KeyPairRecord> {
        Box::pin(async move { self.prepare_key_pair(config) })
    }

    fn create_instance<'a>(
        &'a self,
        config: &'a ProvisioningConfig,
        _key_pair: &'a KeyPairRecord,
    ) -> RemoteFuture<'a, String> {
        Box::pin(async move {
            let response: CreateUHostInstanceResponse =
                self.call(create_instance_params(config)).await?;
            response
                .uhost_ids
                .into_iter()
                .find(|id| !id.trim().is_empty())
                .ok_or_else(|| RemoteError::Rejected {
                    code: 0,
                    message: String::from("CreateUHostInstance returned no instance id"),
                })
        })
    }

    fn describe_instance<'a>(
        &'a self,
        region: &'a str,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, InstanceDescription> {
        Box::pin(async move {
            let instance = self.fetch_instance(region, instance_id).await?;
            Ok(InstanceDescription {
                private_ip: instance.address(PRIVATE_IP_TYPE),
                public_ip: instance.public_address(),
                raw_state: instance.state,
            })
        })
    }

    fn instance_action<'a>(
        &'a self,
        action: InstanceAction,
        region: &'a str,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            self.call::<Empty>(
                Params::new(action_name(action))
                    .set("Region", region)
                    .set("UHostId", instance_id),
            )
            .await?;
            Ok(())
        })
    }

    fn create_network<'a>(
        &'a self,
        config: &'a ProvisioningConfig,
        instance_id: &'a str,
    ) -> RemoteFuture<'a, NetworkInfo> {
        Box::pin(self.provision_network(config, instance_id))
    }

    fn upload_key_pair<'a>(
        &'a self,
        handle: &'a InstanceHandle,
        target: &'a SshTarget,
        key_pair: &'a KeyPairRecord,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            debug!(instance_id = %handle.instance_id, host = %target.host, "pushing public key");
            self.push_public_key(target, key_pair)
        })
    }
}

/// Builds a driver for `machine_name` backed by the UCloud API, applying
/// the configured polling policy.
///
/// # Errors
///
/// Returns [`ConfigError`] when the configuration fails validation.
pub fn ucloud_driver(
    machine_name: &str,
    config: &UCloudConfig,
    ssh_key_path: Utf8PathBuf,
) -> Result<Driver<UCloudClient>, ConfigError> {
    let provisioning = config.as_provisioning(machine_name, ssh_key_path)?;
    let client = UCloudClient::new(provisioning.credentials.clone());
    Ok(Driver::new(machine_name, provisioning, client).with_wait_policy(config.wait_policy()))
}

/// Reopens a machine from state saved by an earlier invocation.
///
/// # Errors
///
/// Returns [`ConfigError`] when the configuration fails validation.
pub fn restore_ucloud_driver(
    state: DriverState,
    config: &UCloudConfig,
) -> Result<Driver<UCloudClient>, ConfigError> {
    let provisioning = config.as_provisioning(&state.machine_name, state.ssh_key_path.clone())?;
    let client = UCloudClient::new(provisioning.credentials.clone());
    Ok(Driver::restore(state, provisioning, client).with_wait_policy(config.wait_policy()))
}

#[cfg(test)]
mod tests;
