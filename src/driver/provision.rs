//! The provisioning state machine behind [`Driver::create`].
//!
//! Steps run in a fixed order: validate, create key pair, create instance,
//! wait for `Running`, create networks, upload the key pair. The first
//! failure is returned with the step named. Earlier steps are not undone
//! unless [`Rollback::Terminate`] was requested.

use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use crate::error::DriverError;
use crate::remote::{InstanceAction, NetworkInfo, RemoteError, RemoteInstanceClient, SshTarget};
use crate::status::InstanceStatus;
use crate::wait::{WaitError, wait_for};

use super::Driver;

/// What to do with an instance when provisioning fails after it was created.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Rollback {
    /// Leave the instance in place for the caller to inspect or remove.
    #[default]
    Leave,
    /// Terminate the instance before returning the error.
    Terminate,
}

impl<C: RemoteInstanceClient> Driver<C> {
    /// Provisions the instance and records its id, network, and key pair.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Configuration`] before any remote call when the
    /// password or credentials are missing, and a step-specific variant for
    /// the first step that fails afterwards. With the default
    /// [`Rollback::Leave`] an instance created before the failure stays
    /// recorded so the caller can remove it.
    pub async fn create(&mut self) -> Result<(), DriverError> {
        info!(machine = %self.machine_name, "creating UHost instance");
        self.config.validate()?;
        if let Some(instance_id) = self.handle.instance_id() {
            return Err(DriverError::InstanceExists {
                machine: self.machine_name.clone(),
                instance_id: instance_id.to_owned(),
            });
        }

        info!("creating key pair for instance");
        let record = self
            .client
            .create_key_pair(&self.config)
            .await
            .map_err(DriverError::KeyPair)?;
        let key_pair = self.key_pair.insert(record);

        info!("creating UHost instance");
        let instance_id = self
            .client
            .create_instance(&self.config, key_pair)
            .await
            .map_err(DriverError::InstanceCreate)?;
        self.handle.assign(instance_id.as_str());
        info!(%instance_id, "UHost instance created");

        let outcome = self.converge(&instance_id).await;
        if let Err(err) = &outcome {
            self.roll_back(&instance_id, err).await;
        }
        outcome
    }

    async fn converge(&mut self, instance_id: &str) -> Result<(), DriverError> {
        self.wait_until_running(instance_id).await?;

        info!(%instance_id, "creating networks");
        let network = self
            .client
            .create_network(&self.config, instance_id)
            .await
            .map_err(|source| DriverError::Network {
                instance_id: instance_id.to_owned(),
                source,
            })?;
        self.record_network(network);

        info!(%instance_id, "uploading key pair");
        self.upload_key_pair(instance_id).await?;

        info!(%instance_id, ip = ?self.ip_address, "UHost instance ready");
        Ok(())
    }

    async fn wait_until_running(&self, instance_id: &str) -> Result<(), DriverError> {
        info!(%instance_id, "waiting for instance to run");
        let client = &self.client;
        let region = self.handle.region.as_str();

        let outcome = wait_for(self.wait_policy, &self.cancel, move |attempt| async move {
            let status = client
                .describe_instance(region, instance_id)
                .await?
                .status();
            debug!(attempt, %status, "polled UHost state");
            Ok::<_, RemoteError>(if status == InstanceStatus::Running {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(status)
            })
        })
        .await;

        outcome.map_err(|err| match err {
            WaitError::Exhausted { attempts, last } => DriverError::ProvisioningTimeout {
                instance_id: instance_id.to_owned(),
                attempts,
                last_status: last.unwrap_or_default(),
            },
            WaitError::Cancelled { attempts } => DriverError::ProvisioningCancelled {
                instance_id: instance_id.to_owned(),
                attempts,
            },
            WaitError::Check { source, .. } => DriverError::RemoteProvider {
                verb: "poll status of",
                instance_id: instance_id.to_owned(),
                source,
            },
        })
    }

    fn record_network(&mut self, network: NetworkInfo) {
        self.ip_address = network
            .reachable_address(self.config.private_ip_only)
            .map(str::to_owned);
        self.network = Some(network);
    }

    async fn upload_key_pair(&self, instance_id: &str) -> Result<(), DriverError> {
        let upload_error = |reason: &str, source: Option<RemoteError>| DriverError::KeyPairUpload {
            instance_id: instance_id.to_owned(),
            reason: reason.to_owned(),
            source,
        };

        let Some(key_pair) = self.key_pair.as_ref() else {
            return Err(upload_error("no key pair recorded", None));
        };
        let Ok(host) = self.get_ip() else {
            return Err(upload_error("no reachable address recorded", None));
        };

        let target = SshTarget {
            host,
            port: self.config.ssh_port,
            user: self.get_ssh_username().to_owned(),
            password: self.config.password.clone(),
        };
        self.client
            .upload_key_pair(&self.handle, &target, key_pair)
            .await
            .map_err(|source| upload_error(&source.to_string(), Some(source)))
    }

    async fn roll_back(&mut self, instance_id: &str, cause: &DriverError) {
        match self.rollback {
            Rollback::Leave => {
                warn!(%instance_id, error = %cause, "provisioning failed; instance left in place");
            }
            Rollback::Terminate => {
                warn!(%instance_id, error = %cause, "provisioning failed; terminating instance");
                let terminated = self
                    .client
                    .instance_action(
                        InstanceAction::Terminate,
                        self.handle.region.as_str(),
                        instance_id,
                    )
                    .await;
                match terminated {
                    Ok(()) => {
                        self.handle.clear();
                        self.network = None;
                        self.ip_address = None;
                    }
                    Err(err) => {
                        warn!(%instance_id, error = %err, "rollback terminate failed");
                    }
                }
            }
        }
    }
}
