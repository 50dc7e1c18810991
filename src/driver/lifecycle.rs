//! Status and power operations on an already provisioned instance.

use tracing::{debug, info};

use crate::error::DriverError;
use crate::remote::{InstanceAction, RemoteInstanceClient};
use crate::status::InstanceStatus;

use super::Driver;

impl<C: RemoteInstanceClient> Driver<C> {
    /// Queries the provider and maps its raw state to [`InstanceStatus`].
    ///
    /// Makes exactly one remote call and never mutates the driver.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingInstance`] when no instance is recorded
    /// and [`DriverError::RemoteProvider`] when the describe call fails.
    pub async fn get_state(&self) -> Result<InstanceStatus, DriverError> {
        let (region, instance_id) = self.require_instance("get state")?;
        debug!(%instance_id, region, "describing UHost instance");
        let description = self
            .client
            .describe_instance(region, instance_id)
            .await
            .map_err(|source| DriverError::RemoteProvider {
                verb: "describe",
                instance_id: instance_id.to_owned(),
                source,
            })?;
        Ok(description.status())
    }

    /// Powers the instance on.
    ///
    /// # Errors
    ///
    /// See [`Driver::stop`].
    pub async fn start(&self) -> Result<(), DriverError> {
        self.perform(InstanceAction::Start).await
    }

    /// Shuts the instance down gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::MissingInstance`] without calling the provider
    /// when no instance is recorded, otherwise
    /// [`DriverError::RemoteProvider`] if the provider call fails.
    pub async fn stop(&self) -> Result<(), DriverError> {
        self.perform(InstanceAction::Stop).await
    }

    /// Reboots the instance.
    ///
    /// # Errors
    ///
    /// See [`Driver::stop`].
    pub async fn restart(&self) -> Result<(), DriverError> {
        self.perform(InstanceAction::Reboot).await
    }

    /// Cuts power to the instance.
    ///
    /// # Errors
    ///
    /// See [`Driver::stop`].
    pub async fn kill(&self) -> Result<(), DriverError> {
        self.perform(InstanceAction::Kill).await
    }

    /// Terminates the instance and forgets its id, address, and network.
    ///
    /// # Errors
    ///
    /// See [`Driver::stop`]. Local state is only cleared on success.
    pub async fn remove(&mut self) -> Result<(), DriverError> {
        self.perform(InstanceAction::Terminate).await?;
        self.handle.clear();
        self.ip_address = None;
        self.network = None;
        Ok(())
    }

    async fn perform(&self, action: InstanceAction) -> Result<(), DriverError> {
        let verb = action.verb();
        let (region, instance_id) = self.require_instance(verb)?;
        info!(%instance_id, region, verb, "applying instance action");
        self.client
            .instance_action(action, region, instance_id)
            .await
            .map_err(|source| DriverError::RemoteProvider {
                verb,
                instance_id: instance_id.to_owned(),
                source,
            })
    }
}
