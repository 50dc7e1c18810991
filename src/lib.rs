//! Core library for the `ucloud-machine` provisioning driver.
//!
//! A [`Driver`] provisions one UCloud UHost instance for a Docker host:
//! it creates a key pair and the instance, polls until the instance runs,
//! opens SSH and Docker through a security group and elastic IP, and
//! installs the public key. The same driver then queries and changes the
//! instance's power state. Provider access goes through the
//! [`RemoteInstanceClient`] trait, implemented for the UCloud API by
//! [`UCloudClient`].

pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod remote;
pub mod status;
pub mod store;
pub mod test_support;
pub mod ucloud;
pub mod wait;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, Credentials, ProvisioningConfig, Region, Secret, UCloudConfig};
pub use driver::{DOCKER_PORT, DRIVER_NAME, Driver, DriverState, Rollback};
pub use error::DriverError;
pub use remote::{
    InstanceAction, InstanceDescription, InstanceHandle, KeyPairRecord, NetworkInfo, RemoteError,
    RemoteFuture, RemoteInstanceClient, SshTarget,
};
pub use status::{InstanceStatus, map_status};
pub use store::{MachineStore, StoreError};
pub use ucloud::{UCLOUD_API_BASE, UCloudClient, restore_ucloud_driver, ucloud_driver};
pub use wait::{WaitError, WaitPolicy, wait_for};
