//! Security group and elastic IP setup for a new instance.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::command::CommandRunner;
use crate::config::ProvisioningConfig;
use crate::remote::{NetworkInfo, RemoteError};

use super::UCloudClient;
use super::api::{
    AllocateEipResponse, DescribeSecurityGroupResponse, Empty, PRIVATE_IP_TYPE, Params,
};

/// Firewall rules in UCloud's `proto|port|source|action|priority` form.
const SSH_PORT_RULE: &str = "TCP|22|0.0.0.0/0|ACCEPT|50";
const DOCKER_PORT_RULE: &str = "TCP|2376|0.0.0.0/0|ACCEPT|50";
const EIP_BANDWIDTH_MBPS: u32 = 2;
const CHARGE_TYPE: &str = "Dynamic";
const UHOST_RESOURCE: &str = "uhost";

impl<R: CommandRunner> UCloudClient<R> {
    /// Creates a security group that opens SSH and Docker, attaches it to the
    /// instance, and binds a fresh elastic IP unless the machine is private.
    pub(super) async fn provision_network(
        &self,
        config: &ProvisioningConfig,
        instance_id: &str,
    ) -> Result<NetworkInfo, RemoteError> {
        let region = config.region.as_str();
        let security_group_id = self
            .create_security_group(region, &security_group_name(config))
            .await?;

        info!(%instance_id, security_group_id, "granting security group");
        self.call::<Empty>(
            Params::new("GrantSecurityGroup")
                .set("Region", region)
                .set("GroupId", security_group_id)
                .set("ResourceType", UHOST_RESOURCE)
                .set("ResourceId", instance_id),
        )
        .await?;

        let instance = self.fetch_instance(region, instance_id).await?;
        let private_ip = instance
            .address(PRIVATE_IP_TYPE)
            .ok_or_else(|| RemoteError::NotFound {
                resource: format!("private IP of instance {instance_id}"),
            })?;

        let public_ip = if config.private_ip_only {
            debug!(%instance_id, "private address only; skipping elastic IP");
            None
        } else {
            Some(self.bind_elastic_ip(config, instance_id).await?)
        };

        Ok(NetworkInfo {
            private_ip,
            public_ip,
            security_group_id,
        })
    }

    /// Creates the group and returns its id.
    ///
    /// `CreateSecurityGroup` does not echo the new id, so the ids carrying
    /// `name` are listed before and after; exactly one must be new.
    async fn create_security_group(&self, region: &str, name: &str) -> Result<u64, RemoteError> {
        let existing = self.security_group_ids(region, name).await?;

        info!(group = name, "creating security group");
        self.call::<Empty>(
            Params::new("CreateSecurityGroup")
                .set("Region", region)
                .set("GroupName", name)
                .set("Description", "docker machine security group")
                .set("Rule.0", SSH_PORT_RULE)
                .set("Rule.1", DOCKER_PORT_RULE),
        )
        .await?;

        let current = self.security_group_ids(region, name).await?;
        let mut created = current.difference(&existing).copied();
        match (created.next(), created.next()) {
            (Some(id), None) => Ok(id),
            (None, _) => Err(RemoteError::NotFound {
                resource: format!("security group {name}"),
            }),
            (Some(_), Some(_)) => Err(RemoteError::Rejected {
                code: 0,
                message: format!("several security groups named {name} appeared at once"),
            }),
        }
    }

    async fn security_group_ids(
        &self,
        region: &str,
        name: &str,
    ) -> Result<BTreeSet<u64>, RemoteError> {
        let groups: DescribeSecurityGroupResponse = self
            .call(Params::new("DescribeSecurityGroup").set("Region", region))
            .await?;
        Ok(groups
            .data_set
            .into_iter()
            .filter(|group| group.group_name == name)
            .map(|group| group.group_id)
            .collect())
    }

    async fn bind_elastic_ip(
        &self,
        config: &ProvisioningConfig,
        instance_id: &str,
    ) -> Result<String, RemoteError> {
        let region = config.region.as_str();
        info!(%instance_id, "allocating elastic IP");
        let allocated: AllocateEipResponse = self
            .call(
                Params::new("AllocateEIP")
                    .set("Region", region)
                    .set("OperatorName", config.region.eip_operator())
                    .set("Bandwidth", EIP_BANDWIDTH_MBPS)
                    .set("ChargeType", CHARGE_TYPE)
                    .set("Quantity", 1),
            )
            .await?;
        let (eip_id, ip) = allocated
            .eip_set
            .into_iter()
            .find_map(|eip| {
                let ip = eip.addresses.into_iter().next()?.ip;
                Some((eip.eip_id, ip))
            })
            .ok_or_else(|| RemoteError::NotFound {
                resource: String::from("allocated elastic IP"),
            })?;

        info!(%instance_id, %eip_id, %ip, "binding elastic IP");
        self.call::<Empty>(
            Params::new("BindEIP")
                .set("Region", region)
                .set("EIPId", &eip_id)
                .set("ResourceType", UHOST_RESOURCE)
                .set("ResourceId", instance_id),
        )
        .await?;
        Ok(ip)
    }
}

/// Group name for one machine: the configured prefix plus the instance name,
/// so machines provisioned side by side never share a name.
pub(super) fn security_group_name(config: &ProvisioningConfig) -> String {
    format!("{}-{}", config.security_group_name, config.instance_name)
}
