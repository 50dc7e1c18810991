//! Configuration loading via `ortho-config` and the validated provisioning
//! model consumed by the driver.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::wait::WaitPolicy;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "cn-north-03";
/// CentOS 7.0 base image.
pub const DEFAULT_IMAGE_ID: &str = "uimage-5yt2b0";
/// Login user used when none is configured.
pub const DEFAULT_SSH_USER: &str = "root";
/// SSH port exposed by UHost images.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Security group name prefix for new machines.
pub const DEFAULT_SECURITY_GROUP: &str = "docker-machine";
/// Default CPU count.
pub const DEFAULT_CPU: u32 = 1;
/// Default memory in megabytes.
pub const DEFAULT_MEMORY_MB: u32 = 1024;
/// Default data disk size in megabytes.
pub const DEFAULT_DISK_SPACE_MB: u32 = 20_000;
/// Instance name used when the builder is not given one.
pub const DEFAULT_INSTANCE_NAME: &str = "ucloud-machine";

/// UCloud settings merged from defaults, `ucloud-machine.toml`, and
/// `UCLOUD_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "UCLOUD",
    discovery(
        app_name = "ucloud-machine",
        env_var = "UCLOUD_MACHINE_CONFIG_PATH",
        config_file_name = "ucloud-machine.toml",
        dotfile_name = ".ucloud-machine.toml",
        project_file_name = "ucloud-machine.toml"
    )
)]
pub struct UCloudConfig {
    /// API public key.
    #[ortho_config(default = String::new())]
    pub public_key: String,
    /// API private key used to sign requests.
    #[ortho_config(default = String::new())]
    pub private_key: String,
    /// Region hosting the instance, for example `cn-north-03`.
    #[ortho_config(default = DEFAULT_REGION.to_owned())]
    pub region: String,
    /// UHost image identifier.
    #[ortho_config(default = DEFAULT_IMAGE_ID.to_owned())]
    pub image_id: String,
    /// Password set for the login user. Required by `create`.
    #[ortho_config(default = String::new())]
    pub user_password: String,
    /// Login user for SSH.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// SSH port.
    #[ortho_config(default = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,
    /// Skip the elastic IP and reach the instance on its private address.
    #[ortho_config(default = false)]
    pub private_address_only: bool,
    /// Prefix of the per-machine security group, which is named
    /// `<prefix>-<machine>`.
    #[ortho_config(default = DEFAULT_SECURITY_GROUP.to_owned())]
    pub security_group: String,
    /// CPU count.
    #[ortho_config(default = DEFAULT_CPU)]
    pub cpu: u32,
    /// Memory in megabytes.
    #[ortho_config(default = DEFAULT_MEMORY_MB)]
    pub memory: u32,
    /// Data disk size in megabytes.
    #[ortho_config(default = DEFAULT_DISK_SPACE_MB)]
    pub disk_space: u32,
    /// Public key to install instead of generating a fresh key pair.
    pub key_pair_material: Option<String>,
    /// Directory holding machine state and generated keys.
    #[ortho_config(default = ".ucloud-machine".to_owned())]
    pub storage_path: String,
    /// Number of status polls while waiting for the instance to run.
    #[ortho_config(default = 10)]
    pub wait_attempts: u32,
    /// Seconds between status polls.
    #[ortho_config(default = 1)]
    pub wait_interval_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl UCloudConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to ucloud-machine.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("ucloud-machine")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the fields every command needs: API credentials, a known region,
    /// and a usable polling policy. The user password is only required by
    /// `create` and is checked there.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.public_key,
            &FieldMetadata::new("UCloud public key", "UCLOUD_PUBLIC_KEY", "public_key"),
        )?;
        Self::require_field(
            &self.private_key,
            &FieldMetadata::new("UCloud private key", "UCLOUD_PRIVATE_KEY", "private_key"),
        )?;
        Region::from_str(self.region.trim())?;
        if self.wait_attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "wait_attempts must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Returns the status polling policy.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            self.wait_attempts,
            Duration::from_secs(self.wait_interval_secs),
        )
    }

    /// Builds the provisioning model for `machine_name`, whose key pair
    /// lives at `ssh_key_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_provisioning(
        &self,
        machine_name: &str,
        ssh_key_path: Utf8PathBuf,
    ) -> Result<ProvisioningConfig, ConfigError> {
        self.validate()?;
        ProvisioningConfig::builder()
            .instance_name(machine_name)
            .public_key(&self.public_key)
            .private_key(&self.private_key)
            .region(&self.region)
            .image_id(&self.image_id)
            .password(&self.user_password)
            .cpu(self.cpu)
            .memory_mb(self.memory)
            .disk_space_mb(self.disk_space)
            .ssh_user(&self.ssh_user)
            .ssh_port(self.ssh_port)
            .private_ip_only(self.private_address_only)
            .security_group_name(&self.security_group)
            .key_pair_material(self.key_pair_material.clone())
            .ssh_key_path(ssh_key_path)
            .build()
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Raised when the region is not one UCloud serves UHost from.
    #[error("unknown region '{0}'")]
    UnknownRegion(String),
    /// Raised when a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

/// Regions accepted for UHost provisioning.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Region {
    /// `cn-north-01`
    CnNorth01,
    /// `cn-north-02`
    CnNorth02,
    /// `cn-north-03`
    CnNorth03,
    /// `cn-north-04`
    CnNorth04,
    /// `cn-east-01`
    CnEast01,
    /// `cn-south-01`
    CnSouth01,
    /// `hk-01`
    HongKong01,
    /// `us-west-01`
    UsWest01,
}

impl Region {
    /// Every known region, in display order.
    pub const ALL: [Self; 8] = [
        Self::CnNorth01,
        Self::CnNorth02,
        Self::CnNorth03,
        Self::CnNorth04,
        Self::CnEast01,
        Self::CnSouth01,
        Self::HongKong01,
        Self::UsWest01,
    ];

    /// Returns the identifier used by the UCloud API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CnNorth01 => "cn-north-01",
            Self::CnNorth02 => "cn-north-02",
            Self::CnNorth03 => "cn-north-03",
            Self::CnNorth04 => "cn-north-04",
            Self::CnEast01 => "cn-east-01",
            Self::CnSouth01 => "cn-south-01",
            Self::HongKong01 => "hk-01",
            Self::UsWest01 => "us-west-01",
        }
    }

    /// Returns the EIP line available in the region. Mainland regions use
    /// BGP; overseas regions only sell international bandwidth.
    #[must_use]
    pub const fn eip_operator(self) -> &'static str {
        match self {
            Self::HongKong01 | Self::UsWest01 => "International",
            _ => "Bgp",
        }
    }
}

impl FromStr for Region {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|region| region.as_str() == value)
            .ok_or_else(|| ConfigError::UnknownRegion(value.to_owned()))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String wrapper that keeps credentials out of `Debug` output.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the wrapped value.
    #[must_use]
    pub const fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// Returns `true` when the value is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(**redacted**)")
    }
}

/// UCloud API key pair.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Credentials {
    /// Public half, sent with every request.
    pub public_key: String,
    /// Private half, used only to sign requests.
    pub private_key: Secret,
}

impl Credentials {
    /// Builds credentials from raw strings.
    #[must_use]
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: Secret::new(private_key),
        }
    }
}

/// Inputs for every remote call made on behalf of one machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Name given to the UHost instance.
    pub instance_name: String,
    /// Target region.
    pub region: Region,
    /// UHost image identifier.
    pub image_id: String,
    /// Password for the login user.
    pub password: Secret,
    /// CPU count.
    pub cpu: u32,
    /// Memory in megabytes.
    pub memory_mb: u32,
    /// Data disk size in megabytes.
    pub disk_space_mb: u32,
    /// Login user for SSH.
    pub ssh_user: String,
    /// SSH port.
    pub ssh_port: u16,
    /// Reach the instance on its private address only.
    pub private_ip_only: bool,
    /// Prefix of the security group created for the machine; the instance
    /// name is appended.
    pub security_group_name: String,
    /// Public key to install instead of generating one.
    pub key_pair_material: Option<String>,
    /// Location of the machine's private key.
    pub ssh_key_path: Utf8PathBuf,
}

impl ProvisioningConfig {
    /// Starts a builder populated with the UCloud defaults.
    #[must_use]
    pub fn builder() -> ProvisioningConfigBuilder {
        ProvisioningConfigBuilder::new()
    }

    /// Checks the inputs `create` needs before any remote call is made.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the password or either API
    /// key is blank, and [`ConfigError::Invalid`] for zero sizing values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password.is_blank() {
            return Err(ConfigError::MissingField(String::from(
                "ucloud driver requires a user password (UCLOUD_USER_PASSWORD)",
            )));
        }
        if self.credentials.public_key.trim().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "ucloud driver requires a public key (UCLOUD_PUBLIC_KEY)",
            )));
        }
        if self.credentials.private_key.is_blank() {
            return Err(ConfigError::MissingField(String::from(
                "ucloud driver requires a private key (UCLOUD_PRIVATE_KEY)",
            )));
        }
        if self.cpu == 0 || self.memory_mb == 0 || self.disk_space_mb == 0 {
            return Err(ConfigError::Invalid(String::from(
                "cpu, memory, and disk space must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// Builder for [`ProvisioningConfig`] that trims input and resolves the
/// region on construction.
#[derive(Clone, Debug)]
pub struct ProvisioningConfigBuilder {
    public_key: String,
    private_key: String,
    instance_name: String,
    region: String,
    image_id: String,
    password: String,
    cpu: u32,
    memory_mb: u32,
    disk_space_mb: u32,
    ssh_user: String,
    ssh_port: u16,
    private_ip_only: bool,
    security_group_name: String,
    key_pair_material: Option<String>,
    ssh_key_path: Utf8PathBuf,
}

impl Default for ProvisioningConfigBuilder {
    fn default() -> Self {
        Self {
            public_key: String::new(),
            private_key: String::new(),
            instance_name: DEFAULT_INSTANCE_NAME.to_owned(),
            region: DEFAULT_REGION.to_owned(),
            image_id: DEFAULT_IMAGE_ID.to_owned(),
            password: String::new(),
            cpu: DEFAULT_CPU,
            memory_mb: DEFAULT_MEMORY_MB,
            disk_space_mb: DEFAULT_DISK_SPACE_MB,
            ssh_user: DEFAULT_SSH_USER.to_owned(),
            ssh_port: DEFAULT_SSH_PORT,
            private_ip_only: false,
            security_group_name: DEFAULT_SECURITY_GROUP.to_owned(),
            key_pair_material: None,
            ssh_key_path: Utf8PathBuf::from("id_rsa"),
        }
    }
}

impl ProvisioningConfigBuilder {
    /// Creates a builder holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API public key.
    #[must_use]
    pub fn public_key(mut self, value: impl Into<String>) -> Self {
        self.public_key = value.into();
        self
    }

    /// Sets the API private key.
    #[must_use]
    pub fn private_key(mut self, value: impl Into<String>) -> Self {
        self.private_key = value.into();
        self
    }

    /// Sets the name given to the instance.
    #[must_use]
    pub fn instance_name(mut self, value: impl Into<String>) -> Self {
        self.instance_name = value.into();
        self
    }

    /// Sets the region identifier.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the image identifier.
    #[must_use]
    pub fn image_id(mut self, value: impl Into<String>) -> Self {
        self.image_id = value.into();
        self
    }

    /// Sets the login password.
    #[must_use]
    pub fn password(mut self, value: impl Into<String>) -> Self {
        self.password = value.into();
        self
    }

    /// Sets the CPU count.
    #[must_use]
    pub const fn cpu(mut self, value: u32) -> Self {
        self.cpu = value;
        self
    }

    /// Sets the memory size in megabytes.
    #[must_use]
    pub const fn memory_mb(mut self, value: u32) -> Self {
        self.memory_mb = value;
        self
    }

    /// Sets the disk size in megabytes.
    #[must_use]
    pub const fn disk_space_mb(mut self, value: u32) -> Self {
        self.disk_space_mb = value;
        self
    }

    /// Sets the SSH login user.
    #[must_use]
    pub fn ssh_user(mut self, value: impl Into<String>) -> Self {
        self.ssh_user = value.into();
        self
    }

    /// Sets the SSH port.
    #[must_use]
    pub const fn ssh_port(mut self, value: u16) -> Self {
        self.ssh_port = value;
        self
    }

    /// Restricts networking to the private address.
    #[must_use]
    pub const fn private_ip_only(mut self, value: bool) -> Self {
        self.private_ip_only = value;
        self
    }

    /// Sets the security group name.
    #[must_use]
    pub fn security_group_name(mut self, value: impl Into<String>) -> Self {
        self.security_group_name = value.into();
        self
    }

    /// Supplies public key material to install instead of generating a key.
    #[must_use]
    pub fn key_pair_material(mut self, value: Option<String>) -> Self {
        self.key_pair_material = value;
        self
    }

    /// Sets where the machine's private key lives.
    #[must_use]
    pub fn ssh_key_path(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.ssh_key_path = value.into();
        self
    }

    /// Builds the [`ProvisioningConfig`].
    ///
    /// Blank image ids, SSH users, and security group names fall back to the
    /// defaults; the SSH user is lower-cased. Credentials and password are
    /// not required here so that `create` can report them without side
    /// effects.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownRegion`] when the region is not known.
    pub fn build(self) -> Result<ProvisioningConfig, ConfigError> {
        let region = Region::from_str(self.region.trim())?;
        Ok(ProvisioningConfig {
            credentials: Credentials::new(self.public_key.trim(), self.private_key.trim()),
            instance_name: or_default(&self.instance_name, DEFAULT_INSTANCE_NAME),
            region,
            image_id: or_default(&self.image_id, DEFAULT_IMAGE_ID),
            password: Secret::new(self.password),
            cpu: self.cpu,
            memory_mb: self.memory_mb,
            disk_space_mb: self.disk_space_mb,
            ssh_user: or_default(&self.ssh_user, DEFAULT_SSH_USER).to_lowercase(),
            ssh_port: self.ssh_port,
            private_ip_only: self.private_ip_only,
            security_group_name: or_default(&self.security_group_name, DEFAULT_SECURITY_GROUP),
            key_pair_material: self
                .key_pair_material
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
            ssh_key_path: self.ssh_key_path,
        })
    }
}

fn or_default(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_owned()
    } else {
        trimmed.to_owned()
    }
}
