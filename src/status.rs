//! Canonical instance status and the mapping from UHost state strings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an instance after translating the provider's state.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum InstanceStatus {
    /// The provider reported a state this crate does not recognise.
    #[default]
    Unknown,
    /// The instance is initialising, booting, or rebooting.
    Starting,
    /// The instance is up.
    Running,
    /// The instance is powered off.
    Stopped,
    /// The instance is shutting down.
    Stopping,
    /// The provider reported an installation failure.
    Error,
}

impl InstanceStatus {
    /// Returns a stable lower-case label for logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a raw UHost `State` value to its canonical status.
///
/// Unrecognised values map to [`InstanceStatus::Unknown`] rather than an
/// error so new provider states never break status queries.
#[must_use]
pub fn map_status(raw: &str) -> InstanceStatus {
    match raw {
        "Initializing" | "Starting" | "Rebooting" => InstanceStatus::Starting,
        "Running" => InstanceStatus::Running,
        "Stopped" => InstanceStatus::Stopped,
        "Stopping" => InstanceStatus::Stopping,
        "Install Fail" => InstanceStatus::Error,
        _ => InstanceStatus::Unknown,
    }
}
