//! Command-line interface definitions for the `ucloud-machine` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `ucloud-machine` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ucloud-machine",
    about = "Provision and manage Docker hosts on UCloud UHost instances",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create a UHost instance and install an SSH key on it.
    #[command(name = "create", about = "Create a UHost instance for a machine")]
    Create(MachineArgs),
    /// Print the current instance status.
    #[command(name = "status", about = "Print the instance status")]
    Status(MachineArgs),
    /// Power on a stopped instance.
    #[command(name = "start", about = "Start the instance")]
    Start(MachineArgs),
    /// Shut the instance down gracefully.
    #[command(name = "stop", about = "Stop the instance")]
    Stop(MachineArgs),
    /// Reboot the instance.
    #[command(name = "restart", about = "Reboot the instance")]
    Restart(MachineArgs),
    /// Cut power to the instance.
    #[command(name = "kill", about = "Power off the instance immediately")]
    Kill(MachineArgs),
    /// Terminate the instance and delete local state.
    #[command(name = "remove", about = "Terminate the instance and forget the machine")]
    Remove(MachineArgs),
    /// Print the address used for SSH and Docker.
    #[command(name = "ip", about = "Print the machine's IP address")]
    Ip(MachineArgs),
    /// Print the Docker endpoint.
    #[command(name = "url", about = "Print the Docker URL")]
    Url(MachineArgs),
}

/// Arguments shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct MachineArgs {
    /// Name of the machine.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}
