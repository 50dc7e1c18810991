//! Binary entry point for the `ucloud-machine` CLI.

mod cli;

use std::fmt::Display;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ucloud_machine::{
    ConfigError, Driver, DriverError, MachineStore, StoreError, UCloudClient, UCloudConfig,
    restore_ucloud_driver, ucloud_driver,
};

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("state error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Driver(#[from] DriverError),
    #[error("machine {0} already exists; remove it first")]
    AlreadyExists(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = UCloudConfig::load_without_cli_args()?;
    let store = MachineStore::new(config.storage_path.as_str());

    match cli {
        Cli::Create(args) => create(&store, &config, &args.name).await,
        Cli::Status(args) => {
            let status = open(&store, &config, &args.name)?.get_state().await?;
            print_line(status);
            Ok(())
        }
        Cli::Start(args) => Ok(open(&store, &config, &args.name)?.start().await?),
        Cli::Stop(args) => Ok(open(&store, &config, &args.name)?.stop().await?),
        Cli::Restart(args) => Ok(open(&store, &config, &args.name)?.restart().await?),
        Cli::Kill(args) => Ok(open(&store, &config, &args.name)?.kill().await?),
        Cli::Remove(args) => {
            open(&store, &config, &args.name)?.remove().await?;
            store.delete(&args.name)?;
            info!(machine = %args.name, "machine removed");
            Ok(())
        }
        Cli::Ip(args) => {
            print_line(open(&store, &config, &args.name)?.get_ip()?);
            Ok(())
        }
        Cli::Url(args) => {
            print_line(open(&store, &config, &args.name)?.get_url()?);
            Ok(())
        }
    }
}

async fn create(store: &MachineStore, config: &UCloudConfig, name: &str) -> Result<(), CliError> {
    if store.exists(name)? {
        return Err(CliError::AlreadyExists(name.to_owned()));
    }
    let mut driver = ucloud_driver(name, config, store.key_path(name)?)?;

    let cancel = driver.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    let outcome = driver.create().await;
    interrupt.abort();

    // Keep whatever was created so `remove` can clean it up later.
    if driver.instance_id().is_some() {
        store.save(&driver.state())?;
    }
    outcome?;

    info!(machine = name, "machine created");
    print_line(driver.get_url()?);
    Ok(())
}

fn open(
    store: &MachineStore,
    config: &UCloudConfig,
    name: &str,
) -> Result<Driver<UCloudClient>, CliError> {
    let state = store.load(name)?;
    Ok(restore_ucloud_driver(state, config)?)
}

fn print_line(value: impl Display) {
    writeln!(io::stdout(), "{value}").ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
