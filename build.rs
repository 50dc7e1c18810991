//! Renders man pages into `$OUT_DIR/man`: `ucloud-machine.1` for the
//! command overview and `ucloud-machine-<verb>.1` for each subcommand.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const BIN_NAME: &str = "ucloud-machine";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let command = cli::Cli::command();
    for verb in command.get_subcommands() {
        let page = format!("{BIN_NAME}-{}", verb.get_name());
        render(&man_dir, &page, Man::new(verb.clone()).title(page.to_uppercase()))?;
    }
    render(&man_dir, BIN_NAME, Man::new(command))?;
    Ok(())
}

fn render(dir: &Path, page: &str, man: Man) -> io::Result<()> {
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;
    fs::write(dir.join(format!("{page}.1")), buffer)
}
