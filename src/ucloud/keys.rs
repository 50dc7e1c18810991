//! Local SSH key pair generation and installation on the instance.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use shell_escape::unix::escape;
use tracing::{debug, info};

use crate::command::{CommandError, CommandOutput, CommandRunner};
use crate::config::ProvisioningConfig;
use crate::remote::{KeyPairRecord, RemoteError, SshTarget};

use super::UCloudClient;

const KEYGEN_BIN: &str = "ssh-keygen";
const SSHPASS_BIN: &str = "sshpass";
const KEY_BITS: &str = "2048";

impl<R: CommandRunner> UCloudClient<R> {
    /// Returns the key pair for a machine, generating it with `ssh-keygen`
    /// unless public key material was configured or a key already exists at
    /// the configured path.
    pub(super) fn prepare_key_pair(
        &self,
        config: &ProvisioningConfig,
    ) -> Result<KeyPairRecord, RemoteError> {
        let private_key_ref = config.ssh_key_path.clone();
        if let Some(material) = &config.key_pair_material {
            debug!("using configured public key material");
            return Ok(KeyPairRecord {
                public_key_material: material.clone(),
                private_key_ref,
            });
        }

        let public_path = Utf8PathBuf::from(format!("{private_key_ref}.pub"));
        if let Some(existing) = read_public_key(&public_path)? {
            info!(path = %public_path, "reusing existing key pair");
            return Ok(KeyPairRecord {
                public_key_material: existing,
                private_key_ref,
            });
        }

        ensure_parent(&private_key_ref)?;
        let args = keygen_args(&private_key_ref);
        let output = self
            .runner
            .run(KEYGEN_BIN, &args, &[])
            .map_err(spawn_error)?;
        check_exit(KEYGEN_BIN, &output)?;

        let public_key_material =
            read_public_key(&public_path)?.ok_or_else(|| RemoteError::Command {
                program: KEYGEN_BIN.to_owned(),
                message: format!("{public_path} was not written"),
            })?;
        info!(path = %private_key_ref, "generated key pair");
        Ok(KeyPairRecord {
            public_key_material,
            private_key_ref,
        })
    }

    /// Appends the public key to `~/.ssh/authorized_keys` on the target,
    /// logging in with the instance password through `sshpass`.
    pub(super) fn push_public_key(
        &self,
        target: &SshTarget,
        key_pair: &KeyPairRecord,
    ) -> Result<(), RemoteError> {
        let args = upload_args(target, &key_pair.public_key_material);
        let output = self
            .runner
            .run(SSHPASS_BIN, &args, &[("SSHPASS", target.password.expose())])
            .map_err(spawn_error)?;
        check_exit("ssh", &output)
    }
}

fn keygen_args(private_key: &Utf8Path) -> Vec<OsString> {
    ["-t", "rsa", "-b", KEY_BITS, "-N", "", "-q", "-f"]
        .into_iter()
        .map(OsString::from)
        .chain([OsString::from(private_key.as_str())])
        .collect()
}

pub(super) fn upload_args(target: &SshTarget, public_key: &str) -> Vec<OsString> {
    let escaped_key = escape(public_key.trim().into());
    let remote_command = format!(
        "mkdir -p ~/.ssh && chmod 700 ~/.ssh && echo {escaped_key} >> ~/.ssh/authorized_keys \
         && chmod 600 ~/.ssh/authorized_keys"
    );
    let mut args = vec![
        OsString::from("-e"),
        OsString::from("ssh"),
        OsString::from("-p"),
        OsString::from(target.port.to_string()),
    ];
    for option in [
        "StrictHostKeyChecking=no",
        "UserKnownHostsFile=/dev/null",
        "PubkeyAuthentication=no",
    ] {
        args.push(OsString::from("-o"));
        args.push(OsString::from(option));
    }
    args.push(OsString::from(format!("{}@{}", target.user, target.host)));
    args.push(OsString::from(remote_command));
    args
}

fn check_exit(program: &str, output: &CommandOutput) -> Result<(), RemoteError> {
    if output.is_success() {
        Ok(())
    } else {
        Err(RemoteError::Command {
            program: program.to_owned(),
            message: output.failure_summary(),
        })
    }
}

fn spawn_error(err: CommandError) -> RemoteError {
    match err {
        CommandError::Spawn { program, message } => RemoteError::Command { program, message },
    }
}

fn key_file_error(path: &Utf8Path, err: &io::Error) -> RemoteError {
    RemoteError::Command {
        program: KEYGEN_BIN.to_owned(),
        message: format!("cannot access {path}: {err}"),
    }
}

fn split(path: &Utf8Path) -> Result<(&Utf8Path, &str), RemoteError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| RemoteError::Command {
        program: KEYGEN_BIN.to_owned(),
        message: format!("key path {path} is missing a file name"),
    })?;
    Ok((parent, file_name))
}

fn read_public_key(path: &Utf8Path) -> Result<Option<String>, RemoteError> {
    let (parent, file_name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(key_file_error(parent, &err)),
    };
    match dir.read_to_string(file_name) {
        Ok(contents) => {
            let material = contents.trim();
            Ok((!material.is_empty()).then(|| material.to_owned()))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(key_file_error(path, &err)),
    }
}

fn ensure_parent(path: &Utf8Path) -> Result<(), RemoteError> {
    let (parent, _) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())
        .map_err(|err| key_file_error(parent, &err))
}
