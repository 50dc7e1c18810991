//! On-disk machine state so separate invocations can address the same
//! instance.
//!
//! Each machine gets a directory under `<root>/machines/<name>/` holding
//! `state.json` and the generated SSH key pair.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::driver::DriverState;

const MACHINES_DIR: &str = "machines";
const STATE_FILE: &str = "state.json";
const KEY_FILE: &str = "id_rsa";

/// Errors raised while reading or writing machine state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No state has been saved for the machine.
    #[error("machine {machine} does not exist")]
    NotFound {
        /// Machine name.
        machine: String,
    },
    /// The name cannot be used as a directory name.
    #[error("invalid machine name '{name}': use letters, digits, '-', '_' or '.'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when saved state cannot be parsed or rendered.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Directory-backed store of [`DriverState`] records.
#[derive(Clone, Debug)]
pub struct MachineStore {
    root: Utf8PathBuf,
}

impl MachineStore {
    /// Creates a store rooted at `root`. Nothing is created until the first
    /// save.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the directory holding one machine's files.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] for names that are empty, start
    /// with a dot, or contain path separators.
    pub fn machine_dir(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(MACHINES_DIR).join(name))
    }

    /// Returns where the machine's private key is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidName`] for unusable names.
    pub fn key_path(&self, name: &str) -> Result<Utf8PathBuf, StoreError> {
        Ok(self.machine_dir(name)?.join(KEY_FILE))
    }

    /// Reports whether state has been saved for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the name is invalid or the directory
    /// cannot be inspected.
    pub fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let dir_path = self.machine_dir(name)?;
        match Dir::open_ambient_dir(&dir_path, ambient_authority()) {
            Ok(dir) => dir.try_exists(STATE_FILE).map_err(|err| StoreError::Io {
                path: dir_path.join(STATE_FILE),
                message: err.to_string(),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&dir_path, &err)),
        }
    }

    /// Writes `state`, creating the machine directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the directory or file cannot be written.
    pub fn save(&self, state: &DriverState) -> Result<Utf8PathBuf, StoreError> {
        let dir_path = self.machine_dir(&state.machine_name)?;
        Dir::create_ambient_dir_all(&dir_path, ambient_authority())
            .map_err(|err| io_error(&dir_path, &err))?;
        let dir = open_dir(&dir_path)?;

        let path = dir_path.join(STATE_FILE);
        let rendered = serde_json::to_string_pretty(state).map_err(|err| StoreError::Parse {
            path: path.clone(),
            message: err.to_string(),
        })?;
        dir.write(STATE_FILE, rendered)
            .map_err(|err| io_error(&path, &err))?;
        Ok(path)
    }

    /// Reads the saved state for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing was saved, or another
    /// [`StoreError`] when the file cannot be read or parsed.
    pub fn load(&self, name: &str) -> Result<DriverState, StoreError> {
        if !self.exists(name)? {
            return Err(StoreError::NotFound {
                machine: name.to_owned(),
            });
        }
        let dir_path = self.machine_dir(name)?;
        let path = dir_path.join(STATE_FILE);
        let contents = open_dir(&dir_path)?
            .read_to_string(STATE_FILE)
            .map_err(|err| io_error(&path, &err))?;
        serde_json::from_str(&contents).map_err(|err| StoreError::Parse {
            path,
            message: err.to_string(),
        })
    }

    /// Deletes the machine directory, including its key pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing was saved, or
    /// [`StoreError::Io`] when the directory cannot be removed.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        if !self.exists(name)? {
            return Err(StoreError::NotFound {
                machine: name.to_owned(),
            });
        }
        let machines = self.root.join(MACHINES_DIR);
        open_dir(&machines)?
            .remove_dir_all(name)
            .map_err(|err| io_error(&machines.join(name), &err))
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let usable = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if usable {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            name: name.to_owned(),
        })
    }
}

fn open_dir(path: &Utf8Path) -> Result<Dir, StoreError> {
    Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
