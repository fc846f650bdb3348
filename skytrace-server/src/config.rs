//! Data directory layout.
//!
//! Everything lives under the platform data dir:
//!
//! ```text
//! <data>/logs/                    local recordings
//! <data>/mqtt/remote_players/     one recording per remote peer
//! <data>/mqtt/reference.txt       reference-clock handshake file
//! ```

use directories::ProjectDirs;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ServerError;

/// Get the project directories for this platform.
pub fn get_project_dirs() -> Result<ProjectDirs, ServerError> {
    ProjectDirs::from("org", "skytrace", "skytrace").ok_or(ServerError::NoDataDir)
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, ServerError> {
    if !path.exists() {
        fs::create_dir_all(&path)?;
        debug!("Created directory: {}", path.display());
    }
    Ok(path)
}

/// Directory for local session recordings. An explicit override wins over
/// the platform default. Creation failure is fatal to the recording.
pub fn logs_dir(override_dir: Option<&Path>) -> Result<PathBuf, ServerError> {
    match override_dir {
        Some(dir) => ensure_dir(dir.to_path_buf()),
        None => {
            let mut path = get_project_dirs()?.data_dir().to_owned();
            path.push("logs");
            ensure_dir(path)
        }
    }
}

/// Directory holding one recording per remote peer.
pub fn remote_players_dir() -> Result<PathBuf, ServerError> {
    let mut path = get_project_dirs()?.data_dir().to_owned();
    path.push("mqtt");
    path.push("remote_players");
    ensure_dir(path)
}

/// Path of the reference-clock handshake file.
pub fn reference_file() -> Result<PathBuf, ServerError> {
    let mut path = get_project_dirs()?.data_dir().to_owned();
    path.push("mqtt");
    ensure_dir(path.clone())?;
    path.push("reference.txt");
    Ok(path)
}
