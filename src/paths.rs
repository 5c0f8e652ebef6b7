//! XDG base directory resolution.
//!
//! An external collaborator per the spec: nothing in the core subsystems
//! depends on these defaults, they only pick file locations when the CLI
//! doesn't override them.

use std::env;
use std::path::PathBuf;

const APP: &str = "siftd";

fn home_dir() -> PathBuf {
    env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

pub fn data_home() -> PathBuf {
    env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local/share"))
        .join(APP)
}

pub fn config_home() -> PathBuf {
    env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".config"))
        .join(APP)
}

pub fn state_home() -> PathBuf {
    env::var_os("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".local/state"))
        .join(APP)
}

pub fn default_db_path() -> PathBuf {
    data_home().join(format!("{APP}.db"))
}

pub fn default_embeddings_db_path() -> PathBuf {
    data_home().join("embeddings.db")
}

pub fn default_config_path() -> PathBuf {
    config_home().join("config.toml")
}

pub fn adapters_dir() -> PathBuf {
    config_home().join("adapters")
}

pub fn formatters_dir() -> PathBuf {
    config_home().join("formatters")
}

pub fn queries_dir() -> PathBuf {
    config_home().join("queries")
}

/// Per-workspace live-session pointer file: `<state>/sessions/<sha256(path)[:12]>/session-id`.
pub fn session_id_path(workspace_path: &str) -> PathBuf {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(workspace_path.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    state_home().join("sessions").join(&digest[..12]).join("session-id")
}
