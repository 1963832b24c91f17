//! XDG directory helpers for config/data locations.

use std::path::PathBuf;

/// Base directory for persistent data (clones, index, registry).
///
/// Uses `CHATLOG_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/chatlog-rs` or
/// `~/.local/share/chatlog-rs`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CHATLOG_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("chatlog-rs")
}

/// Base directory for configuration files.
///
/// Uses `CHATLOG_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/chatlog-rs`
/// or `~/.config/chatlog-rs`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CHATLOG_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("chatlog-rs")
}

/// The registered-repositories file.
pub fn registry_path() -> PathBuf {
    config_dir().join("repos.txt")
}

/// The local message index database.
pub fn index_path() -> PathBuf {
    data_dir().join("index").join("messages.sqlite")
}

/// Default working clone for the main repository.
pub fn store_dir() -> PathBuf {
    data_dir().join("store")
}
