//! User preferences persistence.
//!
//! Remembers the last echo server and collection server in
//! ~/.config/linkprobe/config.toml so they can be omitted next time.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// User preferences
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prefs {
    /// Last echo server used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Last collection server used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_server: Option<String>,
}

impl Prefs {
    /// Get config file path: ~/.config/linkprobe/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("linkprobe").join("config.toml"))
    }

    /// Load preferences from disk (returns default if missing/invalid)
    pub fn load() -> Self {
        Self::path()
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save preferences to disk
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = Self::path() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(self)?)?;
        }
        Ok(())
    }

    /// Remember the servers of a session that just ran.
    /// Returns true if anything changed.
    pub fn remember(&mut self, server: Option<&str>, upload_server: Option<&str>) -> bool {
        let before = self.clone();
        if let Some(server) = server {
            self.server = Some(server.to_string());
        }
        if let Some(upload) = upload_server {
            self.upload_server = Some(upload.to_string());
        }
        *self != before
    }
}
