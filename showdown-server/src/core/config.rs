//! Server configuration, read from the environment.

use std::path::PathBuf;

use super::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8081;
const DEFAULT_STORAGE_ROOT: &str = ".data";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Required `Origin` for upgrades and admin mutations.
    pub origin: String,
    pub storage_root: PathBuf,
    pub admin_password: String,
    pub assets_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: raw.clone(),
            })?,
            None => DEFAULT_PORT,
        };
        let origin = get("ORIGIN").unwrap_or_else(|| format!("http://localhost:{}", port));
        let storage_root = PathBuf::from(
            get("STORAGE_ROOT").unwrap_or_else(|| DEFAULT_STORAGE_ROOT.to_string()),
        );
        let admin_password = get("ADMIN_PASSWORD").ok_or(ConfigError::Missing("ADMIN_PASSWORD"))?;
        let assets_dir = get("ASSETS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| storage_root.join("dist").join("assets"));

        Ok(Self {
            port,
            origin,
            storage_root,
            admin_password,
            assets_dir,
        })
    }

    pub fn state_path(&self) -> PathBuf {
        self.storage_root.join("storage").join("state.json")
    }
}
