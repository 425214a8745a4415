//! Service configuration.
//!
//! Loaded once at startup from a TOML file; every knob the runtime needs is
//! an explicit field here and is injected into the components that use it.
//! No ambient globals.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    30
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service identifier issued by the directory operator.
    pub service_id: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    pub directory: DirectoryConfig,
    pub store: StoreConfig,
}

/// HTTP gateway bind settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Debug-only relaxations. Both default to off; never enable in production.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// Skip the ±300 s freshness check on link-callback timestamps.
    #[serde(default)]
    pub skip_timestamp_check: bool,
    /// Skip the callback credential check on inbound requests.
    #[serde(default)]
    pub skip_callback_auth: bool,
}

/// Directory service connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Base URL of the directory API.
    pub server: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Outbound basic-auth credentials for directory API calls.
    pub auth_login: Option<String>,
    pub auth_password: Option<String>,
    /// Expected basic-auth credentials on inbound callbacks from the directory.
    pub callback_login: Option<String>,
    pub callback_password: Option<String>,
}

/// Record store selection. Exactly one backend section must match `backend`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `"file"` or `"rest"`.
    pub backend: String,
    pub file: Option<FileStoreConfig>,
    pub rest: Option<RestStoreConfig>,
}

/// Local-file backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FileStoreConfig {
    /// Directory under which the record tree is created.
    pub root_dir: PathBuf,
}

/// Managed document-store backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RestStoreConfig {
    /// Base URL of the document-store API.
    pub url: String,
    /// Server-side service key, sent as `apikey` + bearer.
    pub service_key: String,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        if config.service_id.trim().is_empty() {
            bail!("service_id must not be empty");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
service_id = "svc-0042"

[gateway]
port = 9090

[directory]
server = "https://directory.example.net"
auth_login = "api-user"
auth_password = "api-pass"
callback_login = "cb-user"
callback_password = "cb-pass"

[store]
backend = "file"

[store.file]
root_dir = "/srv/linkbroker/data"
"#;

    #[test]
    fn parses_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.service_id, "svc-0042");
        assert_eq!(config.gateway.host, "127.0.0.1");
        assert_eq!(config.gateway.port, 9090);
        assert_eq!(config.directory.timeout_secs, 30);
        assert!(!config.debug.skip_timestamp_check);
        assert_eq!(config.store.backend, "file");
        assert_eq!(
            config.store.file.unwrap().root_dir,
            PathBuf::from("/srv/linkbroker/data")
        );
        assert!(config.store.rest.is_none());
    }

    #[test]
    fn debug_section_defaults_to_off() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert!(!config.debug.skip_timestamp_check);
        assert!(!config.debug.skip_callback_auth);
    }

    #[test]
    fn missing_directory_section_fails() {
        let broken = r#"
service_id = "svc-0042"
[store]
backend = "file"
"#;
        assert!(toml::from_str::<Config>(broken).is_err());
    }

    #[test]
    fn empty_service_id_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            SAMPLE.replace("svc-0042", ""),
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }
}
