//! Uniform persistence interface for link credentials and bearer sessions.
//!
//! Exactly one backend is bound at startup via [`create_store`] and shared
//! process-wide behind `Arc<dyn RecordStore>`. Backends rely only on the
//! atomicity of a single write; there is no external locking.

pub mod file;
pub mod rest;

pub use file::FileStore;
pub use rest::RestStore;

use crate::config::Config;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A device-link credential set, keyed by token alias.
///
/// Created `pending` by the link worker and promoted to `active` after the
/// directory accepts the validation assertion. Once active it is only ever
/// replaced wholesale by a new linking cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcRecord {
    pub token_alias: String,
    pub service_ec_private: String,
    pub service_ec_public: String,
    pub device_ec_public: String,
    pub timestamp_created: i64,
}

impl EcRecord {
    pub fn new(
        token_alias: impl Into<String>,
        service_ec_private: impl Into<String>,
        service_ec_public: impl Into<String>,
        device_ec_public: impl Into<String>,
    ) -> Self {
        Self {
            token_alias: token_alias.into(),
            service_ec_private: service_ec_private.into(),
            service_ec_public: service_ec_public.into(),
            device_ec_public: device_ec_public.into(),
            timestamp_created: chrono::Utc::now().timestamp(),
        }
    }
}

/// An access session, keyed by (token alias, access role, user context).
///
/// Local expiry is advisory only; validity is decided by a live info check
/// against the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerRecord {
    pub token_alias: String,
    pub access_role: String,
    pub user_data: String,
    pub bearer_value: String,
    pub timestamp_expires: i64,
}

impl BearerRecord {
    pub fn new(
        token_alias: impl Into<String>,
        access_role: impl Into<String>,
        user_data: impl Into<String>,
        bearer_value: impl Into<String>,
        timestamp_expires: i64,
    ) -> Self {
        Self {
            token_alias: token_alias.into(),
            access_role: access_role.into(),
            user_data: user_data.into(),
            bearer_value: bearer_value.into(),
            timestamp_expires,
        }
    }
}

/// Backend failures. Collapsed to the internal-store error at the HTTP edge.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("document store request failed: {0}")]
    Backend(String),
    #[error("invalid token alias for storage key")]
    InvalidKey,
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// The six-operation persistence capability shared by every backend.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for startup logs.
    fn name(&self) -> &'static str;

    /// Idempotently prepare the backing medium (directory tree, collection
    /// reachability). Called once before the gateway starts serving.
    async fn ensure_ready(&self) -> Result<(), StoreError>;

    /// Persist a link credential in `pending` state.
    async fn save_pending(&self, token_alias: &str, record: &EcRecord) -> Result<(), StoreError>;

    /// Persist a link credential as `active`, superseding any pending copy.
    async fn save_active(&self, token_alias: &str, record: &EcRecord) -> Result<(), StoreError>;

    /// Load the active link credential for a token alias, if any.
    async fn load_active(&self, token_alias: &str) -> Result<Option<EcRecord>, StoreError>;

    /// Persist a bearer session, overwriting any prior record at its key.
    async fn save_bearer(&self, record: &BearerRecord) -> Result<(), StoreError>;

    /// Load the cached bearer session for (alias, role, context), if any.
    async fn load_bearer(
        &self,
        token_alias: &str,
        access_role: &str,
        user_data: &str,
    ) -> Result<Option<BearerRecord>, StoreError>;
}

/// Bind the backend selected by configuration.
pub fn create_store(config: &Config) -> Result<Arc<dyn RecordStore>> {
    match config.store.backend.as_str() {
        "file" => {
            let file = config
                .store
                .file
                .as_ref()
                .context("[store.file] section is required for the file backend")?;
            Ok(Arc::new(FileStore::new(&config.service_id, &file.root_dir)))
        }
        "rest" => {
            let rest = config
                .store
                .rest
                .as_ref()
                .context("[store.rest] section is required for the rest backend")?;
            Ok(Arc::new(RestStore::new(&config.service_id, rest)?))
        }
        other => bail!("unknown store backend: {other}"),
    }
}

/// Reject aliases/roles that would escape their directory or document key.
pub(crate) fn check_key_component(value: &str) -> Result<(), StoreError> {
    let ok = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !value.contains("..");
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey)
    }
}
