//! Directory service client.
//!
//! The vendor directory resolves service tags, relays link-validation and
//! trust-issuance messages to devices, and proxies device info requests.
//! This module defines the consumed interface as an object-safe trait plus
//! its wire types; [`http`] provides the production reqwest client. One
//! long-lived instance is built at startup and shared behind
//! `Arc<dyn Directory>`.

pub mod http;

pub use http::HttpDirectoryClient;

use crate::signing::SigningError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ephemeral result of resolving an opaque service tag. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseResolution {
    pub token_alias: String,
    pub system_name: String,
    pub ndm_hw_id: String,
}

/// Link-validation request relayed to the device via the directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateLink {
    pub device_ec_public: String,
    pub service_ec_public: String,
    pub token_alias: String,
    pub timestamp: i64,
    pub ec_signature: String,
}

/// Info reported by a device through the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub bearer_is_valid: bool,
    pub model_name: String,
}

/// A bearer issued through the trust operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedBearer {
    pub bearer_value: String,
    pub expires_at: i64,
}

/// Failures of directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Transport failure or a non-protocol answer from the directory.
    #[error("directory request failed: {0}")]
    Unavailable(String),
    /// Structured error originating on the device, passed through verbatim.
    #[error("device error {code}: {description}")]
    Device { code: String, description: String },
    /// The trust assertion could not be signed with the stored keys.
    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Operations this service consumes from the directory.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a normalized 15-digit service tag. `Ok(None)` when the
    /// directory knows no device for it.
    async fn resolve_license(
        &self,
        service_tag: &str,
    ) -> Result<Option<LicenseResolution>, DirectoryError>;

    /// Ask the directory to validate a link assertion with the device.
    /// Success means the device accepted the new service key.
    async fn validate_link(&self, request: &ValidateLink) -> Result<(), DirectoryError>;

    /// Query device info using a bearer. `Ok(None)` when the directory
    /// answers without a payload (a special case, not an error).
    async fn get_info(
        &self,
        token_alias: &str,
        bearer_value: &str,
        explained: bool,
    ) -> Result<Option<DeviceInfo>, DirectoryError>;

    /// Sign a trust assertion with the stored service keys and have the
    /// directory issue a bearer valid for `ttl_secs`.
    async fn trust_token(
        &self,
        token_alias: &str,
        service_ec_private: &str,
        service_ec_public: &str,
        ttl_secs: i64,
        access_role: &str,
        user_data: &str,
    ) -> Result<IssuedBearer, DirectoryError>;
}
