//! HTTP client for the directory API.
//!
//! Basic-auth'd JSON REST against the configured base URL, one reqwest
//! client per process with a builder-configured timeout. Device-originated
//! failures arrive as `{code, description}` bodies on non-2xx answers and
//! are passed through verbatim; everything else is "unavailable".

use super::{DeviceInfo, Directory, DirectoryError, IssuedBearer, LicenseResolution, ValidateLink};
use crate::config::DirectoryConfig;
use crate::signing;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Header carrying the device bearer on info requests. `Authorization` is
/// taken by the directory's own basic auth.
const BEARER_HEADER: &str = "X-Ndma-Tkn";

/// Device error body shape on non-2xx directory answers.
#[derive(Debug, Deserialize)]
struct DeviceErrorBody {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct InfoBody {
    bearer_is_valid: Option<String>,
    model_name: Option<String>,
}

/// Production [`Directory`] implementation.
pub struct HttpDirectoryClient {
    base_url: String,
    login: Option<String>,
    password: Option<String>,
    http: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.server.trim_end_matches('/').to_owned(),
            login: config.auth_login.clone(),
            password: config.auth_password.clone(),
            http,
        })
    }

    fn endpoint(&self, tail: &str) -> String {
        format!("{}/api/v1/{tail}", self.base_url)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.login {
            Some(login) => request.basic_auth(login, self.password.as_deref()),
            None => request,
        }
    }

    /// Fold a non-2xx answer into the error taxonomy: a parsable
    /// `{code, description}` body is a device error, anything else means the
    /// directory itself misbehaved.
    async fn error_from(resp: reqwest::Response) -> DirectoryError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<DeviceErrorBody>(&body) {
            Ok(device) => DirectoryError::Device {
                code: device.code,
                description: device.description,
            },
            Err(_) => DirectoryError::Unavailable(format!("status {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

#[async_trait]
impl Directory for HttpDirectoryClient {
    async fn resolve_license(
        &self,
        service_tag: &str,
    ) -> Result<Option<LicenseResolution>, DirectoryError> {
        let url = self.endpoint(&format!("license/{service_tag}"));
        let resp = self.with_auth(self.http.get(&url)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        Ok(Some(resp.json().await?))
    }

    async fn validate_link(&self, request: &ValidateLink) -> Result<(), DirectoryError> {
        let url = self.endpoint("link/validate");
        let resp = self
            .with_auth(self.http.post(&url).json(request))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        Ok(())
    }

    async fn get_info(
        &self,
        token_alias: &str,
        bearer_value: &str,
        explained: bool,
    ) -> Result<Option<DeviceInfo>, DirectoryError> {
        let url = self.endpoint(&format!("device/{token_alias}/info?explained={explained}"));
        let resp = self
            .with_auth(self.http.get(&url).header(BEARER_HEADER, bearer_value))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        let body: InfoBody = resp.json().await?;
        match (body.bearer_is_valid, body.model_name) {
            (Some(valid), model_name) => Ok(Some(DeviceInfo {
                bearer_is_valid: valid == "true",
                model_name: model_name.unwrap_or_default(),
            })),
            // Answered, but with an empty payload: the caller treats this as
            // a special case rather than an error.
            (None, _) => Ok(None),
        }
    }

    async fn trust_token(
        &self,
        token_alias: &str,
        service_ec_private: &str,
        service_ec_public: &str,
        ttl_secs: i64,
        access_role: &str,
        user_data: &str,
    ) -> Result<IssuedBearer, DirectoryError> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = signing::sign_trust_assertion(
            service_ec_private,
            token_alias,
            ttl_secs,
            access_role,
            user_data,
            timestamp,
        )?;
        let payload = serde_json::json!({
            "tokenAlias": token_alias,
            "serviceEcPublic": service_ec_public,
            "ttlSeconds": ttl_secs,
            "accessRole": access_role,
            "userData": user_data,
            "timestamp": timestamp,
            "ecSignature": signature,
        });
        let url = self.endpoint("token/trust");
        let resp = self
            .with_auth(self.http.post(&url).json(&payload))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from(resp).await);
        }
        Ok(resp.json().await?)
    }
}
