//! Bearer-session resolver.
//!
//! Resolves a user-facing service tag to an authenticated session against
//! the linked device: tag normalization, directory resolution, cached-bearer
//! reuse (validity decided by a live device-info check, never local expiry),
//! and renewal through the trust-issuance operation. Runs synchronously in
//! the calling request, making up to three sequential directory calls; any
//! failure surfaces as a structured [`ServiceError`] and resilience is the
//! caller's job.

use crate::directory::{Directory, LicenseResolution};
use crate::error::ServiceError;
use crate::store::{BearerRecord, RecordStore};
use serde::Serialize;

/// Role every issued bearer is bound to.
pub const ACCESS_ROLE: &str = "owner-admin";

/// Fixed bearer validity window: 7 days.
pub const BEARER_TTL_SECS: i64 = 86_400 * 7;

/// Context used when the caller supplies none.
const DEFAULT_USER_DATA: &str = "temp;test";

/// A service tag always normalizes to this many digits.
const SERVICE_TAG_DIGITS: usize = 15;

/// Successful search answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub ndm_hw_id: String,
    pub token_alias: String,
    pub system_name: String,
    pub model_name: String,
    pub bearer_value: String,
    pub redirect_url: String,
}

/// Strip everything but digits and require exactly 15 of them. Tags are
/// frequently written with dashes.
pub fn normalize_service_tag(raw: &str) -> Result<String, ServiceError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != SERVICE_TAG_DIGITS {
        return Err(ServiceError::InvalidServiceTag);
    }
    Ok(digits)
}

fn search_result(
    resolution: &LicenseResolution,
    model_name: &str,
    bearer_value: &str,
) -> SearchResult {
    SearchResult {
        ndm_hw_id: resolution.ndm_hw_id.clone(),
        token_alias: resolution.token_alias.clone(),
        system_name: resolution.system_name.clone(),
        model_name: model_name.to_owned(),
        bearer_value: bearer_value.to_owned(),
        redirect_url: format!(
            "https://{}/auth?x-ndma-tkn={}&url=/",
            resolution.system_name, bearer_value
        ),
    }
}

/// Resolve a service tag to an authenticated, possibly renewed session.
pub async fn resolve_session(
    store: &dyn RecordStore,
    directory: &dyn Directory,
    service_tag: &str,
    user_data: Option<&str>,
) -> Result<SearchResult, ServiceError> {
    let tag = normalize_service_tag(service_tag)?;

    let resolution = directory
        .resolve_license(&tag)
        .await?
        .ok_or(ServiceError::DeviceNotFound)?;
    if resolution.token_alias.is_empty() || resolution.system_name.is_empty() {
        return Err(ServiceError::DeviceNotFound);
    }

    let device = store
        .load_active(&resolution.token_alias)
        .await?
        .ok_or(ServiceError::NotLinked)?;
    if device.service_ec_private.is_empty() || device.service_ec_public.is_empty() {
        return Err(ServiceError::InternalStore);
    }

    let user_data = user_data.filter(|u| !u.is_empty()).unwrap_or(DEFAULT_USER_DATA);

    // A cached bearer is only trusted after the device itself confirms it.
    if let Some(cached) = store
        .load_bearer(&resolution.token_alias, ACCESS_ROLE, user_data)
        .await?
    {
        let info = directory
            .get_info(&resolution.token_alias, &cached.bearer_value, true)
            .await?
            .ok_or(ServiceError::UnexpectedAnswer)?;
        if info.bearer_is_valid {
            return Ok(search_result(
                &resolution,
                &info.model_name,
                &cached.bearer_value,
            ));
        }
        tracing::debug!(
            token_alias = %resolution.token_alias,
            "cached bearer reported invalid, issuing a new one"
        );
    }

    let issued = directory
        .trust_token(
            &resolution.token_alias,
            &device.service_ec_private,
            &device.service_ec_public,
            BEARER_TTL_SECS,
            ACCESS_ROLE,
            user_data,
        )
        .await?;

    let record = BearerRecord::new(
        resolution.token_alias.clone(),
        ACCESS_ROLE,
        user_data,
        issued.bearer_value.clone(),
        issued.expires_at,
    );
    store.save_bearer(&record).await?;

    // Confirm the fresh bearer and pick up current device metadata. A
    // negative answer here is never expected but still handled explicitly.
    match directory
        .get_info(&resolution.token_alias, &issued.bearer_value, true)
        .await?
    {
        Some(info) if info.bearer_is_valid => Ok(search_result(
            &resolution,
            &info.model_name,
            &issued.bearer_value,
        )),
        _ => Err(ServiceError::UnexpectedUpstreamState),
    }
}
