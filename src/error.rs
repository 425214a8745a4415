//! Service-wide error taxonomy.
//!
//! Every failure surfaced to an HTTP caller is a [`ServiceError`] kind with a
//! stable wire code and a consistent status. The synchronous search path
//! returns these as structured `{code, error}` bodies; the asynchronous link
//! worker only logs its failures, since its caller has already been answered.

use crate::directory::DirectoryError;
use crate::signing::SigningError;
use crate::store::StoreError;
use axum::http::StatusCode;
use thiserror::Error;

/// Errors returned to HTTP callers, one variant per taxonomy kind.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A mandatory request parameter is absent.
    #[error("missing {0} parameter")]
    MissingParameter(&'static str),

    /// The service tag did not normalize to exactly 15 digits.
    #[error("service tag (license) is not valid")]
    InvalidServiceTag,

    /// The directory resolved nothing for the given service tag.
    #[error("could not find device by service tag")]
    DeviceNotFound,

    /// The callback signature did not verify (or verification raised).
    #[error("signature is not verified")]
    SignatureNotVerified,

    /// No active link credential exists for the token alias.
    #[error("missing keys. is device linked?")]
    NotLinked,

    /// A persisted record is present but unusable (empty key material,
    /// backend I/O failure, corrupt document).
    #[error("failed to load device keys from internal store")]
    InternalStore,

    /// Stored key material could not be used for signing.
    #[error("failed to load EC keys")]
    KeyMaterial,

    /// The directory service is unreachable or answered outside its protocol.
    #[error("failed to get information from the directory, try later")]
    Upstream,

    /// The directory answered, but with an empty info payload.
    #[error("unexpected answer from the directory")]
    UnexpectedAnswer,

    /// The device rejected a bearer we just issued. Never expected, still handled.
    #[error("failed to get remote info from the device after sending access token")]
    UnexpectedUpstreamState,

    /// Structured error relayed verbatim from the physical device.
    #[error("{description}")]
    Device { code: String, description: String },

    /// Transport credential check failed.
    #[error("authorization failed")]
    Unauthorized,
}

impl ServiceError {
    /// Stable wire code for the `{code, error}` response body.
    pub fn code(&self) -> &str {
        match self {
            Self::MissingParameter(_) => "0x200",
            Self::InvalidServiceTag => "0x201",
            Self::DeviceNotFound => "0x202",
            Self::SignatureNotVerified => "0x203",
            Self::NotLinked => "0x300",
            Self::InternalStore => "0x301",
            Self::KeyMaterial => "0x302",
            Self::Upstream => "0x100",
            Self::UnexpectedAnswer => "0x101",
            Self::UnexpectedUpstreamState => "0x404",
            Self::Device { code, .. } => code,
            Self::Unauthorized => "0x401",
        }
    }

    /// HTTP status for this kind. One status per kind across all branches.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) | Self::InvalidServiceTag | Self::SignatureNotVerified => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::DeviceNotFound => StatusCode::NOT_FOUND,
            Self::NotLinked => StatusCode::CONFLICT,
            Self::InternalStore | Self::KeyMaterial => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream
            | Self::UnexpectedAnswer
            | Self::UnexpectedUpstreamState
            | Self::Device { .. } => StatusCode::BAD_GATEWAY,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<DirectoryError> for ServiceError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Unavailable(reason) => {
                tracing::warn!("directory unavailable: {reason}");
                Self::Upstream
            }
            DirectoryError::Device { code, description } => Self::Device { code, description },
            DirectoryError::Signing(e) => {
                tracing::warn!("trust assertion signing failed: {e}");
                Self::KeyMaterial
            }
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        tracing::error!("record store failure: {err}");
        Self::InternalStore
    }
}

impl From<SigningError> for ServiceError {
    fn from(err: SigningError) -> Self {
        tracing::warn!("signing failure: {err}");
        Self::KeyMaterial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ServiceError::MissingParameter("license").code(), "0x200");
        assert_eq!(ServiceError::InvalidServiceTag.code(), "0x201");
        assert_eq!(ServiceError::NotLinked.code(), "0x300");
        assert_eq!(ServiceError::Upstream.code(), "0x100");
        assert_eq!(ServiceError::Unauthorized.code(), "0x401");
        assert_eq!(ServiceError::UnexpectedUpstreamState.code(), "0x404");
    }

    #[test]
    fn device_error_passes_code_and_description_through() {
        let err = ServiceError::Device {
            code: "0xA53C".into(),
            description: "no such user role".into(),
        };
        assert_eq!(err.code(), "0xA53C");
        assert_eq!(err.to_string(), "no such user role");
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_errors_are_unprocessable() {
        assert_eq!(
            ServiceError::MissingParameter("tokenAlias").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::SignatureNotVerified.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn store_errors_collapse_to_internal_store() {
        let io = StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let err: ServiceError = io.into();
        assert!(matches!(err, ServiceError::InternalStore));
    }
}
