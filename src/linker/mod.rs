//! Device-link workflow.
//!
//! Two halves:
//! - the **initiator** side, which validates and verifies an inbound signed
//!   link callback inside the request ([`LinkCallback`]);
//! - the **completion worker** ([`complete_link`]), spawned as a detached
//!   task once the callback verifies. It generates service keys, persists a
//!   pending credential, asks the directory to validate the link with the
//!   device, and promotes the credential to active on acceptance.
//!
//! Worker failures are logged only: the callback sender has already received
//! its "verification passed, work scheduled" acknowledgment and has no
//! channel to learn the eventual outcome. There is no retry; a failed
//! attempt leaves its pending record in place as an audit trail.

use crate::directory::{Directory, DirectoryError, ValidateLink};
use crate::error::ServiceError;
use crate::signing::{self, SigningError, VerifyOptions};
use crate::store::{EcRecord, RecordStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Terminal worker failures, visible only in logs.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// A transport-authenticated link callback with all five mandatory
/// parameters present.
#[derive(Debug, Clone)]
pub struct LinkCallback {
    pub token_alias: String,
    pub service_id: String,
    pub device_ec_public: String,
    pub timestamp: String,
    pub ec_signature: String,
}

impl LinkCallback {
    /// Assemble from optional query parameters; the first absent one wins
    /// and becomes the missing-parameter error. No side effects either way.
    pub fn from_params(
        token_alias: Option<String>,
        service_id: Option<String>,
        device_ec_public: Option<String>,
        timestamp: Option<String>,
        ec_signature: Option<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            token_alias: token_alias.ok_or(ServiceError::MissingParameter("tokenAlias"))?,
            service_id: service_id.ok_or(ServiceError::MissingParameter("serviceId"))?,
            device_ec_public: device_ec_public
                .ok_or(ServiceError::MissingParameter("deviceEcPublic"))?,
            timestamp: timestamp.ok_or(ServiceError::MissingParameter("timestamp"))?,
            ec_signature: ec_signature.ok_or(ServiceError::MissingParameter("ecSignature"))?,
        })
    }

    /// Verify the callback signature. A raised verification error is folded
    /// into "not verified".
    pub fn verify(&self, options: VerifyOptions) -> bool {
        let params = signing::CallbackParams {
            token_alias: &self.token_alias,
            service_id: &self.service_id,
            device_ec_public: &self.device_ec_public,
            timestamp: &self.timestamp,
            ec_signature: &self.ec_signature,
        };
        match signing::verify_callback_signature(&params, options) {
            Ok(verified) => verified,
            Err(e) => {
                tracing::debug!(token_alias = %self.token_alias, "callback verification raised: {e}");
                false
            }
        }
    }
}

/// Spawn the completion worker as an independent task, detached from the
/// request that triggered it. The task may outlive the response.
pub fn spawn_completion(
    store: Arc<dyn RecordStore>,
    directory: Arc<dyn Directory>,
    callback: LinkCallback,
) {
    tokio::spawn(async move {
        let token_alias = callback.token_alias.clone();
        match complete_link(store.as_ref(), directory.as_ref(), &callback).await {
            Ok(()) => tracing::info!(token_alias = %token_alias, "successfully linked"),
            Err(e) => {
                tracing::warn!(token_alias = %token_alias, "link completion failed: {e}");
            }
        }
    });
}

/// Run one link-completion attempt to its terminal state.
///
/// Overlapping callbacks for one token alias are not serialized; the store
/// resolves the race last-writer-wins.
pub async fn complete_link(
    store: &dyn RecordStore,
    directory: &dyn Directory,
    callback: &LinkCallback,
) -> Result<(), LinkError> {
    let keys = signing::generate_keypair()?;
    let (signature, signed_timestamp) = signing::sign_validation_assertion(
        &keys.private_pkcs8,
        &callback.service_id,
        &callback.device_ec_public,
        &keys.public_key,
    )?;

    let record = EcRecord::new(
        callback.token_alias.clone(),
        keys.private_pkcs8,
        keys.public_key.clone(),
        callback.device_ec_public.clone(),
    );
    store.save_pending(&callback.token_alias, &record).await?;

    tracing::info!(
        token_alias = %callback.token_alias,
        timestamp = signed_timestamp,
        "starting link validation"
    );
    directory
        .validate_link(&ValidateLink {
            device_ec_public: callback.device_ec_public.clone(),
            service_ec_public: keys.public_key,
            token_alias: callback.token_alias.clone(),
            timestamp: signed_timestamp,
            ec_signature: signature,
        })
        .await?;

    // Validation accepted: promote the same content to active.
    store.save_active(&callback.token_alias, &record).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::testing::StubDirectory;
    use crate::store::FileStore;
    use std::sync::atomic::Ordering;

    fn callback(alias: &str) -> LinkCallback {
        LinkCallback {
            token_alias: alias.into(),
            service_id: "svc-0042".into(),
            device_ec_public: "device-pub-b64".into(),
            timestamp: "1700000000".into(),
            ec_signature: "sig-b64".into(),
        }
    }

    async fn ready_store(dir: &tempfile::TempDir) -> FileStore {
        let store = FileStore::new("svc-0042", dir.path());
        store.ensure_ready().await.unwrap();
        store
    }

    #[test]
    fn missing_parameter_is_named() {
        let err = LinkCallback::from_params(
            Some("alias-1".into()),
            Some("svc-0042".into()),
            None,
            Some("1700000000".into()),
            Some("sig".into()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::MissingParameter("deviceEcPublic")
        ));
    }

    #[test]
    fn all_parameters_present_assembles() {
        let cb = LinkCallback::from_params(
            Some("alias-1".into()),
            Some("svc-0042".into()),
            Some("dev-pub".into()),
            Some("1700000000".into()),
            Some("sig".into()),
        )
        .unwrap();
        assert_eq!(cb.token_alias, "alias-1");
    }

    #[test]
    fn malformed_signature_material_is_not_verified() {
        // Verification raising (bad base64) must read as "not verified".
        assert!(!callback("alias-1").verify(VerifyOptions {
            skip_timestamp_check: true,
        }));
    }

    #[tokio::test]
    async fn accepted_validation_promotes_pending_to_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let directory = StubDirectory {
            validate_ok: true,
            ..StubDirectory::default()
        };

        complete_link(&store, &directory, &callback("alias-1"))
            .await
            .unwrap();

        assert_eq!(directory.validate_calls.load(Ordering::SeqCst), 1);
        let active = store.load_active("alias-1").await.unwrap().unwrap();
        assert_eq!(active.token_alias, "alias-1");
        assert_eq!(active.device_ec_public, "device-pub-b64");
        assert!(!active.service_ec_private.is_empty());
        assert!(!active.service_ec_public.is_empty());
        assert!(!dir
            .path()
            .join("devices/svc-0042/pending/alias-1.json")
            .exists());
    }

    #[tokio::test]
    async fn validation_request_carries_keys_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let directory = StubDirectory {
            validate_ok: true,
            ..StubDirectory::default()
        };

        complete_link(&store, &directory, &callback("alias-1"))
            .await
            .unwrap();

        let sent = directory.last_validate.lock().unwrap().clone().unwrap();
        assert_eq!(sent.token_alias, "alias-1");
        assert_eq!(sent.device_ec_public, "device-pub-b64");
        let active = store.load_active("alias-1").await.unwrap().unwrap();
        assert_eq!(sent.service_ec_public, active.service_ec_public);
        assert!(!sent.ec_signature.is_empty());
    }

    #[tokio::test]
    async fn rejected_validation_leaves_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let directory = StubDirectory {
            validate_ok: false,
            ..StubDirectory::default()
        };

        let err = complete_link(&store, &directory, &callback("alias-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Directory(_)));

        // No active record, but the pending audit trail stays.
        assert!(store.load_active("alias-1").await.unwrap().is_none());
        assert!(dir
            .path()
            .join("devices/svc-0042/pending/alias-1.json")
            .exists());
    }

    #[tokio::test]
    async fn each_attempt_creates_exactly_one_pending_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let directory = StubDirectory {
            validate_ok: false,
            ..StubDirectory::default()
        };

        let _ = complete_link(&store, &directory, &callback("alias-1")).await;
        let pending_dir = dir.path().join("devices/svc-0042/pending");
        let entries = std::fs::read_dir(pending_dir).unwrap().count();
        assert_eq!(entries, 1);
    }
}
