//! Local-file record store.
//!
//! One directory tree per service instance:
//! `{root}/devices/{serviceId}/{pending|active}/{tokenAlias}.json` and
//! `{root}/bearers/{serviceId}/{tokenAlias}|{accessRole}.json`.
//!
//! Every document write goes through a temp file + rename, so a reader never
//! observes a partially written record and pending→active promotion is a
//! single atomic rename followed by pending cleanup — there is no window
//! where the record is absent under both states.

use super::{check_key_component, BearerRecord, EcRecord, RecordStore, StoreError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File-backed [`RecordStore`].
pub struct FileStore {
    service_id: String,
    root: PathBuf,
}

impl FileStore {
    pub fn new(service_id: &str, root: &Path) -> Self {
        Self {
            service_id: service_id.to_owned(),
            root: root.to_owned(),
        }
    }

    fn record_path(&self, token_alias: &str, state: &str) -> Result<PathBuf, StoreError> {
        check_key_component(token_alias)?;
        Ok(self
            .root
            .join("devices")
            .join(&self.service_id)
            .join(state)
            .join(format!("{token_alias}.json")))
    }

    fn bearer_path(&self, token_alias: &str, access_role: &str) -> Result<PathBuf, StoreError> {
        check_key_component(token_alias)?;
        check_key_component(access_role)?;
        // User context is deliberately not part of the filename; one bearer
        // per (alias, role) on this backend.
        Ok(self
            .root
            .join("bearers")
            .join(&self.service_id)
            .join(format!("{token_alias}|{access_role}.json")))
    }

    async fn write_document<T: Serialize>(path: &Path, record: &T) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RecordStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.service_id.is_empty() {
            return Err(StoreError::Backend("service id is empty".into()));
        }
        let trees = [
            self.root
                .join("devices")
                .join(&self.service_id)
                .join("pending"),
            self.root
                .join("devices")
                .join(&self.service_id)
                .join("active"),
            self.root.join("bearers").join(&self.service_id),
        ];
        for dir in trees {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    async fn save_pending(&self, token_alias: &str, record: &EcRecord) -> Result<(), StoreError> {
        let path = self.record_path(token_alias, "pending")?;
        Self::write_document(&path, record).await
    }

    async fn save_active(&self, token_alias: &str, record: &EcRecord) -> Result<(), StoreError> {
        let path = self.record_path(token_alias, "active")?;
        Self::write_document(&path, record).await?;
        // Active copy is in place before the pending one disappears.
        let pending = self.record_path(token_alias, "pending")?;
        match tokio::fs::remove_file(&pending).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_active(&self, token_alias: &str) -> Result<Option<EcRecord>, StoreError> {
        let path = self.record_path(token_alias, "active")?;
        Self::read_document(&path).await
    }

    async fn save_bearer(&self, record: &BearerRecord) -> Result<(), StoreError> {
        let path = self.bearer_path(&record.token_alias, &record.access_role)?;
        Self::write_document(&path, record).await
    }

    async fn load_bearer(
        &self,
        token_alias: &str,
        access_role: &str,
        _user_data: &str,
    ) -> Result<Option<BearerRecord>, StoreError> {
        let path = self.bearer_path(token_alias, access_role)?;
        Self::read_document(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(alias: &str) -> EcRecord {
        EcRecord::new(alias, "priv-b64", "pub-b64", "device-pub-b64")
    }

    async fn ready_store(dir: &tempfile::TempDir) -> FileStore {
        let store = FileStore::new("svc-0042", dir.path());
        store.ensure_ready().await.unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_ready_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        store.ensure_ready().await.unwrap();
        assert!(dir.path().join("devices/svc-0042/pending").is_dir());
        assert!(dir.path().join("devices/svc-0042/active").is_dir());
        assert!(dir.path().join("bearers/svc-0042").is_dir());
    }

    #[tokio::test]
    async fn empty_service_id_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new("", dir.path());
        assert!(store.ensure_ready().await.is_err());
    }

    #[tokio::test]
    async fn active_round_trip_is_field_equal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let rec = record("alias-1");
        store.save_active("alias-1", &rec).await.unwrap();
        let loaded = store.load_active("alias-1").await.unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn pending_is_not_visible_as_active() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        store.save_pending("alias-1", &record("alias-1")).await.unwrap();
        assert!(store.load_active("alias-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn promotion_removes_pending_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let rec = record("alias-1");
        store.save_pending("alias-1", &rec).await.unwrap();
        store.save_active("alias-1", &rec).await.unwrap();

        assert!(!dir
            .path()
            .join("devices/svc-0042/pending/alias-1.json")
            .exists());
        assert_eq!(store.load_active("alias-1").await.unwrap().unwrap(), rec);
    }

    #[tokio::test]
    async fn promotion_without_pending_still_succeeds() {
        // Racing workers may have already cleaned up the pending copy.
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        store.save_active("alias-1", &record("alias-1")).await.unwrap();
        assert!(store.load_active("alias-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bearer_overwrite_keeps_one_record_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let first = BearerRecord::new("alias-1", "owner-admin", "ctx", "bearer-old", 100);
        let second = BearerRecord::new("alias-1", "owner-admin", "ctx", "bearer-new", 200);
        store.save_bearer(&first).await.unwrap();
        store.save_bearer(&second).await.unwrap();

        let loaded = store
            .load_bearer("alias-1", "owner-admin", "ctx")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, second);
    }

    #[tokio::test]
    async fn missing_bearer_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        assert!(store
            .load_bearer("alias-1", "owner-admin", "ctx")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn traversal_aliases_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ready_store(&dir).await;
        let err = store.load_active("../alias").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey));
    }
}
