//! Managed document-store record backend.
//!
//! Speaks a PostgREST-style API: one collection per service instance for
//! device records (documents keyed by token alias with an explicit
//! `isActive` flag instead of directory separation) and one shared
//! `bearers` collection keyed by the composite `{alias};{role};{context}`.
//! Upserts rely on `Prefer: resolution=merge-duplicates`, so a write is a
//! single atomic document replacement.

use super::{check_key_component, BearerRecord, EcRecord, RecordStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const BEARER_COLLECTION: &str = "bearers";

/// Device document as stored in the per-service collection.
#[derive(Debug, Serialize, Deserialize)]
struct DeviceDocument {
    key: String,
    #[serde(rename = "isActive")]
    is_active: bool,
    record: EcRecord,
}

/// Bearer document as stored in the shared collection.
#[derive(Debug, Serialize, Deserialize)]
struct BearerDocument {
    key: String,
    record: BearerRecord,
}

/// Document-store-backed [`RecordStore`].
pub struct RestStore {
    service_id: String,
    base_url: String,
    service_key: String,
    http: reqwest::Client,
}

impl RestStore {
    pub fn new(
        service_id: &str,
        config: &crate::config::RestStoreConfig,
    ) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            service_id: service_id.to_owned(),
            base_url: config.url.trim_end_matches('/').to_owned(),
            service_key: config.service_key.clone(),
            http,
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, collection)
    }

    fn device_collection(&self) -> String {
        self.collection_url(&self.service_id)
    }

    fn bearer_key(token_alias: &str, access_role: &str, user_data: &str) -> String {
        format!("{token_alias};{access_role};{user_data}")
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn upsert<T: Serialize>(&self, url: &str, document: &T) -> Result<(), StoreError> {
        let request = self
            .http
            .post(url)
            .json(document)
            .header("Prefer", "resolution=merge-duplicates,return=minimal");
        let resp = self.with_auth(request).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("upsert failed ({status}): {body}")));
        }
        Ok(())
    }

    async fn fetch_by_key<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        // The bearer key embeds caller-supplied context; encode it so
        // reserved characters cannot split or extend the filter.
        let request = self
            .http
            .get(format!("{url}?key=eq.{}&select=*", urlencoding::encode(key)));
        let resp = self.with_auth(request).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("fetch failed ({status}): {body}")));
        }
        let mut documents: Vec<T> = resp.json().await?;
        Ok(if documents.is_empty() {
            None
        } else {
            Some(documents.swap_remove(0))
        })
    }
}

#[async_trait]
impl RecordStore for RestStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.service_id.is_empty() {
            return Err(StoreError::Backend("service id is empty".into()));
        }
        // Pull one row from the device collection; any successful answer
        // means the store is reachable and the collection exists.
        let request = self.http.get(format!("{}?limit=1", self.device_collection()));
        let resp = self.with_auth(request).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(StoreError::Backend(format!(
                "device collection not reachable ({status})"
            )));
        }
        Ok(())
    }

    async fn save_pending(&self, token_alias: &str, record: &EcRecord) -> Result<(), StoreError> {
        check_key_component(token_alias)?;
        let document = DeviceDocument {
            key: token_alias.to_owned(),
            is_active: false,
            record: record.clone(),
        };
        self.upsert(&self.device_collection(), &document).await
    }

    async fn save_active(&self, token_alias: &str, record: &EcRecord) -> Result<(), StoreError> {
        check_key_component(token_alias)?;
        // Promotion is one upsert flipping the flag; readers see either the
        // pending or the active document, never neither.
        let document = DeviceDocument {
            key: token_alias.to_owned(),
            is_active: true,
            record: record.clone(),
        };
        self.upsert(&self.device_collection(), &document).await
    }

    async fn load_active(&self, token_alias: &str) -> Result<Option<EcRecord>, StoreError> {
        check_key_component(token_alias)?;
        let document: Option<DeviceDocument> = self
            .fetch_by_key(&self.device_collection(), token_alias)
            .await?;
        Ok(document.filter(|doc| doc.is_active).map(|doc| doc.record))
    }

    async fn save_bearer(&self, record: &BearerRecord) -> Result<(), StoreError> {
        check_key_component(&record.token_alias)?;
        check_key_component(&record.access_role)?;
        let document = BearerDocument {
            key: Self::bearer_key(&record.token_alias, &record.access_role, &record.user_data),
            record: record.clone(),
        };
        self.upsert(&self.collection_url(BEARER_COLLECTION), &document)
            .await
    }

    async fn load_bearer(
        &self,
        token_alias: &str,
        access_role: &str,
        user_data: &str,
    ) -> Result<Option<BearerRecord>, StoreError> {
        check_key_component(token_alias)?;
        check_key_component(access_role)?;
        let key = Self::bearer_key(token_alias, access_role, user_data);
        let document: Option<BearerDocument> = self
            .fetch_by_key(&self.collection_url(BEARER_COLLECTION), &key)
            .await?;
        Ok(document.map(|doc| doc.record))
    }
}
