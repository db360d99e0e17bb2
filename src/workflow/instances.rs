//! Run instance bookkeeping.
//!
//! Every run gets an id and a status record at `workflow:{id}:instance`.
//! The record carries the params the run was started with, so an errored
//! instance can be resumed without the caller remembering them.

use crate::error::{Error, Result};
use crate::models::RunParams;
use crate::storage::KvStore;
use chrono::Utc;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const KEY_PREFIX: &str = "workflow:";
const KEY_SUFFIX: &str = ":instance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Running,
    Complete,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub id: String,
    pub params: RunParams,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fresh instance id: `{source}-{date}-{8 hex digits}`.
pub fn new_instance_id(params: &RunParams) -> String {
    format!(
        "{}-{}-{:08x}",
        params.source,
        params.date,
        rng().random::<u32>()
    )
}

pub fn instance_key(id: &str) -> String {
    format!("{KEY_PREFIX}{id}{KEY_SUFFIX}")
}

#[derive(Clone)]
pub struct Instances {
    kv: Arc<dyn KvStore>,
}

impl Instances {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    async fn save(&self, status: &InstanceStatus) -> Result<()> {
        self.kv
            .put(&instance_key(&status.id), &serde_json::to_value(status)?)
            .await
    }

    /// Record a new queued instance, or re-queue an existing one.
    ///
    /// An existing instance keeps its step journal, so it may only be
    /// re-queued with the params it was created with.
    pub async fn create(&self, id: &str, params: &RunParams) -> Result<InstanceStatus> {
        let now = Utc::now().timestamp_millis();
        let created_at = match self.get(id).await? {
            Some(existing) if existing.params != *params => {
                warn!(
                    instance = %id,
                    stored_date = %existing.params.date,
                    stored_source = %existing.params.source,
                    "Instance id already used for other params"
                );
                return Err(Error::Config(format!(
                    "instance {id} belongs to {} {}, not {} {}",
                    existing.params.source, existing.params.date, params.source, params.date
                )));
            }
            Some(existing) => existing.created_at,
            None => now,
        };
        let status = InstanceStatus {
            id: id.to_string(),
            params: params.clone(),
            status: Status::Queued,
            error: None,
            created_at,
            updated_at: now,
        };
        self.save(&status).await?;
        info!(instance = %id, source = %params.source, date = %params.date, "Instance queued");
        Ok(status)
    }

    pub async fn get(&self, id: &str) -> Result<Option<InstanceStatus>> {
        match self.kv.get(&instance_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    pub async fn update(
        &self,
        id: &str,
        status: Status,
        error: Option<String>,
    ) -> Result<InstanceStatus> {
        let mut current = self
            .get(id)
            .await?
            .ok_or_else(|| Error::Config(format!("unknown instance: {id}")))?;
        current.status = status;
        current.error = error;
        current.updated_at = Utc::now().timestamp_millis();
        self.save(&current).await?;
        Ok(current)
    }

    /// All instances, newest first.
    pub async fn list(&self) -> Result<Vec<InstanceStatus>> {
        let mut out = Vec::new();
        for key in self.kv.list(KEY_PREFIX).await? {
            if !key.ends_with(KEY_SUFFIX) {
                continue;
            }
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_value::<InstanceStatus>(raw) {
                Ok(status) => out.push(status),
                Err(e) => warn!(%key, error = %e, "Skipping unreadable instance record"),
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use serde_json::json;

    fn params(date: &str) -> RunParams {
        RunParams {
            date: date.to_string(),
            source: "hacker-news".to_string(),
        }
    }

    #[test]
    fn test_instance_id_shape() {
        let id = new_instance_id(&params("2025-05-06"));
        let suffix = id.strip_prefix("hacker-news-2025-05-06-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let kv = Arc::new(MemoryKvStore::new());
        let instances = Instances::new(kv.clone());

        let queued = instances.create("a", &params("2025-05-06")).await.unwrap();
        assert_eq!(queued.status, Status::Queued);

        instances.update("a", Status::Running, None).await.unwrap();
        let errored = instances
            .update("a", Status::Errored, Some("boom".to_string()))
            .await
            .unwrap();
        assert_eq!(errored.error.as_deref(), Some("boom"));
        assert_eq!(errored.created_at, queued.created_at);

        let stored = kv.get("workflow:a:instance").await.unwrap().unwrap();
        assert_eq!(stored["status"], "errored");
        assert_eq!(stored["params"], json!({"date": "2025-05-06", "source": "hacker-news"}));
    }

    #[tokio::test]
    async fn test_create_rejects_reuse_with_other_params() {
        let kv = Arc::new(MemoryKvStore::new());
        let instances = Instances::new(kv.clone());
        let first = instances.create("a", &params("2025-05-06")).await.unwrap();

        let err = instances.create("a", &params("2025-05-07")).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.is_fatal());
        let stored = instances.get("a").await.unwrap().unwrap();
        assert_eq!(stored.params, params("2025-05-06"));

        let again = instances.create("a", &params("2025-05-06")).await.unwrap();
        assert_eq!(again.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_update_unknown_instance() {
        let instances = Instances::new(Arc::new(MemoryKvStore::new()));
        assert!(instances.update("nope", Status::Running, None).await.is_err());
    }

    #[tokio::test]
    async fn test_list_ignores_step_entries_and_sorts_newest_first() {
        let kv = Arc::new(MemoryKvStore::new());
        let instances = Instances::new(kv.clone());

        for (id, created_at) in [("old", 1), ("new", 3), ("mid", 2)] {
            let status = InstanceStatus {
                id: id.to_string(),
                params: params("2025-05-06"),
                status: Status::Complete,
                error: None,
                created_at,
                updated_at: created_at,
            };
            instances.save(&status).await.unwrap();
        }
        kv.put("workflow:new:step:get top stories", &json!({"output": []}))
            .await
            .unwrap();

        let ids: Vec<_> = instances
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }
}
