//! Read back the Run Records of recent days.
//!
//! A day without a record (no run yet, or the run failed) is simply absent
//! from the result. Records that no longer parse are logged and skipped.

use crate::error::Result;
use crate::models::{RunRecord, content_key};
use crate::storage::KvStore;
use crate::utils::past_days;
use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{debug, warn};

/// Records for the `days` dates ending at `from`, newest first.
pub async fn recent_records(
    kv: &dyn KvStore,
    env: &str,
    source: &str,
    from: NaiveDate,
    days: u32,
) -> Result<Vec<RunRecord>> {
    let keys: Vec<String> = past_days(from, days)
        .iter()
        .map(|date| content_key(env, source, date))
        .collect();

    let lookups = join_all(keys.iter().map(|key| kv.get(key))).await;

    let mut records = Vec::with_capacity(keys.len());
    for (key, lookup) in keys.iter().zip(lookups) {
        match lookup? {
            Some(raw) => match serde_json::from_value::<RunRecord>(raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(%key, error = %e, "Skipping unreadable run record"),
            },
            None => debug!(%key, "No record"),
        }
    }
    Ok(records)
}
