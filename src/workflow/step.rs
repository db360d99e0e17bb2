//! Durable, retried, time-limited steps.
//!
//! A step is a named unit of work inside one run instance. Its successful
//! output is journaled in the key-value store under
//! `workflow:{instance}:step:{name}` before the next step starts. Running the
//! same instance again replays journaled outputs instead of executing the
//! work, so external side effects of completed steps happen once.
//!
//! # Retry Strategy
//!
//! ```text
//! attempt 1 ──fail──► sleep(delay_for(1)) ──► attempt 2 ──fail──► ... attempt N ──► StepFailed
//!                                                                     │
//!         each attempt bounded by `timeout`, a timeout counts as a failure
//! ```
//!
//! Fatal errors (see [`Error::is_fatal`]) end the step on the first attempt.

use crate::error::{Error, Result};
use crate::storage::KvStore;
use crate::utils::de_duration;
use chrono::Utc;
use rand::{Rng, rng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

const MAX_JITTER_MS: u64 = 250;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Constant,
    Linear,
    #[default]
    Exponential,
}

/// Retry and timeout policy of a step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StepPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    #[serde(deserialize_with = "de_duration")]
    pub delay: Duration,
    pub backoff: Backoff,
    /// Limit for a single attempt.
    #[serde(deserialize_with = "de_duration")]
    pub timeout: Duration,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(10),
            backoff: Backoff::Exponential,
            timeout: Duration::from_secs(3 * 60),
        }
    }
}

impl StepPolicy {
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Backoff before the retry that follows failed attempt `attempt` (1-based),
    /// without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt),
            Backoff::Exponential => self.delay.saturating_mul(1 << (attempt - 1).min(16)),
        }
    }

    fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if delay.is_zero() {
            return delay;
        }
        delay + Duration::from_millis(rng().random_range(0..=MAX_JITTER_MS))
    }
}

/// What the journal keeps for a completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepEntry {
    output: Value,
    attempts: u32,
    completed_at: i64,
}

/// Step runner bound to one run instance.
#[derive(Clone)]
pub struct Steps {
    instance_id: String,
    journal: Arc<dyn KvStore>,
}

impl Steps {
    pub fn new(instance_id: impl Into<String>, journal: Arc<dyn KvStore>) -> Self {
        Self {
            instance_id: instance_id.into(),
            journal,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn journal_key(&self, name: &str) -> String {
        format!("workflow:{}:step:{name}", self.instance_id)
    }

    async fn replay<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let Some(raw) = self.journal.get(&self.journal_key(name)).await? else {
            return Ok(None);
        };
        match serde_json::from_value::<StepEntry>(raw) {
            Ok(entry) => Ok(Some(serde_json::from_value(entry.output)?)),
            Err(e) => {
                warn!(step = %name, error = %e, "Ignoring unreadable journal entry");
                Ok(None)
            }
        }
    }

    async fn record(&self, name: &str, output: Value, attempts: u32) -> Result<()> {
        let entry = StepEntry {
            output,
            attempts,
            completed_at: Utc::now().timestamp_millis(),
        };
        self.journal
            .put(&self.journal_key(name), &serde_json::to_value(entry)?)
            .await
    }

    /// Run `work` as the step `name`, or replay its journaled output.
    ///
    /// # Arguments
    ///
    /// * `name` - Step name, unique within the run instance
    /// * `policy` - Attempts, backoff and per-attempt timeout
    /// * `work` - Produces a fresh future for every attempt
    ///
    /// # Returns
    ///
    /// The step output, or the last error wrapped in [`Error::StepFailed`]
    /// once every attempt is used up. Fatal errors are returned unwrapped.
    pub async fn run<T, F, Fut>(&self, name: &str, policy: &StepPolicy, mut work: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(output) = self.replay(name).await? {
            info!(step = %name, instance = %self.instance_id, "Replayed step from journal");
            return Ok(output);
        }

        let attempts = policy.attempts.max(1);
        let t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let outcome = match timeout(policy.timeout, work()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::StepTimeout {
                    step: name.to_string(),
                    timeout_ms: policy.timeout.as_millis(),
                }),
            };

            match outcome {
                Ok(output) => {
                    self.record(name, serde_json::to_value(&output)?, attempt)
                        .await?;
                    info!(
                        step = %name,
                        attempt,
                        elapsed_ms = t0.elapsed().as_millis() as u64,
                        "Step complete"
                    );
                    return Ok(output);
                }
                Err(e) if e.is_fatal() => {
                    error!(step = %name, attempt, error = %e, "Step failed with a fatal error");
                    return Err(e);
                }
                Err(e) if attempt >= attempts => {
                    error!(
                        step = %name,
                        attempt,
                        elapsed_ms_total = t0.elapsed().as_millis() as u64,
                        error = %e,
                        "Step exhausted its attempts"
                    );
                    return Err(Error::StepFailed {
                        step: name.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = policy.jittered_delay_for(attempt);
                    warn!(
                        step = %name,
                        attempt,
                        max = attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "Step attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Durable sleep: once it has elapsed and been journaled, replays skip it.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<()> {
        if self.replay::<Value>(name).await?.is_some() {
            debug!(step = %name, "Sleep already elapsed");
            return Ok(());
        }
        debug!(step = %name, ?duration, "Sleeping");
        sleep(duration).await;
        self.record(name, Value::Null, 1).await
    }
}
