//! Error taxonomy for the podcast pipeline.
//!
//! Errors fall into two groups. Fatal errors (bad configuration, an unknown
//! source, an empty front page) end a run immediately and are never retried.
//! Everything else is treated as transient and handed to the retry policy of
//! the step that produced it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no fetcher found for source: {0}")]
    UnknownSource(String),

    #[error("no stories found for {source_key} on {date}")]
    NoStories { source_key: String, date: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status} for {url}")]
    Upstream { status: u16, url: String },

    #[error("completion error: {0}")]
    Completion(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("stored blob {key} is {actual:?} bytes, expected at least {expected}")]
    WriteVerification {
        key: String,
        expected: u64,
        actual: Option<u64>,
    },

    #[error("step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u128 },

    #[error("step '{step}' failed after {attempts} attempt(s): {source}")]
    StepFailed {
        step: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Fatal errors skip the retry policy and fail the run straight away.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Config(_) | Error::UnknownSource(_) | Error::NoStories { .. } => true,
            Error::StepFailed { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
