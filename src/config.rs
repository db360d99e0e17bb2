//! Runtime configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. An optional YAML file (`--config`)
//! 3. Process environment, after `.env` in the working directory is loaded
//!
//! # Example
//!
//! ```yaml
//! run_env: development
//! max_stories: 10
//! llm:
//!   base_url: https://api.openai.com/v1
//!   model: gpt-4o-mini
//! workflow:
//!   retry:
//!     attempts: 5
//!     delay: 10 seconds
//!     backoff: exponential
//!     timeout: 3 minutes
//!   audio_timeout: 5 minutes
//! ```

use crate::error::{Error, Result};
use crate::prompts::{DEFAULT_PODCAST_TITLE, Prompts};
use crate::sources::DEFAULT_SOURCE;
use crate::tts::VoiceParams;
use crate::utils::{de_duration, de_opt_duration, parse_duration};
use crate::workflow::step::StepPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEVELOPMENT: &str = "development";
pub const PRODUCTION: &str = "production";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Token budget for aggregate calls; also sizes story content sections.
    pub max_tokens: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            base_url: "https://r.jina.ai".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub endpoint: String,
    pub api_key: String,
    pub language: String,
    pub voice: String,
    pub rate: String,
    pub output_format: String,
    pub max_chunk_chars: usize,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        let voice = VoiceParams::default();
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            language: voice.language,
            voice: voice.voice,
            rate: voice.rate,
            output_format: "audio-24khz-48kbitrate-mono-mp3".to_string(),
            max_chunk_chars: 3_000,
        }
    }
}

impl SpeechSettings {
    pub fn voice_params(&self) -> VoiceParams {
        VoiceParams {
            language: self.language.clone(),
            voice: self.voice.clone(),
            rate: self.rate.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Policy applied to every step.
    pub retry: StepPolicy,
    /// Per-attempt limit of the audio step.
    #[serde(deserialize_with = "de_duration")]
    pub audio_timeout: Duration,
    /// Delay between calls to the completion endpoint. Unset means 2 s in
    /// development and 10 s otherwise.
    #[serde(deserialize_with = "de_opt_duration")]
    pub pacing: Option<Duration>,
    /// Retries inside one aggregate completion call.
    pub completion_retries: usize,
    #[serde(deserialize_with = "de_duration")]
    pub completion_delay: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            retry: StepPolicy::default(),
            audio_timeout: Duration::from_secs(5 * 60),
            pacing: None,
            completion_retries: 3,
            completion_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `development` or `production`; part of every storage key.
    pub run_env: String,
    pub podcast_title: String,
    pub default_source: String,
    pub data_dir: PathBuf,
    pub max_stories: usize,
    /// Days of history served by `history` and `/records`.
    pub keep_days: u32,
    pub llm: LlmSettings,
    pub proxy: ProxySettings,
    pub speech: SpeechSettings,
    pub workflow: WorkflowSettings,
    pub prompts: Prompts,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run_env: PRODUCTION.to_string(),
            podcast_title: DEFAULT_PODCAST_TITLE.to_string(),
            default_source: DEFAULT_SOURCE.to_string(),
            data_dir: PathBuf::from("data"),
            max_stories: 10,
            keep_days: 7,
            llm: LlmSettings::default(),
            proxy: ProxySettings::default(),
            speech: SpeechSettings::default(),
            workflow: WorkflowSettings::default(),
            prompts: Prompts::default(),
        }
    }
}

fn require<'a>(value: &'a str, name: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        Err(Error::Config(format!("{name} is not set")))
    } else {
        Ok(value)
    }
}

impl Settings {
    /// Load `.env`, the optional YAML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(p) => debug!(path = %p.display(), "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(Error::Config(format!(".env: {e}"))),
        }

        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                let settings: Settings = serde_yaml::from_str(&raw)?;
                info!(config_path = %path.display(), "Loaded configuration");
                settings
            }
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Override fields from environment variables; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("PODCAST_ENV") {
            self.run_env = v;
        }
        if let Some(v) = var("PODCAST_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = var("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = var("OPENAI_MAX_TOKENS") {
            self.llm.max_tokens = v
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("OPENAI_MAX_TOKENS is not a number: {v:?}")))?;
        }
        if let Some(v) = var("JINA_KEY") {
            self.proxy.api_key = Some(v);
        }
        if let Some(v) = var("AUDIO_VOICE_ID") {
            self.speech.voice = v;
        }
        if let Some(v) = var("AUDIO_SPEED") {
            self.speech.rate = v;
        }
        if let Some(v) = var("SPEECH_ENDPOINT") {
            self.speech.endpoint = v;
        }
        if let Some(v) = var("SPEECH_API_KEY") {
            self.speech.api_key = v;
        }
        if let Some(v) = var("PODCAST_PACING") {
            self.workflow.pacing = Some(parse_duration(&v)?);
        }
        Ok(())
    }

    pub fn is_dev(&self) -> bool {
        self.run_env == DEVELOPMENT
    }

    /// Delay between completion calls.
    pub fn pacing(&self) -> Duration {
        self.workflow.pacing.unwrap_or(if self.is_dev() {
            Duration::from_secs(2)
        } else {
            Duration::from_secs(10)
        })
    }

    pub fn audio_policy(&self) -> StepPolicy {
        self.workflow.retry.with_timeout(self.workflow.audio_timeout)
    }

    /// Check the completion endpoint settings are present.
    pub fn require_llm(&self) -> Result<()> {
        require(&self.llm.base_url, "OPENAI_BASE_URL")?;
        require(&self.llm.api_key, "OPENAI_API_KEY")?;
        require(&self.llm.model, "OPENAI_MODEL")?;
        if self.llm.max_tokens == 0 {
            return Err(Error::Config("OPENAI_MAX_TOKENS must be positive".to_string()));
        }
        Ok(())
    }

    /// Check the speech endpoint settings are present.
    pub fn require_speech(&self) -> Result<()> {
        require(&self.speech.endpoint, "SPEECH_ENDPOINT")?;
        require(&self.speech.api_key, "SPEECH_API_KEY")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::step::Backoff;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.run_env, "production");
        assert_eq!(s.max_stories, 10);
        assert_eq!(s.keep_days, 7);
        assert_eq!(s.llm.max_tokens, 4096);
        assert_eq!(s.speech.voice, "zh-CN-XiaoxiaoNeural");
        assert_eq!(s.speech.rate, "10%");
        assert_eq!(s.workflow.retry.attempts, 5);
        assert_eq!(s.workflow.retry.delay, Duration::from_secs(10));
        assert_eq!(s.workflow.retry.timeout, Duration::from_secs(180));
        assert_eq!(s.audio_policy().timeout, Duration::from_secs(300));
        assert_eq!(s.workflow.completion_retries, 3);
    }

    #[test]
    fn test_pacing_depends_on_env() {
        let mut s = Settings::default();
        assert_eq!(s.pacing(), Duration::from_secs(10));
        s.run_env = DEVELOPMENT.to_string();
        assert_eq!(s.pacing(), Duration::from_secs(2));
        s.workflow.pacing = Some(Duration::ZERO);
        assert_eq!(s.pacing(), Duration::ZERO);
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
run_env: development
podcast_title: Daily Digest
llm:
  model: gpt-4o-mini
workflow:
  retry:
    attempts: 3
    backoff: constant
  audio_timeout: 10m
  pacing: 500ms
prompts:
  intro: Keep it short.
"#;
        let s: Settings = serde_yaml::from_str(yaml).unwrap();
        assert!(s.is_dev());
        assert_eq!(s.podcast_title, "Daily Digest");
        assert_eq!(s.llm.model, "gpt-4o-mini");
        assert_eq!(s.llm.max_tokens, 4096);
        assert_eq!(s.workflow.retry.attempts, 3);
        assert_eq!(s.workflow.retry.backoff, Backoff::Constant);
        assert_eq!(s.workflow.retry.delay, Duration::from_secs(10));
        assert_eq!(s.workflow.audio_timeout, Duration::from_secs(600));
        assert_eq!(s.pacing(), Duration::from_millis(500));
        assert_eq!(s.prompts.intro, "Keep it short.");
        assert!(!s.prompts.summarize_story.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut s = Settings::default();
        s.apply_env(env(&[
            ("PODCAST_ENV", "development"),
            ("OPENAI_BASE_URL", "https://llm.example/v1"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "m"),
            ("OPENAI_MAX_TOKENS", "2048"),
            ("JINA_KEY", "jina"),
            ("AUDIO_VOICE_ID", "zh-CN-YunxiNeural"),
            ("AUDIO_SPEED", "-5%"),
            ("PODCAST_DATA_DIR", "/var/lib/podcast"),
        ]))
        .unwrap();

        assert!(s.is_dev());
        assert_eq!(s.llm.max_tokens, 2048);
        assert_eq!(s.proxy.api_key.as_deref(), Some("jina"));
        assert_eq!(s.speech.voice_params().voice, "zh-CN-YunxiNeural");
        assert_eq!(s.speech.voice_params().rate, "-5%");
        assert_eq!(s.data_dir, PathBuf::from("/var/lib/podcast"));
        assert!(s.require_llm().is_ok());
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut s = Settings::default();
        s.apply_env(env(&[("JINA_KEY", ""), ("PODCAST_ENV", "  ")]))
            .unwrap();
        assert_eq!(s.proxy.api_key, None);
        assert_eq!(s.run_env, "production");
    }

    #[test]
    fn test_bad_max_tokens_is_config_error() {
        let mut s = Settings::default();
        let err = s
            .apply_env(env(&[("OPENAI_MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_credentials() {
        let s = Settings::default();
        let err = s.require_llm().unwrap_err();
        assert!(err.to_string().contains("OPENAI_BASE_URL"));
        assert!(s.require_speech().is_err());
    }
}
