//! The daily podcast pipeline.
//!
//! One run turns a `(date, source)` pair into a Run Record:
//!
//! ```text
//! get top stories
//!   └─ for each of the first `max_stories`, in listed order:
//!        get story {id} ─► summarize story {id} ─► pace
//! create podcast content ─► pace ─► create blog content ─► pace
//! create intro content
//! create podcast audio   (synthesize, upload, verify size)
//! save content to kv
//! ```
//!
//! Every box is a durable [`step`], so re-running an instance picks up at the
//! first step that has not completed. The record is written last; a failed
//! run leaves whatever record was there before untouched.

pub mod instances;
pub mod step;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::llm::{CompletionRequest, OpenAiCompatible, RetryCompletion, TextCompletion, generate};
use crate::models::{RunParams, RunRecord, Story, audio_key, content_key};
use crate::prompts::episode_title;
use crate::proxy::JinaReader;
use crate::sources::{FetcherRegistry, SECTION_SEPARATOR};
use crate::storage::{BlobStore, FsBlobStore, FsKvStore, KvStore, MemoryBlobStore, MemoryKvStore};
use crate::tts::{AzureSpeech, SpeechSynthesizer};
use crate::utils::{truncate_for_log, validate_date};
use chrono::Utc;
use instances::{InstanceStatus, Instances, Status, new_instance_id};
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use step::Steps;
use tracing::{error, info, instrument};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Orchestrates one fixed pipeline over pluggable capabilities.
pub struct PodcastWorkflow {
    settings: Arc<Settings>,
    fetchers: Arc<FetcherRegistry>,
    llm: Arc<dyn TextCompletion>,
    aggregate_llm: RetryCompletion<Arc<dyn TextCompletion>>,
    tts: Arc<dyn SpeechSynthesizer>,
    kv: Arc<dyn KvStore>,
    blobs: Arc<dyn BlobStore>,
    instances: Instances,
}

impl PodcastWorkflow {
    pub fn new(
        settings: Arc<Settings>,
        fetchers: Arc<FetcherRegistry>,
        llm: Arc<dyn TextCompletion>,
        tts: Arc<dyn SpeechSynthesizer>,
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let aggregate_llm = RetryCompletion::new(
            Arc::clone(&llm),
            settings.workflow.completion_retries,
            settings.workflow.completion_delay,
        );
        Self {
            instances: Instances::new(Arc::clone(&kv)),
            settings,
            fetchers,
            llm,
            aggregate_llm,
            tts,
            kv,
            blobs,
        }
    }

    /// Build the workflow with the HTTP adapters and filesystem storage.
    ///
    /// Fails with a configuration error when completion or speech
    /// credentials are missing.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let kv = Arc::new(FsKvStore::new(&settings.data_dir));
        let blobs = Arc::new(FsBlobStore::new(&settings.data_dir));
        Self::with_storage(settings, kv, blobs)
    }

    /// Like [`PodcastWorkflow::from_settings`] with in-memory storage, for
    /// runs that should not publish anything.
    pub fn dry_run(settings: Settings) -> Result<Self> {
        Self::with_storage(
            settings,
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
    }

    fn with_storage(
        settings: Settings,
        kv: Arc<dyn KvStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        settings.require_llm()?;
        settings.require_speech()?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(20))
            .build()?;

        let renderer = Arc::new(JinaReader::new(
            client.clone(),
            settings.proxy.base_url.clone(),
            settings.proxy.api_key.clone(),
        ));
        let llm = Arc::new(OpenAiCompatible::new(
            client.clone(),
            settings.llm.base_url.clone(),
            settings.llm.api_key.clone(),
            settings.llm.model.clone(),
        ));
        let tts = Arc::new(AzureSpeech::new(
            client,
            settings.speech.endpoint.clone(),
            settings.speech.api_key.clone(),
            settings.speech.output_format.clone(),
            settings.speech.max_chunk_chars,
        ));

        Ok(Self::new(
            Arc::new(settings),
            Arc::new(FetcherRegistry::with_defaults(renderer)),
            llm,
            tts,
            kv,
            blobs,
        ))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn instances(&self) -> &Instances {
        &self.instances
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    /// Params for a run of `date`, falling back to the default source.
    pub fn params(&self, date: String, source: Option<String>) -> RunParams {
        RunParams {
            date,
            source: source.unwrap_or_else(|| self.settings.default_source.clone()),
        }
    }

    /// Queue an instance and run it to completion.
    pub async fn run(&self, params: RunParams, instance_id: Option<String>) -> Result<RunRecord> {
        let id = instance_id.unwrap_or_else(|| new_instance_id(&params));
        self.instances.create(&id, &params).await?;
        self.execute(&id, &params).await
    }

    /// Queue an instance and run it on a background task.
    pub async fn start(self: &Arc<Self>, params: RunParams) -> Result<InstanceStatus> {
        let id = new_instance_id(&params);
        let status = self.instances.create(&id, &params).await?;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.execute(&id, &params).await {
                error!(instance = %id, error = %e, "Background run ended with an error");
            }
        });
        Ok(status)
    }

    /// Run an existing instance again; completed steps are replayed.
    pub async fn resume(&self, instance_id: &str) -> Result<RunRecord> {
        let status = self
            .instances
            .get(instance_id)
            .await?
            .ok_or_else(|| Error::Config(format!("unknown instance: {instance_id}")))?;
        info!(instance = %instance_id, previous = ?status.status, "Resuming instance");
        self.execute(instance_id, &status.params).await
    }

    async fn execute(&self, id: &str, params: &RunParams) -> Result<RunRecord> {
        self.instances.update(id, Status::Running, None).await?;
        let steps = Steps::new(id, Arc::clone(&self.kv));

        match self.pipeline(&steps, params).await {
            Ok(record) => {
                self.instances.update(id, Status::Complete, None).await?;
                Ok(record)
            }
            Err(e) => {
                error!(instance = %id, error = %e, "Run failed");
                self.instances
                    .update(id, Status::Errored, Some(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    /// Full text in development, a prefix otherwise.
    fn preview(&self, text: &str) -> String {
        if self.settings.is_dev() {
            text.to_string()
        } else {
            truncate_for_log(text, 100)
        }
    }

    async fn complete_text(
        &self,
        client: &dyn TextCompletion,
        label: &str,
        system: &str,
        prompt: &str,
        max_tokens: Option<usize>,
    ) -> Result<String> {
        let request = CompletionRequest::new(system, prompt);
        let request = match max_tokens {
            Some(max_tokens) => request.with_max_tokens(max_tokens),
            None => request,
        };
        let completion = generate(client, label, &request).await?;
        info!(%label, text = %self.preview(&completion.text), "Completion text");
        Ok(completion.text)
    }

    /// Synthesize the script, upload it and confirm the stored size.
    async fn create_audio(&self, script: &str, key: &str) -> Result<u64> {
        let audio = self
            .tts
            .synthesize(script, &self.settings.speech.voice_params())
            .await?;
        let expected = audio.len() as u64;

        self.blobs.put(key, &audio).await?;
        match self.blobs.head(key).await? {
            Some(meta) if meta.size >= expected => Ok(expected),
            other => Err(Error::WriteVerification {
                key: key.to_string(),
                expected,
                actual: other.map(|m| m.size),
            }),
        }
    }

    async fn save_record(&self, key: &str, mut record: RunRecord) -> Result<RunRecord> {
        record.updated_at = Utc::now().timestamp_millis();
        self.kv.put(key, &serde_json::to_value(&record)?).await?;
        Ok(record)
    }

    #[instrument(level = "info", skip_all, fields(instance = %steps.instance_id(), source = %params.source, date = %params.date))]
    async fn pipeline(&self, steps: &Steps, params: &RunParams) -> Result<RunRecord> {
        let t0 = Instant::now();
        let date = params.date.as_str();
        let source = params.source.as_str();
        validate_date(date)?;
        let fetcher = self.fetchers.get(source)?;
        let fetcher = fetcher.as_ref();

        let settings = &self.settings;
        let env = settings.run_env.as_str();
        let policy = &settings.workflow.retry;
        let pacing = settings.pacing();
        let max_tokens = settings.llm.max_tokens;
        let prompts = &settings.prompts;

        let stories: Vec<Story> = steps
            .run("get top stories", policy, || fetcher.list_top_stories(date))
            .await?;
        if stories.is_empty() {
            return Err(Error::NoStories {
                source_key: source.to_string(),
                date: date.to_string(),
            });
        }
        let listed = stories.len();
        let stories: Vec<Story> = stories.into_iter().take(settings.max_stories).collect();
        if self.settings.is_dev() {
            info!(listed, kept = stories.len(), ?stories, "Top stories");
        } else {
            info!(listed, kept = stories.len(), stories = %serde_json::to_string(&stories)?, "Top stories");
        }

        let mut summaries = Vec::with_capacity(stories.len());
        for story in &stories {
            let content: String = steps
                .run(&format!("get story {}", story.id), policy, || {
                    fetcher.get_story_content(story, max_tokens)
                })
                .await?;
            info!(id = %story.id, bytes = content.len(), "Fetched story content");

            let label = format!("story {} summary", story.id);
            let summary: String = steps
                .run(&format!("summarize story {}", story.id), policy, || {
                    self.complete_text(
                        self.llm.as_ref(),
                        &label,
                        &prompts.summarize_story,
                        &content,
                        None,
                    )
                })
                .await?;
            summaries.push(summary);

            steps
                .sleep(&format!("pace after story {}", story.id), pacing)
                .await?;
        }

        let digest = summaries.join(SECTION_SEPARATOR);
        let podcast_label = format!("{source} podcast content");
        let blog_label = format!("{source} blog content");

        let podcast_content: String = steps
            .run("create podcast content", policy, || {
                self.complete_text(
                    &self.aggregate_llm,
                    &podcast_label,
                    &prompts.summarize_podcast,
                    &digest,
                    Some(max_tokens),
                )
            })
            .await?;
        steps.sleep("pace after podcast content", pacing).await?;

        let blog_content: String = steps
            .run("create blog content", policy, || {
                self.complete_text(
                    &self.aggregate_llm,
                    &blog_label,
                    &prompts.summarize_blog,
                    &digest,
                    Some(max_tokens),
                )
            })
            .await?;
        steps.sleep("pace after blog content", pacing).await?;

        let intro_content: String = steps
            .run("create intro content", policy, || {
                self.complete_text(
                    &self.aggregate_llm,
                    "intro content",
                    &prompts.intro,
                    &podcast_content,
                    None,
                )
            })
            .await?;

        let audio = audio_key(env, source, date);
        let audio_bytes: u64 = steps
            .run("create podcast audio", &settings.audio_policy(), || {
                self.create_audio(&podcast_content, &audio)
            })
            .await?;
        info!(key = %audio, bytes = audio_bytes, "Stored podcast audio");

        let key = content_key(env, source, date);
        let draft = RunRecord {
            date: date.to_string(),
            title: episode_title(&settings.podcast_title, date),
            source: source.to_string(),
            stories,
            podcast_content,
            blog_content,
            intro_content,
            audio,
            updated_at: 0,
        };
        let record: RunRecord = steps
            .run("save content to kv", policy, || {
                self.save_record(&key, draft.clone())
            })
            .await?;

        info!(
            %key,
            stories = record.stories.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Saved run record"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::FlakyCompletion;
    use crate::sources::SourceFetcher;
    use crate::storage::BlobMeta;
    use crate::tts::VoiceParams;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use step::StepPolicy;

    const DATE: &str = "2025-05-06";

    /// Lists `count` stories; content fetches are recorded in order.
    /// Stories listed in `blank` have no readable content.
    struct FixedFetcher {
        count: usize,
        blank: Vec<String>,
        listings: AtomicUsize,
        fetched: Mutex<Vec<String>>,
    }

    impl FixedFetcher {
        fn new(count: usize) -> Self {
            Self {
                count,
                blank: Vec::new(),
                listings: AtomicUsize::new(0),
                fetched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SourceFetcher for FixedFetcher {
        fn source(&self) -> &str {
            "hacker-news"
        }

        async fn list_top_stories(&self, _date: &str) -> Result<Vec<Story>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            Ok((1..=self.count)
                .map(|i| Story {
                    id: i.to_string(),
                    title: format!("Story {i}"),
                    url: format!("https://example.com/{i}"),
                    source: "hacker-news".to_string(),
                    source_url: None,
                })
                .collect())
        }

        async fn get_story_content(&self, story: &Story, _max_tokens: usize) -> Result<String> {
            self.fetched.lock().unwrap().push(story.id.clone());
            if self.blank.contains(&story.id) {
                return Ok(String::new());
            }
            Ok(format!("content of {}", story.id))
        }
    }

    /// Returns a fixed buffer, counting calls.
    struct FakeSpeech {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(&self, text: &str, _voice: &VoiceParams) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(text.as_bytes().to_vec())
        }
    }

    /// Stores only half of each upload for the first `short_writes` puts.
    struct TruncatingBlobs {
        inner: MemoryBlobStore,
        short_writes: usize,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for TruncatingBlobs {
        async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
            let n = self.puts.fetch_add(1, Ordering::SeqCst);
            let bytes = if n < self.short_writes {
                &bytes[..bytes.len() / 2]
            } else {
                bytes
            };
            self.inner.put(key, bytes).await
        }

        async fn head(&self, key: &str) -> Result<Option<BlobMeta>> {
            self.inner.head(key).await
        }
    }

    struct Harness {
        workflow: PodcastWorkflow,
        fetcher: Arc<FixedFetcher>,
        llm: Arc<FlakyCompletion>,
        tts: Arc<FakeSpeech>,
        kv: Arc<MemoryKvStore>,
        blobs: Arc<TruncatingBlobs>,
    }

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.run_env = "development".to_string();
        settings.workflow.retry = StepPolicy {
            delay: Duration::ZERO,
            ..StepPolicy::default()
        };
        settings.workflow.pacing = Some(Duration::ZERO);
        settings.workflow.completion_delay = Duration::ZERO;
        settings
    }

    fn harness(stories: usize, llm_failures: usize, short_writes: usize) -> Harness {
        harness_with(FixedFetcher::new(stories), llm_failures, short_writes)
    }

    fn harness_with(fetcher: FixedFetcher, llm_failures: usize, short_writes: usize) -> Harness {
        let fetcher = Arc::new(fetcher);
        let mut registry = FetcherRegistry::new();
        registry.register(fetcher.clone());

        let llm = Arc::new(FlakyCompletion::new(llm_failures));
        let tts = Arc::new(FakeSpeech {
            calls: AtomicUsize::new(0),
        });
        let kv = Arc::new(MemoryKvStore::new());
        let blobs = Arc::new(TruncatingBlobs {
            inner: MemoryBlobStore::new(),
            short_writes,
            puts: AtomicUsize::new(0),
        });

        let workflow = PodcastWorkflow::new(
            Arc::new(test_settings()),
            Arc::new(registry),
            llm.clone(),
            tts.clone(),
            kv.clone(),
            blobs.clone(),
        );
        Harness {
            workflow,
            fetcher,
            llm,
            tts,
            kv,
            blobs,
        }
    }

    fn params() -> RunParams {
        RunParams {
            date: DATE.to_string(),
            source: "hacker-news".to_string(),
        }
    }

    #[tokio::test]
    async fn test_twelve_stories_processes_first_ten_in_order() {
        let h = harness(12, 0, 0);
        let record = h.workflow.run(params(), None).await.unwrap();

        let expected: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
        assert_eq!(*h.fetcher.fetched.lock().unwrap(), expected);
        assert_eq!(record.stories.len(), 10);
        assert_eq!(record.stories[0].id, "1");
        assert_eq!(record.stories[9].id, "10");
        assert_eq!(record.date, DATE);
        assert_eq!(record.title, "Hacker News Daily 2025-05-06");

        let seen = h.llm.seen.lock().unwrap();
        // 10 stories, podcast, blog, intro
        assert_eq!(seen.len(), 13);
        let prompts = &h.workflow.settings().prompts;
        let digest = &seen[10];
        assert_eq!(digest.system, prompts.summarize_podcast);
        assert_eq!(digest.max_tokens, Some(4096));
        let parts: Vec<&str> = digest.prompt.split(SECTION_SEPARATOR).collect();
        assert_eq!(parts.len(), 10);
        assert_eq!(
            parts[0],
            format!("[{}] content of 1", prompts.summarize_story)
        );
        assert_eq!(seen[11].system, prompts.summarize_blog);
        assert_eq!(seen[11].prompt, digest.prompt);
        assert_eq!(seen[12].system, prompts.intro);
        assert_eq!(seen[12].prompt, record.podcast_content);
        assert_eq!(seen[0].max_tokens, None);
    }

    #[tokio::test]
    async fn test_record_and_audio_are_persisted() {
        let h = harness(3, 0, 0);
        let record = h.workflow.run(params(), None).await.unwrap();

        let key = "content:development:hacker-news:2025-05-06";
        let stored: RunRecord =
            serde_json::from_value(h.kv.get(key).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.audio, "2025/05/06/development/hacker-news-2025-05-06.mp3");
        assert!(stored.updated_at > 0);
        assert!(!stored.blog_content.is_empty());
        assert!(!stored.intro_content.is_empty());

        let audio = h.blobs.inner.bytes(&stored.audio).await.unwrap();
        assert_eq!(audio, stored.podcast_content.as_bytes());
    }

    #[tokio::test]
    async fn test_zero_stories_fails_before_any_downstream_call() {
        let h = harness(0, 0, 0);
        let err = h.workflow.run(params(), Some("empty".to_string())).await.unwrap_err();

        assert!(matches!(err, Error::NoStories { .. }));
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.tts.calls.load(Ordering::SeqCst), 0);
        assert!(
            h.kv.list("content:").await.unwrap().is_empty(),
            "no record may be written"
        );
        let status = h.workflow.instances().get("empty").await.unwrap().unwrap();
        assert_eq!(status.status, Status::Errored);
    }

    #[tokio::test]
    async fn test_unknown_source_is_fatal() {
        let h = harness(3, 0, 0);
        let mut p = params();
        p.source = "lobsters".to_string();
        let err = h.workflow.run(p, None).await.unwrap_err();

        assert!(matches!(err, Error::UnknownSource(_)));
        assert_eq!(h.fetcher.listings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_date_is_fatal() {
        let h = harness(3, 0, 0);
        let mut p = params();
        p.date = "yesterday".to_string();
        let err = h.workflow.run(p, None).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_truncated_upload_is_retried() {
        let h = harness(2, 0, 2);
        let record = h.workflow.run(params(), None).await.unwrap();

        assert_eq!(h.tts.calls.load(Ordering::SeqCst), 3);
        let meta = h.blobs.head(&record.audio).await.unwrap().unwrap();
        assert_eq!(meta.size, record.podcast_content.len() as u64);
    }

    #[tokio::test]
    async fn test_persistent_truncation_fails_without_record() {
        let h = harness(2, 0, usize::MAX);
        let err = h.workflow.run(params(), None).await.unwrap_err();

        match err {
            Error::StepFailed { step, attempts, source } => {
                assert_eq!(step, "create podcast audio");
                assert_eq!(attempts, 5);
                assert!(matches!(*source, Error::WriteVerification { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(h.kv.list("content:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_steps() {
        // The first five uploads are truncated, so the first run dies in the audio step.
        let h = harness(2, 0, 5);
        let id = "hacker-news-2025-05-06-deadbeef".to_string();
        assert!(h.workflow.run(params(), Some(id.clone())).await.is_err());
        let llm_calls = h.llm.calls.load(Ordering::SeqCst);
        assert_eq!(llm_calls, 5);

        let record = h.workflow.resume(&id).await.unwrap();
        assert_eq!(record.stories.len(), 2);
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), llm_calls);
        assert_eq!(h.fetcher.listings.load(Ordering::SeqCst), 1);
        assert_eq!(h.fetcher.fetched.lock().unwrap().len(), 2);

        let status = h.workflow.instances().get(&id).await.unwrap().unwrap();
        assert_eq!(status.status, Status::Complete);
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn test_transient_completion_errors_are_retried() {
        // The per-story call has no client retries; its step absorbs the failures.
        let h = harness(1, 2, 0);
        let record = h.workflow.run(params(), None).await.unwrap();
        assert_eq!(record.stories.len(), 1);
        // 2 failures + story summary + podcast + blog + intro
        assert_eq!(h.llm.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_rerun_overwrites_record() {
        let h = harness(1, 0, 0);
        let first = h.workflow.run(params(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = h.workflow.run(params(), None).await.unwrap();

        assert!(second.updated_at >= first.updated_at);
        let keys = h.kv.list("content:").await.unwrap();
        assert_eq!(keys.len(), 1);
        let stored: RunRecord =
            serde_json::from_value(h.kv.get(&keys[0]).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored, second);
    }

    #[tokio::test]
    async fn test_story_without_content_is_still_summarized() {
        let mut fetcher = FixedFetcher::new(3);
        fetcher.blank = vec!["2".to_string()];
        let h = harness_with(fetcher, 0, 0);
        let record = h.workflow.run(params(), None).await.unwrap();

        assert_eq!(record.stories.len(), 3);
        let seen = h.llm.seen.lock().unwrap();
        // 3 stories, podcast, blog, intro
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[1].prompt, "");
        assert_eq!(seen[1].system, h.workflow.settings().prompts.summarize_story);
        assert_eq!(seen[2].prompt, "content of 3");

        let stored = h
            .kv
            .get("content:development:hacker-news:2025-05-06")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["stories"].as_array().unwrap().len(), 3);
        assert!(!stored["introContent"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reused_instance_id_with_other_date_is_rejected() {
        let h = harness(1, 0, 0);
        let first = h
            .workflow
            .run(params(), Some("shared".to_string()))
            .await
            .unwrap();
        assert_eq!(first.date, DATE);

        let mut next = params();
        next.date = "2025-05-07".to_string();
        let err = h
            .workflow
            .run(next, Some("shared".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let keys = h.kv.list("content:").await.unwrap();
        assert_eq!(keys, vec!["content:development:hacker-news:2025-05-06"]);
        let status = h.workflow.instances().get("shared").await.unwrap().unwrap();
        assert_eq!(status.status, Status::Complete);
        assert_eq!(status.params.date, DATE);
    }

    #[tokio::test]
    async fn test_start_records_background_failure() {
        let h = harness(0, 0, 0);
        let workflow = Arc::new(h.workflow);
        let status = workflow.start(params()).await.unwrap();
        assert_eq!(status.status, Status::Queued);

        let mut failed = None;
        for _ in 0..200 {
            let current = workflow.instances().get(&status.id).await.unwrap().unwrap();
            if current.status == Status::Errored {
                failed = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let failed = failed.expect("background run did not fail");
        assert!(failed.error.unwrap().contains("2025-05-06"));
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let h = harness(1, 0, 0);
        let workflow = Arc::new(h.workflow);
        let status = workflow.start(params()).await.unwrap();
        assert!(status.id.starts_with("hacker-news-2025-05-06-"));

        let mut done = None;
        for _ in 0..200 {
            let current = workflow.instances().get(&status.id).await.unwrap().unwrap();
            if current.status == Status::Complete {
                done = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done.is_some(), "background run did not complete");
    }
}
