//! Data models shared by the fetchers, the workflow and the readers.
//!
//! - [`Story`]: one front-page entry, produced at listing time and never mutated
//! - [`RunRecord`]: the persisted result of one successful run
//! - [`RunParams`]: the `(date, source)` pair a run instance is bound to
//!
//! Persisted types serialize with camelCase field names so the JSON matches
//! what the page renderer reads.

use serde::{Deserialize, Serialize};

/// A single story from a source's front page.
///
/// Identity is `id` within one source and date. The order in which stories
/// are listed is the page's ranking and is kept all the way to the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Source key the story was listed from, e.g. `hacker-news`.
    pub source: String,
    /// Discussion page on the source site, when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// The complete output of one successful run.
///
/// Written once, after every upstream step has succeeded, so a reader either
/// sees all of these fields or none of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub date: String,
    pub title: String,
    pub source: String,
    pub stories: Vec<Story>,
    pub podcast_content: String,
    pub blog_content: String,
    pub intro_content: String,
    /// Blob key of the synthesized episode.
    pub audio: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

/// Input of one workflow run, resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParams {
    pub date: String,
    pub source: String,
}

/// Key of the Run Record for an environment, source and date.
pub fn content_key(env: &str, source: &str, date: &str) -> String {
    format!("content:{env}:{source}:{date}")
}

/// Blob key of the episode audio: `2025/01/31/production/hacker-news-2025-01-31.mp3`.
pub fn audio_key(env: &str, source: &str, date: &str) -> String {
    format!("{}/{env}/{source}-{date}.mp3", date.replace('-', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_story() -> Story {
        Story {
            id: "42".to_string(),
            title: "Show HN: A tiny database".to_string(),
            url: "https://example.com/db".to_string(),
            source: "hacker-news".to_string(),
            source_url: Some("https://news.ycombinator.com/item?id=42".to_string()),
        }
    }

    #[test]
    fn test_content_key() {
        assert_eq!(
            content_key("production", "hacker-news", "2025-05-06"),
            "content:production:hacker-news:2025-05-06"
        );
    }

    #[test]
    fn test_audio_key() {
        assert_eq!(
            audio_key("development", "hacker-news", "2025-05-06"),
            "2025/05/06/development/hacker-news-2025-05-06.mp3"
        );
    }

    #[test]
    fn test_story_serializes_camel_case() {
        let json = serde_json::to_value(sample_story()).unwrap();
        assert_eq!(json["sourceUrl"], "https://news.ycombinator.com/item?id=42");
        assert!(json.get("source_url").is_none());
    }

    #[test]
    fn test_story_without_source_url() {
        let mut story = sample_story();
        story.source_url = None;
        let json = serde_json::to_string(&story).unwrap();
        assert!(!json.contains("sourceUrl"));

        let back: Story = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source_url, None);
    }

    #[test]
    fn test_run_record_field_names() {
        let record = RunRecord {
            date: "2025-05-06".to_string(),
            title: "Hacker News Daily 2025-05-06".to_string(),
            source: "hacker-news".to_string(),
            stories: vec![sample_story()],
            podcast_content: "script".to_string(),
            blog_content: "blog".to_string(),
            intro_content: "intro".to_string(),
            audio: audio_key("production", "hacker-news", "2025-05-06"),
            updated_at: 1_746_489_600_000,
        };

        let json = serde_json::to_value(&record).unwrap();
        for field in [
            "date",
            "title",
            "source",
            "stories",
            "podcastContent",
            "blogContent",
            "introContent",
            "audio",
            "updatedAt",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }
}
