//! Content sources the podcast can be built from.
//!
//! Every source implements the same two operations behind [`SourceFetcher`]:
//!
//! 1. **Listing**: the day's top stories, in the page's ranking order
//! 2. **Content**: one story's article text plus its discussion thread
//!
//! Sources register under a key in a [`FetcherRegistry`]; the workflow only
//! ever looks fetchers up by key.
//!
//! # Supported Sources
//!
//! | Key | Module | Comments |
//! |-----|--------|----------|
//! | `hacker-news` | [`hacker_news`] | item page discussion |

use crate::error::{Error, Result};
use crate::models::Story;
use crate::proxy::{PageRenderer, RenderOptions};
use crate::utils::{CHARS_PER_TOKEN, truncate_chars};
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

pub mod hacker_news;

pub use hacker_news::HackerNews;

/// Separator placed between content sections and between story summaries.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Source key used when a run does not name one.
pub const DEFAULT_SOURCE: &str = hacker_news::SOURCE_KEY;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Key this fetcher is registered under.
    fn source(&self) -> &str;

    /// Top stories for `date`, in ranking order, with entries lacking an id
    /// or URL already removed.
    async fn list_top_stories(&self, date: &str) -> Result<Vec<Story>>;

    /// Readable content of one story, each section capped at
    /// `max_tokens * 4` characters. Failed fetches degrade to empty sections.
    async fn get_story_content(&self, story: &Story, max_tokens: usize) -> Result<String>;
}

/// A listing entry before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub id: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub source_url: Option<String>,
}

/// Turn parsed listing entries into stories.
///
/// Entries without an id or URL are dropped; a repeated id keeps its first
/// (highest-ranked) occurrence. Order is otherwise untouched.
pub fn into_stories(source: &str, candidates: Vec<Candidate>) -> Vec<Story> {
    candidates
        .into_iter()
        .filter_map(|c| {
            let id = c.id.filter(|id| !id.trim().is_empty())?;
            let url = c.url.filter(|url| !url.trim().is_empty())?;
            Some(Story {
                id,
                title: c.title.trim().to_string(),
                url,
                source: source.to_string(),
                source_url: c.source_url,
            })
        })
        .unique_by(|s| s.id.clone())
        .collect()
}

/// Assemble the content blob fed to the summarizer.
///
/// Sections are wrapped in `<title>`, `<article>` and `<comments>` tags and
/// joined with [`SECTION_SEPARATOR`]. Article and comments are each cut to
/// `max_tokens * 4` characters. When neither article nor comments could be
/// fetched the result is empty: a bare title is not worth summarizing.
pub fn compose_story_content(title: &str, article: &str, comments: &str, max_tokens: usize) -> String {
    if article.is_empty() && comments.is_empty() {
        return String::new();
    }

    let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut sections = Vec::with_capacity(3);
    if !title.is_empty() {
        sections.push(format!("\n<title>\n{title}\n</title>\n"));
    }
    if !article.is_empty() {
        sections.push(format!(
            "\n<article>\n{}\n</article>\n",
            truncate_chars(article, budget)
        ));
    }
    if !comments.is_empty() {
        sections.push(format!(
            "\n<comments>\n{}\n</comments>\n",
            truncate_chars(comments, budget)
        ));
    }
    sections.join(SECTION_SEPARATOR)
}

/// Render one page, turning any failure into an empty section.
#[instrument(level = "info", skip_all, fields(%url, %what))]
pub async fn render_or_empty(
    renderer: &dyn PageRenderer,
    url: &str,
    options: &RenderOptions,
    what: &str,
) -> String {
    match renderer.render(url, options).await {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "fetch failed; continuing with an empty section");
            String::new()
        }
    }
}

/// Fetch a story's article and (optionally) its discussion concurrently and
/// compose the content blob.
pub async fn fetch_story_sections(
    renderer: &dyn PageRenderer,
    story: &Story,
    discussion: Option<(&str, &RenderOptions)>,
    max_tokens: usize,
) -> String {
    let article_opts = RenderOptions::default();
    let article = render_or_empty(renderer, &story.url, &article_opts, "article");
    let comments = async {
        match discussion {
            Some((url, opts)) => render_or_empty(renderer, url, opts, "comments").await,
            None => String::new(),
        }
    };

    let (article, comments) = tokio::join!(article, comments);
    info!(
        id = %story.id,
        article_bytes = article.len(),
        comment_bytes = comments.len(),
        "Fetched story sections"
    );
    compose_story_content(&story.title, &article, &comments, max_tokens)
}

/// Source key to fetcher lookup table.
#[derive(Default, Clone)]
pub struct FetcherRegistry {
    fetchers: BTreeMap<String, Arc<dyn SourceFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in source rendering through `renderer`.
    pub fn with_defaults(renderer: Arc<dyn PageRenderer>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HackerNews::new(renderer)));
        registry
    }

    pub fn register(&mut self, fetcher: Arc<dyn SourceFetcher>) {
        self.fetchers.insert(fetcher.source().to_string(), fetcher);
    }

    /// Look up a fetcher; an unknown key is a configuration error.
    pub fn get(&self, source: &str) -> Result<Arc<dyn SourceFetcher>> {
        self.fetchers.get(source).cloned().ok_or_else(|| {
            warn!(%source, available = ?self.keys(), "No fetcher registered");
            Error::UnknownSource(source.to_string())
        })
    }

    pub fn keys(&self) -> Vec<&str> {
        self.fetchers.keys().map(String::as_str).collect()
    }
}
