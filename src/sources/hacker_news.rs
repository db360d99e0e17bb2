//! Hacker News front page fetcher.
//!
//! The day's front page lives at `https://news.ycombinator.com/front?day=YYYY-MM-DD`.
//! It is rendered through the proxy as HTML and parsed with `scraper`: every
//! `.athing.submission` row carries the item id, and its `.titleline > a`
//! link carries the title and target URL.
//!
//! Discussion threads are read from the item page, narrowed to the comment
//! tree with proxy selectors.

use super::{Candidate, SourceFetcher, fetch_story_sections, into_stories};
use crate::error::Result;
use crate::models::Story;
use crate::proxy::{PageRenderer, RenderOptions};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use url::Url;

pub const SOURCE_KEY: &str = "hacker-news";

const SITE_ROOT: &str = "https://news.ycombinator.com/";

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".athing.submission").expect("valid selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".titleline > a").expect("valid selector"));

pub struct HackerNews {
    renderer: Arc<dyn PageRenderer>,
}

impl HackerNews {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }

    fn front_url(date: &str) -> String {
        format!("{SITE_ROOT}front?day={date}")
    }

    fn item_url(id: &str) -> String {
        format!("{SITE_ROOT}item?id={id}")
    }

    fn comment_options() -> RenderOptions {
        RenderOptions {
            remove_selector: Some(".navs".to_string()),
            target_selector: Some("#pagespace + tr".to_string()),
            ..RenderOptions::default()
        }
    }
}

/// Parse front page rows into listing candidates, in page order.
///
/// Relative links (Ask HN, Show HN text posts) are resolved against the site
/// root.
pub fn parse_front_page(html: &str) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let root = Url::parse(SITE_ROOT).ok();

    document
        .select(&ROW_SELECTOR)
        .map(|row| {
            let id = row.value().attr("id").map(str::to_string);
            let link = row.select(&TITLE_SELECTOR).next();
            let title = link
                .map(|a| a.text().collect::<String>())
                .unwrap_or_default();
            let url = link.and_then(|a| a.value().attr("href")).map(|href| {
                root.as_ref()
                    .and_then(|base| base.join(href).ok())
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| href.to_string())
            });
            let source_url = id.as_deref().map(HackerNews::item_url);
            Candidate {
                id,
                title,
                url,
                source_url,
            }
        })
        .collect()
}

#[async_trait]
impl SourceFetcher for HackerNews {
    fn source(&self) -> &str {
        SOURCE_KEY
    }

    #[instrument(level = "info", skip_all, fields(%date))]
    async fn list_top_stories(&self, date: &str) -> Result<Vec<Story>> {
        let url = Self::front_url(date);
        info!(%url, "Fetching top stories");

        let html = self.renderer.render(&url, &RenderOptions::html()).await?;
        let candidates = parse_front_page(&html);
        let found = candidates.len();
        let stories = into_stories(SOURCE_KEY, candidates);

        info!(found, kept = stories.len(), "Parsed Hacker News front page");
        debug!(?stories, "Hacker News stories");
        Ok(stories)
    }

    #[instrument(level = "info", skip_all, fields(id = %story.id))]
    async fn get_story_content(&self, story: &Story, max_tokens: usize) -> Result<String> {
        let thread = story
            .source_url
            .clone()
            .unwrap_or_else(|| Self::item_url(&story.id));
        let options = Self::comment_options();

        Ok(fetch_story_sections(
            self.renderer.as_ref(),
            story,
            Some((thread.as_str(), &options)),
            max_tokens,
        )
        .await)
    }
}
