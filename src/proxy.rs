//! Page rendering through a reader proxy.
//!
//! Listing pages and articles are fetched through a third-party proxy that
//! runs the page's JavaScript and returns the rendered HTML (or readable
//! text). The proxy is driven entirely by request headers, which
//! [`RenderOptions`] models.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Header-level knobs understood by the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Ask for rendered HTML (`"html"`) instead of the default readable text.
    pub return_format: Option<String>,
    /// CSS selector stripped from the page before rendering.
    pub remove_selector: Option<String>,
    /// CSS selector the output is narrowed to.
    pub target_selector: Option<String>,
}

impl RenderOptions {
    pub fn html() -> Self {
        Self {
            return_format: Some("html".to_string()),
            ..Self::default()
        }
    }
}

/// Capability: fetch a URL's rendered page.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render `url` and return the body, or an error for a non-success status.
    async fn render(&self, url: &str, options: &RenderOptions) -> Result<String>;
}

/// [`PageRenderer`] backed by the Jina reader (`https://r.jina.ai/{url}`).
pub struct JinaReader {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl JinaReader {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn proxied(&self, url: &str) -> String {
        format!("{}/{}", self.base_url, url)
    }
}

impl std::fmt::Debug for JinaReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JinaReader")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl PageRenderer for JinaReader {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn render(&self, url: &str, options: &RenderOptions) -> Result<String> {
        let t0 = Instant::now();
        let mut request = self
            .client
            .get(self.proxied(url))
            .header("X-Retain-Images", "none");

        if let Some(format) = &options.return_format {
            request = request.header("X-Return-Format", format);
        }
        if let Some(selector) = &options.remove_selector {
            request = request.header("X-Remove-Selector", selector);
        }
        if let Some(selector) = &options.target_selector {
            request = request.header("X-Target-Selector", selector);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "proxy returned non-success status");
            return Err(Error::Upstream {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "rendered page"
        );
        Ok(body)
    }
}
