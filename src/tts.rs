//! Text-to-speech for the podcast script.
//!
//! [`AzureSpeech`] talks to the Azure Cognitive Services speech REST API,
//! which takes SSML and returns MP3. The request body is small XML: the
//! script is escaped with `quick-xml`, the voice is picked by name, and the
//! speaking rate goes into a `<prosody>` element.
//!
//! The service caps the length of one request, so long scripts are split
//! into chunks on paragraph and sentence boundaries. Each chunk is
//! synthesized in order and the MP3 streams are concatenated, which MP3
//! players handle frame by frame.

use crate::error::{Error, Result};
use async_trait::async_trait;
use quick_xml::escape::escape;
use reqwest::Client;
use std::fmt;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Voice selection for one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    /// BCP-47 language tag, e.g. `zh-CN`.
    pub language: String,
    /// Service voice name, e.g. `zh-CN-XiaoxiaoNeural`.
    pub voice: String,
    /// Relative speaking rate, e.g. `10%` or `-5%`.
    pub rate: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            language: "zh-CN".to_string(),
            voice: "zh-CN-XiaoxiaoNeural".to_string(),
            rate: "10%".to_string(),
        }
    }
}

/// Capability: turn text into audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>>;
}

/// Normalize a rate such as `10%` into the signed form SSML expects.
pub fn prosody_rate(rate: &str) -> String {
    let rate = rate.trim();
    if rate.is_empty() {
        "+0%".to_string()
    } else if rate.starts_with('+') || rate.starts_with('-') {
        rate.to_string()
    } else {
        format!("+{rate}")
    }
}

/// Build the SSML document for one chunk.
pub fn build_ssml(text: &str, voice: &VoiceParams) -> String {
    format!(
        "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" xml:lang=\"{lang}\">\
         <voice name=\"{name}\"><prosody rate=\"{rate}\">{text}</prosody></voice></speak>",
        lang = escape(voice.language.as_str()),
        name = escape(voice.voice.as_str()),
        rate = escape(prosody_rate(&voice.rate).as_str()),
        text = escape(text),
    )
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Paragraphs are kept whole where possible; an oversized paragraph is split
/// after sentence punctuation, and a sentence that still does not fit is cut
/// hard at the limit.
pub fn split_for_synthesis(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut pieces: Vec<String> = Vec::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() <= max_chars {
            pieces.push(paragraph.to_string());
            continue;
        }
        let mut sentence = String::new();
        for c in paragraph.chars() {
            sentence.push(c);
            if matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '\n') {
                pieces.push(std::mem::take(&mut sentence));
            }
        }
        if !sentence.is_empty() {
            pieces.push(sentence);
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let mut rest: Vec<char> = piece.chars().collect();
        while rest.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let tail = rest.split_off(max_chars);
            chunks.push(rest.into_iter().collect());
            rest = tail;
        }
        let piece: String = rest.into_iter().collect();

        let joined_len = current.chars().count() + piece.chars().count() + 2;
        if !current.is_empty() && joined_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// [`SpeechSynthesizer`] backed by the Azure speech REST endpoint.
pub struct AzureSpeech {
    client: Client,
    endpoint: String,
    api_key: String,
    output_format: String,
    max_chunk_chars: usize,
}

impl AzureSpeech {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        output_format: impl Into<String>,
        max_chunk_chars: usize,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            output_format: output_format.into(),
            max_chunk_chars,
        }
    }

    async fn synthesize_chunk(&self, ssml: String) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &self.output_format)
            .header("User-Agent", env!("CARGO_PKG_NAME"))
            .body(ssml)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "speech endpoint returned an error");
            return Err(Error::Upstream {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl fmt::Debug for AzureSpeech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureSpeech")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("output_format", &self.output_format)
            .finish()
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeech {
    #[instrument(level = "info", skip_all, fields(voice = %voice.voice, chars = text.chars().count()))]
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        let t0 = Instant::now();
        let chunks = split_for_synthesis(text, self.max_chunk_chars);
        if chunks.is_empty() {
            return Err(Error::Synthesis("nothing to synthesize".to_string()));
        }

        let mut audio = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let bytes = self.synthesize_chunk(build_ssml(chunk, voice)).await?;
            if bytes.is_empty() {
                return Err(Error::Synthesis(format!("chunk {i} returned no audio")));
            }
            audio.extend_from_slice(&bytes);
        }

        info!(
            chunks = chunks.len(),
            bytes = audio.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Synthesized podcast audio"
        );
        Ok(audio)
    }
}
