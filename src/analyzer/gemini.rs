use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::label::{parse_label_response, LABEL_PROMPT};
use super::{AnalyzeError, Analyzer, NutrientDraft};
use crate::config::AnalyzerConfig;

/// Reads nutrition labels with a Gemini vision model over the
/// Generative Language REST API.
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GeminiAnalyzer {
    pub fn new(cfg: &AnalyzerConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .gemini_api_key
            .clone()
            .context("GEMINI_API_KEY is required for the gemini analyzer")?;
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                cfg.gemini_endpoint.trim_end_matches('/'),
                cfg.gemini_model
            ),
            api_key,
        })
    }
}

fn mime_from_magic(image: &[u8]) -> &'static str {
    match image {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [_, _, _, _, b'f', b't', b'y', b'p', b'h', b'e', b'i', b'c', ..] => "image/heic",
        _ => "image/jpeg",
    }
}

fn first_text(resp: GenerateResponse) -> Result<String, AnalyzeError> {
    resp.candidates
        .into_iter()
        .next()
        .ok_or_else(|| AnalyzeError::MalformedResponse("no response generated".into()))?
        .content
        .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
        .ok_or_else(|| AnalyzeError::MalformedResponse("no content in response".into()))
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    #[instrument(skip_all, fields(bytes = image.len()))]
    async fn analyze(&self, image: &[u8]) -> Result<NutrientDraft, AnalyzeError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": LABEL_PROMPT },
                    { "inline_data": {
                        "mime_type": mime_from_magic(image),
                        "data": STANDARD.encode(image),
                    }},
                ]
            }]
        });

        let resp: GenerateResponse = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = first_text(resp)?;
        debug!(len = text.len(), "model answered");
        parse_label_response(&text)
    }
}
