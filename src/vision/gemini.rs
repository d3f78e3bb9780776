//! Multimodal model clients.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::config::VisionConfig;

#[derive(Debug, Error)]
pub enum VisionCallError {
    #[error("vision model request timed out")]
    Timeout,
    #[error("vision model rejected the API key (HTTP {0})")]
    Unauthorized(u16),
    #[error("vision model returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("vision model unreachable: {0}")]
    Transport(String),
    #[error("vision model returned no content: {0}")]
    EmptyResponse(String),
}

impl VisionCallError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VisionCallError::Timeout
        } else {
            VisionCallError::Transport(e.to_string())
        }
    }
}

/// An uploaded meal photo.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Bytes,
    pub content_type: String,
}

impl ImageInput {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

/// Sends one prompt plus one image and returns the model's raw text.
#[async_trait]
pub trait VisionModel: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str, image: &ImageInput) -> Result<String, VisionCallError>;
}

// ---- Gemini wire types ----

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String, VisionCallError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(VisionCallError::EmptyResponse(reason));
        }
        Ok(text)
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VisionCallError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionCallError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.to_string())
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt, image), fields(model = %self.model, image_bytes = image.bytes.len()))]
    async fn generate(&self, prompt: &str, image: &ImageInput) -> Result<String, VisionCallError> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: prompt },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: image.content_type.clone(),
                            data: STANDARD.encode(&image.bytes),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                response_mime_type: "application/json",
            },
        };

        debug!("sending image to vision model");
        let response = self
            .http
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(VisionCallError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.map_err(VisionCallError::from_reqwest)?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(%status, "vision model rejected API key");
            return Err(VisionCallError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            error!(%status, "vision model error");
            return Err(VisionCallError::Http {
                status: status.as_u16(),
                message: Self::error_message(&body),
            });
        }

        let decoded: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| VisionCallError::EmptyResponse(format!("undecodable response: {e}")))?;
        let text = decoded.into_text()?;
        debug!(chars = text.len(), "vision model response received");
        Ok(text)
    }
}

const DEMO_RESPONSE: &str = r#"{
  "analysis_status": "success",
  "confidence_overall": 0.85,
  "main_food": {
    "name": "Nasi Goreng",
    "description": "Indonesian fried rice dish with vegetables, egg, and sweet soy sauce. Traditional Indonesian food with mixed ingredients.",
    "estimated_portion": 250,
    "portion_unit": "grams",
    "confidence": 0.9
  },
  "ingredients": [
    { "name": "nasi putih", "category": "carbs", "estimated_portion": 150, "portion_unit": "grams", "confidence": 0.9 },
    { "name": "telur ayam", "category": "protein", "estimated_portion": 50, "portion_unit": "grams", "confidence": 0.85 },
    { "name": "kecap manis", "category": "condiment", "estimated_portion": 15, "portion_unit": "ml", "confidence": 0.8 },
    { "name": "sayuran campur", "category": "vegetables", "estimated_portion": 35, "portion_unit": "grams", "confidence": 0.85 }
  ],
  "image_quality": "good",
  "additional_notes": "Demo response - showing typical nasi goreng ingredients"
}"#;

/// Fixed answer used when no API key is configured.
pub struct DemoVisionModel;

#[async_trait]
impl VisionModel for DemoVisionModel {
    fn name(&self) -> &str {
        "demo"
    }

    async fn generate(&self, _prompt: &str, _image: &ImageInput) -> Result<String, VisionCallError> {
        Ok(DEMO_RESPONSE.to_string())
    }
}

/// Gemini when a key is configured, the demo model otherwise.
pub fn model_from_config(cfg: &VisionConfig) -> Result<Box<dyn VisionModel>, VisionCallError> {
    match cfg.api_key.as_deref() {
        Some(key) => Ok(Box::new(GeminiClient::new(
            key,
            cfg.model.clone(),
            cfg.base_url.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )?)),
        None => {
            info!("GEMINI_API_KEY not set, using demo vision model");
            Ok(Box::new(DemoVisionModel))
        }
    }
}
