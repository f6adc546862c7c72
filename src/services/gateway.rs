// src/services/gateway.rs
use crate::errors::StudioError;
use crate::models::*;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const IDEAS_MODEL: &str = "gemini-2.5-pro";
const IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const EDIT_MODEL: &str = "gemini-2.5-flash-image";
const VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";

const MAX_IDEAS_PER_BATCH: usize = 20;
const VIDEO_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// External generative backend: ideas, images, edits and videos. The engine
/// only ever talks to this trait, so tests can substitute a scripted double.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Turn a brief into a batch of asset ideas, optionally with a design
    /// audit. `existing_count` is a diversity hint for continuation batches.
    async fn generate_ideas(
        &self,
        input: &GenerateInput,
        existing_count: usize,
    ) -> Result<IdeaBatch, StudioError>;

    /// Generate a single still image for an idea prompt.
    async fn generate_image(&self, prompt: &str) -> Result<ImagePayload, StudioError>;

    /// Apply an edit instruction to an image, optionally guided by a
    /// reference image.
    async fn edit_image(
        &self,
        base: &ImagePayload,
        instruction: &str,
        reference: Option<&ImagePayload>,
    ) -> Result<ImagePayload, StudioError>;

    /// Animate a still image. Long-running on the backend; resolves to a
    /// downloadable video URL once the operation is done.
    async fn animate_image(
        &self,
        base: &ImagePayload,
        instruction: &str,
    ) -> Result<String, StudioError>;
}

/// Wire shape of one idea as the model returns it (no id yet).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdeaWire {
    section: String,
    description: String,
    prompt: String,
    #[serde(default)]
    animation_prompt: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisWire {
    score: u8,
    style: String,
    #[serde(default)]
    palette: Vec<String>,
    critique: String,
    #[serde(default)]
    improvements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IdeaBatchWire {
    #[serde(default)]
    analysis: Option<AnalysisWire>,
    ideas: Vec<IdeaWire>,
}

pub struct GeminiGateway {
    api_key: String,
    client: Client,
}

impl GeminiGateway {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}?key={}", API_BASE, path, self.api_key)
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, StudioError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| StudioError::Gateway(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StudioError::Gateway(format!(
                "Generation backend error: {}",
                error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| StudioError::Gateway(format!("Failed to parse response: {}", e)))
    }

    fn ideas_prompt(input: &GenerateInput, existing_count: usize) -> String {
        let audit_clause = if existing_count == 0 {
            "Also audit the described design: include an \"analysis\" object with a \
             0-100 \"score\", a \"style\" label, a \"palette\" of hex color strings, \
             a short \"critique\", and a list of \"improvements\"."
        } else {
            "This is a continuation batch; omit the \"analysis\" object and make the \
             new ideas distinct from what was generated before."
        };

        let subject = match input {
            GenerateInput::Text { value } => format!("Application Brief: \"{}\"", value),
            GenerateInput::File { tips, .. } => format!(
                "Analyze the attached website screenshot. Invent NEW and IMPROVED assets \
                 that would enhance this page, not descriptions of what is already there.\n\
                 User's Creative Brief: \"{}\"",
                tips.as_deref().unwrap_or("No specific brief provided. Use your expertise.")
            ),
            GenerateInput::Url { url } => format!(
                "Access and analyze the content of the website at this URL: {}. Base the \
                 assets on its purpose, audience, and tone.",
                url
            ),
        };

        format!(
            "You are a creative director for a top-tier web design agency.\n\
             Generate a list of {} creative, diverse, studio-quality visual assets.\n\
             For each asset provide: \"section\" (short component name), \"description\" \
             (one sentence), \"prompt\" (a detailed image generation prompt), and \
             \"animationPrompt\" (a subtle, professional animation prompt).\n\
             {}\n{}\n\
             Current idea count: {}\n\
             Return ONLY a valid JSON object of the form \
             {{\"analysis\": ..., \"ideas\": [...]}} with no markdown or extra text.",
            MAX_IDEAS_PER_BATCH, audit_clause, subject, existing_count
        )
    }

    /// The model wraps its JSON in markdown fences often enough that we strip
    /// them before parsing.
    fn parse_fenced_json(text: &str) -> Result<serde_json::Value, StudioError> {
        let cleaned = text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(cleaned).map_err(|e| {
            warn!("Failed to parse model JSON: {}", e);
            StudioError::InvalidFormat
        })
    }

    fn inline_image_part(image: &ImagePayload) -> serde_json::Value {
        json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": image.base64
            }
        })
    }

    async fn poll_video_operation(&self, name: &str) -> Result<serde_json::Value, StudioError> {
        loop {
            tokio::time::sleep(VIDEO_POLL_INTERVAL).await;

            let response = self
                .client
                .get(format!("{}/{}?key={}", API_BASE, name, self.api_key))
                .send()
                .await
                .map_err(|e| StudioError::Gateway(format!("Operation poll failed: {}", e)))?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(StudioError::Gateway(format!(
                    "Operation poll error: {}",
                    error_text
                )));
            }

            let operation: serde_json::Value = response
                .json()
                .await
                .map_err(|e| StudioError::Gateway(format!("Failed to parse operation: {}", e)))?;

            if operation["done"].as_bool().unwrap_or(false) {
                return Ok(operation);
            }
            info!("Video operation {} still running", name);
        }
    }
}

#[async_trait]
impl GenerationGateway for GeminiGateway {
    async fn generate_ideas(
        &self,
        input: &GenerateInput,
        existing_count: usize,
    ) -> Result<IdeaBatch, StudioError> {
        let prompt = Self::ideas_prompt(input, existing_count);

        let body = match input {
            // URL briefs need the search tool, which excludes schema-constrained
            // output, so the prompt itself demands raw JSON.
            GenerateInput::Url { .. } => json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "tools": [{ "googleSearch": {} }]
            }),
            GenerateInput::File { image, .. } => json!({
                "contents": [{
                    "parts": [Self::inline_image_part(image), { "text": prompt }]
                }],
                "generationConfig": { "responseMimeType": "application/json" }
            }),
            GenerateInput::Text { .. } => json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": { "responseMimeType": "application/json" }
            }),
        };

        let result = self
            .post_json(&format!("models/{}:generateContent", IDEAS_MODEL), body)
            .await?;

        let text = result["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or(StudioError::InvalidFormat)?;

        let parsed = Self::parse_fenced_json(text)?;
        let wire: IdeaBatchWire =
            serde_json::from_value(parsed).map_err(|_| StudioError::InvalidFormat)?;

        let ideas = wire
            .ideas
            .into_iter()
            .map(|idea| AssetIdea {
                id: Uuid::new_v4(),
                section: idea.section,
                description: idea.description,
                prompt: idea.prompt,
                animation_prompt: idea.animation_prompt,
            })
            .collect();

        let analysis = wire.analysis.map(|a| DesignAnalysis {
            score: a.score.min(100),
            style: a.style,
            palette: a.palette,
            critique: a.critique,
            improvements: a.improvements,
        });

        Ok(IdeaBatch { ideas, analysis })
    }

    async fn generate_image(&self, prompt: &str) -> Result<ImagePayload, StudioError> {
        let body = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": "1:1",
                "outputMimeType": "image/png"
            }
        });

        let result = self
            .post_json(&format!("models/{}:predict", IMAGE_MODEL), body)
            .await?;

        let base64 = result["predictions"][0]["bytesBase64Encoded"]
            .as_str()
            .ok_or_else(|| StudioError::Gateway("No images were generated.".to_string()))?;

        Ok(ImagePayload {
            base64: base64.to_string(),
            mime_type: "image/png".to_string(),
        })
    }

    async fn edit_image(
        &self,
        base: &ImagePayload,
        instruction: &str,
        reference: Option<&ImagePayload>,
    ) -> Result<ImagePayload, StudioError> {
        let mut parts = vec![Self::inline_image_part(base)];
        if let Some(reference) = reference {
            parts.push(Self::inline_image_part(reference));
        }
        parts.push(json!({ "text": instruction }));

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE"] }
        });

        let result = self
            .post_json(&format!("models/{}:generateContent", EDIT_MODEL), body)
            .await?;

        let parts = result["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| StudioError::Gateway("No edited image was returned.".to_string()))?;

        for part in parts {
            if let Some(data) = part["inlineData"]["data"].as_str() {
                let mime_type = part["inlineData"]["mimeType"]
                    .as_str()
                    .unwrap_or("image/png")
                    .to_string();
                return Ok(ImagePayload {
                    base64: data.to_string(),
                    mime_type,
                });
            }
        }

        Err(StudioError::Gateway("No edited image was returned.".to_string()))
    }

    async fn animate_image(
        &self,
        base: &ImagePayload,
        instruction: &str,
    ) -> Result<String, StudioError> {
        let body = json!({
            "instances": [{
                "prompt": instruction,
                "image": {
                    "bytesBase64Encoded": base.base64,
                    "mimeType": base.mime_type
                }
            }],
            "parameters": {
                "sampleCount": 1,
                "resolution": "720p",
                "aspectRatio": "16:9"
            }
        });

        let result = self
            .post_json(&format!("models/{}:predictLongRunning", VIDEO_MODEL), body)
            .await?;

        let name = result["name"]
            .as_str()
            .ok_or_else(|| StudioError::Gateway("No operation handle returned.".to_string()))?;

        info!("Video generation started: {}", name);
        let operation = self.poll_video_operation(name).await?;

        if let Some(message) = operation["error"]["message"].as_str() {
            // A vanished operation entity means the API key is missing or
            // expired, which callers handle differently from generic failure.
            if message.contains("Requested entity was not found.") {
                return Err(StudioError::ApiCredential);
            }
            return Err(StudioError::Gateway(format!(
                "Video generation failed: {}",
                message
            )));
        }

        let uri = operation["response"]["generateVideoResponse"]["generatedSamples"][0]["video"]
            ["uri"]
            .as_str()
            .ok_or_else(|| {
                StudioError::Gateway(
                    "Video generation completed, but no download link was found.".to_string(),
                )
            })?;

        Ok(format!("{}&key={}", uri, self.api_key))
    }
}
