//! `Narrator` backed by the Generative Language `generateContent` endpoint.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use deforest_vision::narrative::{EncodedImage, NarrativeError, Narrator};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GeminiNarrator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    system_instruction: Option<String>,
}

impl GeminiNarrator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, NarrativeError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NarrativeError::Request {
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            system_instruction: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    pub fn request_body(&self, prompt: &str, images: &[EncodedImage]) -> GenerateRequest {
        let mut parts = vec![Part::text(prompt)];
        parts.extend(images.iter().map(|img| Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: img.mime_type.clone(),
                data: general_purpose::STANDARD.encode(&img.data),
            }),
        }));
        GenerateRequest {
            system_instruction: self.system_instruction.as_deref().map(|text| Content {
                role: None,
                parts: vec![Part::text(text)],
            }),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
        }
    }
}

#[async_trait]
impl Narrator for GeminiNarrator {
    async fn analyze(&self, prompt: &str, images: &[EncodedImage]) -> Result<String, NarrativeError> {
        let body = self.request_body(prompt, images);
        debug!(model = %self.model, images = images.len(), "sending narration request");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NarrativeError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NarrativeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| NarrativeError::Request {
            message: e.to_string(),
        })?;
        extract_text(parsed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

/// Joins the text parts of the first candidate.
pub fn extract_text(response: GenerateResponse) -> Result<String, NarrativeError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(NarrativeError::EmptyResponse);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_prompt_images_and_instruction() {
        let narrator = GeminiNarrator::new("key", "gemini-1.5-flash")
            .unwrap()
            .with_system_instruction("be precise");
        let images = [EncodedImage {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        }];
        let json = serde_json::to_value(narrator.request_body("how much forest?", &images)).unwrap();

        assert_eq!(json["system_instruction"]["parts"][0]["text"], "be precise");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "how much forest?");
        assert_eq!(json["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(json["contents"][0]["parts"][1]["inline_data"]["data"], "AQID");
        assert!(json["contents"][0]["parts"][0].get("inline_data").is_none());
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let narrator = GeminiNarrator::new("key", "m1")
            .unwrap()
            .with_base_url("http://localhost:9000/");
        assert_eq!(narrator.endpoint(), "http://localhost:9000/v1beta/models/m1:generateContent");
    }

    #[test]
    fn text_parts_of_first_candidate_are_joined() {
        let response: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"12% "},{"text":"lost"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(response).unwrap(), "12% lost");

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(matches!(extract_text(empty), Err(NarrativeError::EmptyResponse)));
    }
}
