//! Vision model client used by discovery
//!
//! Everything a vision model returns is a hint. Discovery synthesizes
//! selectors from the descriptors and validates each one against the live
//! page before keeping it.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::errors::VisionError;
use crate::types::{ElementDescriptor, Role};

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// DOM characters sent along with the screenshot
const MAX_DOM_CHARS: usize = 60_000;

const SYSTEM_PROMPT: &str = "You locate UI elements in web pages. Reply with JSON only: \
an array of objects with the optional keys tag, id, data_attributes (object), \
attributes (object), classes (array), text and bounding_box ({x, y, width, height}). \
Copy attribute values exactly as they appear in the DOM. Return [] if the element is not present.";

#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Propose elements matching `prompt`; an empty result is not an error
    async fn locate(
        &self,
        prompt: &str,
        screenshot: &[u8],
        dom_snapshot: &str,
    ) -> Result<Vec<ElementDescriptor>, VisionError>;
}

/// Prompt for one discovery attempt
///
/// Refinement attempts (after the first) list the expressions already
/// rejected so the model proposes something else.
pub fn role_prompt(role: &Role, domain: &str, attempt: u32, rejected: &[String]) -> String {
    let mut prompt = format!(
        "On {domain}, find {}. Return the single best match first.",
        role.describe()
    );
    if attempt > 1 && !rejected.is_empty() {
        prompt.push_str("\nThese selectors were tried and did not uniquely match a visible element: ");
        prompt.push_str(&rejected.join(", "));
        prompt.push_str(". Describe a different element or use different attributes.");
    } else if attempt > 1 {
        prompt.push_str("\nThe previous answer did not contain a usable element. Look again.");
    }
    prompt
}

/// Client for OpenAI-compatible `chat/completions` endpoints with image input
pub struct OpenAiVisionClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiVisionClient {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, prompt: &str, screenshot: &[u8], dom_snapshot: &str) -> Value {
        let image = base64::engine::general_purpose::STANDARD.encode(screenshot);
        json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": format!(
                                "{}\n\nDOM snapshot:\n{}",
                                prompt,
                                truncate_chars(dom_snapshot, MAX_DOM_CHARS)
                            )
                        },
                        {
                            "type": "image_url",
                            "image_url": {"url": format!("data:image/png;base64,{image}")}
                        }
                    ]
                }
            ]
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn locate(
        &self,
        prompt: &str,
        screenshot: &[u8],
        dom_snapshot: &str,
    ) -> Result<Vec<ElementDescriptor>, VisionError> {
        let body = self.build_request(prompt, screenshot, dom_snapshot);

        let mut request = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| VisionError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(VisionError::Api { status, message });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Parse(e.to_string()))?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| VisionError::Parse("reply has no message content".to_string()))?;

        let descriptors = parse_descriptors(&content)?;
        debug!("Vision model ({}) proposed {} element(s)", self.model, descriptors.len());
        Ok(descriptors)
    }
}

/// Extract element descriptors from a model reply
///
/// Accepts a bare JSON array, `{"elements": [...]}`, either of those inside
/// a fenced code block, or an array embedded in surrounding prose.
pub fn parse_descriptors(content: &str) -> Result<Vec<ElementDescriptor>, VisionError> {
    let body = strip_code_fence(content.trim());

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return descriptors_from_value(value);
    }

    let embedded = match (body.find('['), body.rfind(']')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => {
            return Err(VisionError::Parse(format!(
                "no JSON array in reply: {}",
                truncate_chars(body, 200)
            )));
        }
    };
    let value = serde_json::from_str::<Value>(embedded)
        .map_err(|e| VisionError::Parse(e.to_string()))?;
    descriptors_from_value(value)
}

fn descriptors_from_value(value: Value) -> Result<Vec<ElementDescriptor>, VisionError> {
    let array = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut map) => match map.remove("elements") {
            Some(elements @ Value::Array(_)) => elements,
            _ => Value::Array(vec![Value::Object(map)]),
        },
        other => {
            return Err(VisionError::Parse(format!("unexpected JSON value: {other}")));
        }
    };
    serde_json::from_value(array).map_err(|e| VisionError::Parse(e.to_string()))
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    // drop the info string ("json") up to the first newline
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
#[path = "vision_test.rs"]
mod vision_test;
