//! OpenAI-compatible chat completions format, shared by Groq, NVIDIA and Z.ai
//!
//! The base URL is the full completions endpoint; the model travels in the body.

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::types::{AttemptError, Prompt, TEMPERATURE, VendorAdapter};

const MAX_TOKENS: u32 = 8192;

/// Bearer-authenticated `chat/completions` adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCompatAdapter;

impl OpenAiCompatAdapter {
    fn to_openai_messages(prompt: &Prompt) -> Vec<OpenAiMessage<'_>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &prompt.system {
            messages.push(OpenAiMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(OpenAiMessage {
            role: "user",
            content: &prompt.user,
        });
        messages
    }

    fn from_openai_response(resp: OpenAiApiResponse) -> Option<String> {
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|content| !content.is_empty())
    }
}

impl VendorAdapter for OpenAiCompatAdapter {
    fn build_request(
        &self,
        client: &Client,
        base_url: &str,
        model: &str,
        prompt: &Prompt,
        api_key: &str,
    ) -> RequestBuilder {
        let body = OpenAiRequest {
            model,
            messages: Self::to_openai_messages(prompt),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        client
            .post(base_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
    }

    fn parse_response(&self, body: &[u8]) -> Result<String, AttemptError> {
        let resp: OpenAiApiResponse = serde_json::from_slice(body)
            .map_err(|e| AttemptError::Decode(format!("chat completion response: {}", e)))?;
        Self::from_openai_response(resp).ok_or(AttemptError::EmptyResponse)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiApiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}
