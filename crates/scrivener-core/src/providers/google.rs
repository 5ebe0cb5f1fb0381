//! Google Gemini wire format

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::types::{AttemptError, Prompt, TEMPERATURE, VendorAdapter};

/// Maximum output tokens requested from Gemini
const MAX_OUTPUT_TOKENS: u32 = 8192;

/// Gemini `generateContent` adapter. The key travels in the query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    fn to_gemini_request(prompt: &Prompt) -> GeminiRequest<'_> {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart { text: &prompt.user }],
            }],
            system_instruction: prompt.system.as_deref().map(|system| GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: system }],
            }),
            generation_config: GeminiGenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        }
    }

    /// First non-empty text part of the first candidate
    fn from_gemini_response(resp: GeminiApiResponse) -> Option<String> {
        resp.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .filter(|text| !text.is_empty())
    }
}

impl VendorAdapter for GeminiAdapter {
    fn build_request(
        &self,
        client: &Client,
        base_url: &str,
        model: &str,
        prompt: &Prompt,
        api_key: &str,
    ) -> RequestBuilder {
        let url = format!("{}/{}:generateContent", base_url.trim_end_matches('/'), model);
        client
            .post(url)
            .query(&[("key", api_key)])
            .header("Content-Type", "application/json")
            .json(&Self::to_gemini_request(prompt))
    }

    fn parse_response(&self, body: &[u8]) -> Result<String, AttemptError> {
        let resp: GeminiApiResponse = serde_json::from_slice(body)
            .map_err(|e| AttemptError::Decode(format!("Gemini response: {}", e)))?;
        Self::from_gemini_response(resp).ok_or(AttemptError::EmptyResponse)
    }
}

// ── Gemini wire types ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}
