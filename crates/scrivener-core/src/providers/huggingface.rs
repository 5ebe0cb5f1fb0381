//! Hugging Face Inference API format
//!
//! Text-generation models take one flat `inputs` string, so any system
//! instruction is folded into the framed prompt.

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::types::{AttemptError, Prompt, TEMPERATURE, VendorAdapter};

const MAX_NEW_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Copy, Default)]
pub struct HuggingFaceAdapter;

impl VendorAdapter for HuggingFaceAdapter {
    fn build_request(
        &self,
        client: &Client,
        base_url: &str,
        model: &str,
        prompt: &Prompt,
        api_key: &str,
    ) -> RequestBuilder {
        let framed = prompt.framed();
        let body = HfRequest {
            inputs: &framed,
            parameters: HfParameters {
                temperature: TEMPERATURE,
                max_new_tokens: MAX_NEW_TOKENS,
                return_full_text: false,
            },
        };
        client
            .post(format!("{}/{}", base_url.trim_end_matches('/'), model))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
    }

    fn parse_response(&self, body: &[u8]) -> Result<String, AttemptError> {
        let resp: HfResponse = serde_json::from_slice(body)
            .map_err(|e| AttemptError::Decode(format!("Hugging Face response: {}", e)))?;
        let text = match resp {
            HfResponse::Batch(items) => items.into_iter().next().and_then(|g| g.generated_text),
            HfResponse::Single(g) => g.generated_text,
        };
        text.filter(|text| !text.is_empty())
            .ok_or(AttemptError::EmptyResponse)
    }
}

// ── Hugging Face wire types ──

#[derive(Debug, Serialize)]
struct HfRequest<'a> {
    inputs: &'a str,
    parameters: HfParameters,
}

#[derive(Debug, Serialize)]
struct HfParameters {
    temperature: f32,
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HfResponse {
    Batch(Vec<HfGeneration>),
    Single(HfGeneration),
}

#[derive(Debug, Deserialize)]
struct HfGeneration {
    generated_text: Option<String>,
}
