//! Provider-agnostic types for multi-vendor text generation

use std::borrow::Cow;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::google::GeminiAdapter;
use super::huggingface::HuggingFaceAdapter;
use super::openai_compat::OpenAiCompatAdapter;

/// Sampling temperature sent to every vendor
pub const TEMPERATURE: f32 = 0.7;

/// Known upstream vendors, in rotation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Groq,
    Nvidia,
    Zai,
    HuggingFace,
}

impl ProviderKind {
    /// Every known vendor, in the order the rotator visits them
    pub const ALL: [ProviderKind; 5] = [
        Self::Gemini,
        Self::Groq,
        Self::Nvidia,
        Self::Zai,
        Self::HuggingFace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Nvidia => "nvidia",
            Self::Zai => "zai",
            Self::HuggingFace => "huggingface",
        }
    }

    /// Prefix of the `<PREFIX>_API_KEY_<n>` environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI",
            Self::Groq => "GROQ",
            Self::Nvidia => "NVIDIA",
            Self::Zai => "ZAI",
            Self::HuggingFace => "HUGGINGFACE",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
            Self::Groq => "https://api.groq.com/openai/v1/chat/completions",
            Self::Nvidia => "https://integrate.api.nvidia.com/v1/chat/completions",
            Self::Zai => "https://open.bigmodel.cn/api/paas/v4/chat/completions",
            Self::HuggingFace => "https://api-inference.huggingface.co/models",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Nvidia => "meta/llama-3.1-70b-instruct",
            Self::Zai => "glm-4-flash",
            Self::HuggingFace => "meta-llama/Llama-3.2-3B-Instruct",
        }
    }

    /// Per-key daily budget (characters) for the vendor's free tier
    pub fn default_daily_limit(&self) -> u64 {
        match self {
            Self::Gemini => 1_500_000,
            Self::Groq | Self::Nvidia => 500_000,
            Self::Zai => 1_000_000,
            Self::HuggingFace => 300_000,
        }
    }

    /// Wire-format adapter for this vendor
    pub fn adapter(&self) -> Box<dyn VendorAdapter> {
        match self {
            Self::Gemini => Box::new(GeminiAdapter),
            Self::Groq | Self::Nvidia | Self::Zai => Box::new(OpenAiCompatAdapter),
            Self::HuggingFace => Box::new(HuggingFaceAdapter),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SettingsError::UnknownProvider(s.to_string()))
    }
}

/// A generation request: user text plus an optional system instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
}

impl Prompt {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            system: None,
            user: user.into(),
        }
    }

    pub fn with_system(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            user: user.into(),
        }
    }

    /// Single-string form for vendors without a system role
    pub fn framed(&self) -> Cow<'_, str> {
        match &self.system {
            Some(system) => Cow::Owned(format!("System: {}\n\nUser: {}", system, self.user)),
            None => Cow::Borrowed(&self.user),
        }
    }

    /// Quota units charged for the prompt side of a call
    pub fn charge_len(&self) -> u64 {
        self.framed().chars().count() as u64
    }
}

/// Successful generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub text: String,
    /// Name of the provider that served the request
    pub provider: String,
}

/// Terminal failure of a rotator call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("all providers exhausted")]
    AllProvidersExhausted,
}

impl GenerateError {
    /// Machine-readable failure code
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllProvidersExhausted => "all_providers_exhausted",
        }
    }
}

/// Outcome of a single vendor call that did not produce text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptError {
    #[error("rate limited")]
    RateLimited,
    #[error("upstream returned HTTP {0}")]
    Http(u16),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("response contained no generated text")]
    EmptyResponse,
    #[error("no key at index {0}")]
    NoSuchKey(usize),
}

impl AttemptError {
    /// Machine-readable failure code
    pub fn code(&self) -> String {
        match self {
            Self::RateLimited => "rate_limited".to_string(),
            Self::Http(status) => format!("http_{}", status),
            Self::Transport(msg) | Self::Decode(msg) => msg.clone(),
            Self::EmptyResponse => "empty_response".to_string(),
            Self::NoSuchKey(_) => "no_such_key".to_string(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Configuration problems detected while building providers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("unknown provider '{0}' (expected one of gemini, groq, nvidia, zai, huggingface)")]
    UnknownProvider(String),
}

/// Vendor-specific request shaping and response parsing.
///
/// Status classification, timeouts and quota charging are shared by every
/// vendor and live in [`super::Provider::generate`].
pub trait VendorAdapter: Send + Sync {
    /// Build the HTTP request for `prompt` against `base_url`/`model`
    fn build_request(
        &self,
        client: &Client,
        base_url: &str,
        model: &str,
        prompt: &Prompt,
        api_key: &str,
    ) -> RequestBuilder;

    /// Extract generated text from a 2xx response body. A body with no text
    /// is [`AttemptError::EmptyResponse`].
    fn parse_response(&self, body: &[u8]) -> Result<String, AttemptError>;
}

/// The "generate text from prompt" contract consumers depend on
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<Generation, GenerateError>;
}
