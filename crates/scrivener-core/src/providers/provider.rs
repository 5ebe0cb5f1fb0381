//! A named upstream service owning a set of keys

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::key::ApiKey;
use super::settings::ProviderSettings;
use super::types::{AttemptError, Prompt, ProviderKind, VendorAdapter};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One vendor endpoint with its credentials and key cursor
pub struct Provider {
    kind: ProviderKind,
    base_url: String,
    model: String,
    keys: Vec<ApiKey>,
    current_key_index: usize,
    request_timeout: Duration,
    adapter: Box<dyn VendorAdapter>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("keys", &self.keys)
            .field("current_key_index", &self.current_key_index)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Provider {
    /// Create a provider with the vendor's default endpoint, model and limits
    pub fn new<I, S>(kind: ProviderKind, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let daily_limit = kind.default_daily_limit();
        Self {
            kind,
            base_url: kind.default_base_url().to_string(),
            model: kind.default_model().to_string(),
            keys: keys
                .into_iter()
                .map(|k| ApiKey::new(k, kind.as_str(), daily_limit))
                .collect(),
            current_key_index: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            adapter: kind.adapter(),
        }
    }

    /// Create a provider from configuration, applying any overrides
    pub fn from_settings(kind: ProviderKind, settings: &ProviderSettings) -> Self {
        let keys = settings.keys.iter().filter(|k| !k.trim().is_empty());
        let mut provider = Self::new(kind, keys.map(|k| k.trim().to_string()));

        if let Some(model) = &settings.model {
            provider = provider.with_model(model.clone());
        }
        if let Some(base_url) = &settings.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        if let Some(limit) = settings.daily_limit {
            provider = provider.with_daily_limit(limit);
        }
        if let Some(secs) = settings.request_timeout_secs {
            provider = provider.with_request_timeout(Duration::from_secs(secs));
        }
        let key_count = provider.keys.len();
        for &position in &settings.disabled_keys {
            match position.checked_sub(1).and_then(|i| provider.keys.get_mut(i)) {
                Some(key) => key.disable(),
                None => warn!(
                    "Ignoring disabled key #{} for {}: only {} keys configured",
                    position, kind, key_count
                ),
            }
        }

        provider
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the daily budget of every key
    pub fn with_daily_limit(mut self, daily_limit: u64) -> Self {
        for key in &mut self.keys {
            key.daily_limit = daily_limit;
        }
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn keys(&self) -> &[ApiKey] {
        &self.keys
    }

    pub fn keys_mut(&mut self) -> &mut [ApiKey] {
        &mut self.keys
    }

    pub fn current_key_index(&self) -> usize {
        self.current_key_index
    }

    /// Move the cursor, wrapping to stay a valid index
    pub(crate) fn set_current_key_index(&mut self, index: usize) {
        self.current_key_index = if self.keys.is_empty() {
            0
        } else {
            index % self.keys.len()
        };
    }

    /// Round-robin scan for the next usable key.
    ///
    /// Visits at most one full cycle starting at the cursor and advances the
    /// cursor past every slot it looks at, so repeated calls keep moving
    /// forward instead of restarting at the first key.
    pub fn get_next_available_key(&mut self) -> Option<usize> {
        let len = self.keys.len();
        for _ in 0..len {
            let index = self.current_key_index;
            self.current_key_index = (index + 1) % len;
            if self.keys[index].is_available() {
                return Some(index);
            }
        }
        None
    }

    /// Whether any key is usable right now. Does not move the cursor.
    pub fn has_available_key(&mut self) -> bool {
        // Evaluate every key so each one gets its lazy reset check
        self.keys
            .iter_mut()
            .fold(false, |found, key| key.is_available() || found)
    }

    /// Number of keys currently usable
    pub fn available_key_count(&mut self) -> usize {
        self.keys
            .iter_mut()
            .map(|key| key.is_available())
            .filter(|available| *available)
            .count()
    }

    /// Issue one generation call with the key at `key_index`.
    ///
    /// Every failure is returned as a value: 429 marks the key rate limited,
    /// anything else bumps its error count and leaves the status alone.
    /// Successful calls charge `prompt + response` characters to the key.
    pub async fn generate(
        &mut self,
        key_index: usize,
        prompt: &Prompt,
        client: &Client,
    ) -> Result<String, AttemptError> {
        let Some(key) = self.keys.get_mut(key_index) else {
            return Err(AttemptError::NoSuchKey(key_index));
        };

        let request = self
            .adapter
            .build_request(client, &self.base_url, &self.model, prompt, key.secret())
            .timeout(self.request_timeout);

        debug!(
            "{} request: model={}, key={}, prompt_chars={}",
            self.kind,
            self.model,
            key_index + 1,
            prompt.charge_len()
        );

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                key.record_error();
                return Err(AttemptError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            key.mark_rate_limited();
            return Err(AttemptError::RateLimited);
        }
        if !status.is_success() {
            key.record_error();
            return Err(AttemptError::Http(status.as_u16()));
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                key.record_error();
                return Err(AttemptError::Transport(e.to_string()));
            }
        };

        match self.adapter.parse_response(&body) {
            Ok(text) => {
                key.charge(prompt.charge_len() + text.chars().count() as u64);
                Ok(text)
            }
            Err(e) => {
                key.record_error();
                Err(e)
            }
        }
    }
}
