//! Provider rotator with quota-aware failover across vendors

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::provider::Provider;
use super::report::StatusReport;
use super::settings::{DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES, RotatorSettings};
use super::types::{GenerateError, Generation, Prompt, ProviderKind, TextGenerator};

/// Request counters kept across the rotator's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotatorStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Successful calls per provider name
    pub provider_usage: BTreeMap<String, u64>,
}

/// Distributes generation requests across providers and their keys
pub struct ProviderRotator {
    providers: Vec<Provider>,
    current_provider_index: usize,
    stats: RotatorStats,
    client: Client,
    max_retries: u32,
    /// Sleep when no provider has an available key
    backoff: Duration,
}

impl std::fmt::Debug for ProviderRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRotator")
            .field("providers", &self.providers)
            .field("current_provider_index", &self.current_provider_index)
            .field("stats", &self.stats)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl ProviderRotator {
    /// Build providers in the fixed vendor order, skipping any without keys
    pub fn new(settings: &RotatorSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().build()?;

        let providers: Vec<Provider> = ProviderKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let provider_settings = settings.providers.get(&kind)?;
                if !provider_settings.has_keys() {
                    return None;
                }
                let provider = Provider::from_settings(kind, provider_settings);
                info!(
                    "Initialized {} provider with {} keys (model: {})",
                    kind,
                    provider.keys().len(),
                    provider.model()
                );
                Some(provider)
            })
            .collect();

        if providers.is_empty() {
            warn!("No provider has any API keys configured; every request will fail");
        }

        Ok(Self::from_providers(providers, client)
            .with_max_retries(settings.max_retries)
            .with_backoff(settings.backoff))
    }

    /// Assemble a rotator from pre-built providers, in the given order
    pub fn from_providers(providers: Vec<Provider>, client: Client) -> Self {
        Self {
            providers,
            current_provider_index: 0,
            stats: RotatorStats::default(),
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub(crate) fn providers_mut(&mut self) -> &mut [Provider] {
        &mut self.providers
    }

    pub fn stats(&self) -> &RotatorStats {
        &self.stats
    }

    pub(crate) fn set_stats(&mut self, stats: RotatorStats) {
        self.stats = stats;
    }

    pub fn current_provider_index(&self) -> usize {
        self.current_provider_index
    }

    /// Move the provider cursor, wrapping to stay a valid index
    pub(crate) fn set_current_provider_index(&mut self, index: usize) {
        self.current_provider_index = if self.providers.is_empty() {
            0
        } else {
            index % self.providers.len()
        };
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Round-robin scan for a provider with at least one usable key.
    ///
    /// The cursor moves past every slot visited, so consecutive calls spread
    /// load across providers instead of always preferring the first.
    pub fn get_next_provider(&mut self) -> Option<usize> {
        let len = self.providers.len();
        for _ in 0..len {
            let index = self.current_provider_index;
            self.current_provider_index = (index + 1) % len;
            if self.providers[index].has_available_key() {
                return Some(index);
            }
        }
        None
    }

    /// Generate text, failing over between providers and keys.
    ///
    /// Makes at most `max_retries` attempts. Sleeps for the backoff whenever
    /// no provider has a usable key. Every failure is absorbed and the only
    /// error surfaced is [`GenerateError::AllProvidersExhausted`].
    pub async fn generate(
        &mut self,
        prompt: &Prompt,
        max_retries: u32,
    ) -> Result<Generation, GenerateError> {
        self.stats.total_requests += 1;

        if self.providers.is_empty() {
            self.stats.failed_requests += 1;
            return Err(GenerateError::AllProvidersExhausted);
        }

        for attempt in 0..max_retries {
            let Some(provider_index) = self.get_next_provider() else {
                warn!(
                    "No provider has an available key (attempt {}/{}), backing off for {:?}",
                    attempt + 1,
                    max_retries,
                    self.backoff
                );
                tokio::time::sleep(self.backoff).await;
                continue;
            };

            let provider = &mut self.providers[provider_index];
            let Some(key_index) = provider.get_next_available_key() else {
                continue;
            };

            debug!(
                "Trying {} key #{} (attempt {}/{})",
                provider.name(),
                key_index + 1,
                attempt + 1,
                max_retries
            );

            match provider.generate(key_index, prompt, &self.client).await {
                Ok(text) => {
                    let name = provider.name();
                    if attempt > 0 {
                        info!("Request succeeded on {} after {} failed attempts", name, attempt);
                    }
                    self.stats.successful_requests += 1;
                    *self.stats.provider_usage.entry(name.to_string()).or_insert(0) += 1;
                    return Ok(Generation {
                        text,
                        provider: name.to_string(),
                    });
                }
                Err(e) if e.is_rate_limited() => {
                    warn!("Rate limited on {} key #{}", provider.name(), key_index + 1);
                }
                Err(e) => {
                    error!("Error on {} key #{}: {}", provider.name(), key_index + 1, e);
                }
            }
        }

        warn!("All providers exhausted after {} attempts", max_retries);
        self.stats.failed_requests += 1;
        Err(GenerateError::AllProvidersExhausted)
    }

    /// Generate with a system instruction
    pub async fn generate_with_system(
        &mut self,
        system: &str,
        prompt: &str,
        max_retries: u32,
    ) -> Result<Generation, GenerateError> {
        self.generate(&Prompt::with_system(system, prompt), max_retries)
            .await
    }

    /// Generate with the configured retry budget
    pub async fn generate_default(&mut self, prompt: &Prompt) -> Result<Generation, GenerateError> {
        self.generate(prompt, self.max_retries).await
    }

    /// Snapshot of stats and per-key state. Applies any due daily resets.
    pub fn status_report(&mut self) -> StatusReport {
        StatusReport::collect(&self.stats, &mut self.providers)
    }
}

/// Cloneable handle shared by every consumer of the rotator.
///
/// The lock is held for a whole call, so requests through one handle are
/// served one at a time.
#[derive(Debug, Clone)]
pub struct SharedRotator {
    inner: Arc<Mutex<ProviderRotator>>,
}

impl SharedRotator {
    pub fn new(rotator: ProviderRotator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rotator)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ProviderRotator> {
        self.inner.lock().await
    }

    pub async fn generate_with_system(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<Generation, GenerateError> {
        let mut rotator = self.inner.lock().await;
        let max_retries = rotator.max_retries();
        rotator.generate_with_system(system, prompt, max_retries).await
    }

    pub async fn status_report(&self) -> StatusReport {
        self.inner.lock().await.status_report()
    }

    /// Recover the rotator once every other handle has been dropped
    pub fn try_into_inner(self) -> Result<ProviderRotator, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

#[async_trait]
impl TextGenerator for SharedRotator {
    async fn generate(&self, prompt: &Prompt) -> Result<Generation, GenerateError> {
        self.inner.lock().await.generate_default(prompt).await
    }
}
