//! Rotator configuration and credential discovery

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::key::mask_secret;
use super::types::ProviderKind;

/// Highest `<PREFIX>_API_KEY_<n>` suffix scanned in the environment
pub const MAX_ENV_KEYS: usize = 9;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

/// Per-provider credentials and overrides
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// 1-based positions of keys that must never be used
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_keys: Vec<usize>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked: Vec<String> = self.keys.iter().map(|k| mask_secret(k)).collect();
        f.debug_struct("ProviderSettings")
            .field("keys", &masked)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("daily_limit", &self.daily_limit)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("disabled_keys", &self.disabled_keys)
            .finish()
    }
}

impl ProviderSettings {
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Whether at least one non-blank key is configured
    pub fn has_keys(&self) -> bool {
        self.keys.iter().any(|k| !k.trim().is_empty())
    }
}

/// Everything needed to build a [`super::ProviderRotator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotatorSettings {
    pub providers: BTreeMap<ProviderKind, ProviderSettings>,
    pub max_retries: u32,
    /// Sleep when no provider has an available key
    pub backoff: Duration,
}

impl Default for RotatorSettings {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RotatorSettings {
    /// Settings with only credentials, everything else at defaults
    pub fn from_keys(keys: BTreeMap<ProviderKind, Vec<String>>) -> Self {
        let mut settings = Self::default();
        settings.merge_keys(keys);
        settings
    }

    /// Fill in credentials for providers that have none configured
    pub fn merge_keys(&mut self, keys: BTreeMap<ProviderKind, Vec<String>>) {
        for (kind, found) in keys {
            if found.is_empty() {
                continue;
            }
            let entry = self.providers.entry(kind).or_default();
            if !entry.has_keys() {
                entry.keys = found;
            }
        }
    }
}

/// Discover credentials from `<PREFIX>_API_KEY_1..9` in the process environment
pub fn keys_from_env() -> BTreeMap<ProviderKind, Vec<String>> {
    keys_from_vars(std::env::vars())
}

/// Discover credentials from an arbitrary set of variables.
///
/// Keys are returned in suffix order; blank values are skipped and vendors
/// with no keys are omitted.
pub fn keys_from_vars<I, K, V>(vars: I) -> BTreeMap<ProviderKind, Vec<String>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let vars: HashMap<String, String> = vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();

    let mut found = BTreeMap::new();
    for kind in ProviderKind::ALL {
        let keys: Vec<String> = (1..=MAX_ENV_KEYS)
            .filter_map(|n| vars.get(&format!("{}_API_KEY_{}", kind.env_prefix(), n)))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        if !keys.is_empty() {
            found.insert(kind, keys);
        }
    }
    found
}
