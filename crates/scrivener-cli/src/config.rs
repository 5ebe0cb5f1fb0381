use anyhow::{Context, Result};
use scrivener_core::providers::key::mask_secret;
use scrivener_core::providers::settings::{DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES, MAX_ENV_KEYS};
use scrivener_core::{ProviderKind, ProviderSettings, RotatorSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrivenerConfig {
    #[serde(default)]
    pub rotator: RotatorConfig,
    /// Keyed by vendor name: gemini, groq, nvidia, zai, huggingface
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotatorConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            state_path: default_state_path(),
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_backoff_secs() -> u64 {
    DEFAULT_BACKOFF.as_secs()
}

fn default_state_path() -> String {
    "~/.scrivener/state.json".to_string()
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scrivener")
}

impl ScrivenerConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        // API keys live here, so refuse group/other-readable files
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain API keys. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `scrivener init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content, |name| std::env::var(name).ok())
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    /// Parse TOML, then expand `${VAR}` references in key lists and paths
    pub fn parse(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;

        for (name, provider) in &mut config.providers {
            if provider.keys.iter().any(|k| !k.is_empty() && !k.contains("${")) {
                warn!(
                    "API key for {} is hardcoded in config file. For security, use environment variables: keys = [\"${{{}_API_KEY_1}}\"]",
                    name,
                    name.to_uppercase()
                );
            }
            provider.keys = provider
                .keys
                .iter()
                .map(|k| expand_env_vars(k, &lookup).trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if let Some(base_url) = &provider.base_url {
                provider.base_url = Some(expand_env_vars(base_url, &lookup));
            }
        }
        config.rotator.state_path = expand_env_vars(&config.rotator.state_path, &lookup);

        Ok(config)
    }

    /// Typed rotator settings. Env keys fill in vendors with no configured keys.
    pub fn rotator_settings(
        &self,
        env_keys: BTreeMap<ProviderKind, Vec<String>>,
    ) -> Result<RotatorSettings> {
        let mut providers = BTreeMap::new();
        for (name, settings) in &self.providers {
            let kind: ProviderKind = name
                .parse()
                .with_context(|| format!("Invalid [providers.{}] section", name))?;
            providers.insert(kind, settings.clone());
        }

        let mut settings = RotatorSettings {
            providers,
            max_retries: self.rotator.max_retries,
            backoff: Duration::from_secs(self.rotator.backoff_secs),
        };
        settings.merge_keys(env_keys);
        Ok(settings)
    }

    pub fn state_path(&self) -> PathBuf {
        expand_home(&self.rotator.state_path)
    }

    /// Copy that is safe to print
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        for provider in masked.providers.values_mut() {
            provider.keys = provider.keys.iter().map(|k| mask_secret(k)).collect();
        }
        masked
    }
}

/// Whether `${name}` may be expanded from the environment
fn is_allowed_env_var(name: &str) -> bool {
    if matches!(name, "HOME" | "USER") {
        return true;
    }
    ProviderKind::ALL.iter().any(|kind| {
        name.strip_prefix(kind.env_prefix())
            .and_then(|rest| rest.strip_prefix("_API_KEY_"))
            .and_then(|n| n.parse::<usize>().ok())
            .is_some_and(|n| (1..=MAX_ENV_KEYS).contains(&n))
    })
}

fn expand_env_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !is_allowed_env_var(&var_name) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

fn expand_home(s: &str) -> PathBuf {
    match s.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(s),
        },
        None => PathBuf::from(s),
    }
}
