//! Rotator state persistence
//!
//! Usage, key status and cursors survive restarts through a JSON document.
//! Credentials are never written; keys are matched back by position.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::key::KeyStatus;
use super::rotator::{ProviderRotator, RotatorStats};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub stats: RotatorStats,
    #[serde(default)]
    pub current_provider_index: usize,
    #[serde(default)]
    pub providers: Vec<PersistedProvider>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedProvider {
    pub name: String,
    #[serde(default)]
    pub current_key_index: usize,
    #[serde(default)]
    pub keys: Vec<PersistedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedKey {
    #[serde(default)]
    pub used_today: u64,
    #[serde(default = "Utc::now")]
    pub last_reset: DateTime<Utc>,
    #[serde(default = "default_status")]
    pub status: KeyStatus,
    #[serde(default)]
    pub error_count: u64,
}

fn default_status() -> KeyStatus {
    KeyStatus::Active
}

impl PersistedState {
    pub fn capture(rotator: &ProviderRotator) -> Self {
        Self {
            stats: rotator.stats().clone(),
            current_provider_index: rotator.current_provider_index(),
            providers: rotator
                .providers()
                .iter()
                .map(|p| PersistedProvider {
                    name: p.name().to_string(),
                    current_key_index: p.current_key_index(),
                    keys: p
                        .keys()
                        .iter()
                        .map(|k| PersistedKey {
                            used_today: k.used_today,
                            last_reset: k.last_reset,
                            status: k.status,
                            error_count: k.error_count,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Apply onto a freshly configured rotator.
    ///
    /// Unknown providers and surplus keys are ignored. Keys disabled by the
    /// current configuration stay disabled; a key persisted as disabled but
    /// no longer disabled in configuration comes back active.
    pub fn apply(self, rotator: &mut ProviderRotator) {
        rotator.set_stats(self.stats);
        rotator.set_current_provider_index(self.current_provider_index);

        for persisted in self.providers {
            let Some(provider) = rotator
                .providers_mut()
                .iter_mut()
                .find(|p| p.name() == persisted.name)
            else {
                debug!("Ignoring persisted state for unconfigured provider {}", persisted.name);
                continue;
            };

            provider.set_current_key_index(persisted.current_key_index);
            for (key, saved) in provider.keys_mut().iter_mut().zip(persisted.keys) {
                key.used_today = saved.used_today;
                key.last_reset = saved.last_reset;
                key.error_count = saved.error_count;
                key.status = match (key.status, saved.status) {
                    (KeyStatus::Disabled, _) => KeyStatus::Disabled,
                    (_, KeyStatus::Disabled) => KeyStatus::Active,
                    (_, status) => status,
                };
            }
        }
    }
}

impl ProviderRotator {
    /// Write usage, status and cursors to `path` as pretty JSON
    pub async fn save_state(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&PersistedState::capture(self))?;
        tokio::fs::write(path, json).await?;
        debug!("Saved rotator state to {}", path.display());
        Ok(())
    }

    /// Restore from `path`. Returns `Ok(false)` when there is no state file yet.
    pub async fn load_state(&mut self, path: &Path) -> Result<bool, StateError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting fresh", path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let state: PersistedState = serde_json::from_str(&contents)?;
        state.apply(self);
        info!("Loaded rotator state from {}", path.display());
        Ok(true)
    }

    /// Flush state and release the HTTP client
    pub async fn shutdown(self, state_path: Option<&Path>) -> Result<(), StateError> {
        if let Some(path) = state_path {
            self.save_state(path).await?;
        }
        info!(
            "Rotator shut down after {} requests ({} failed)",
            self.stats().total_requests,
            self.stats().failed_requests
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::provider::Provider;
    use crate::providers::settings::{ProviderSettings, RotatorSettings};
    use crate::providers::types::ProviderKind;
    use chrono::Duration;
    use reqwest::Client;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn rotator() -> ProviderRotator {
        ProviderRotator::from_providers(
            vec![
                Provider::new(ProviderKind::Gemini, ["g1", "g2"]).with_daily_limit(100_000),
                Provider::new(ProviderKind::Groq, ["q1"]),
            ],
            Client::new(),
        )
    }

    #[tokio::test]
    async fn test_missing_file_is_fresh_start() {
        let dir = TempDir::new().unwrap();
        let mut r = rotator();
        let loaded = r.load_state(&dir.path().join("absent.json")).await.unwrap();
        assert!(!loaded);
        assert_eq!(r.stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_save_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");
        rotator().save_state(&path).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_round_trip_restores_usage_and_cursors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut original = rotator();
        original.providers_mut()[0].keys_mut()[1].charge(1234);
        original.providers_mut()[0].keys_mut()[0].mark_rate_limited();
        original.providers_mut()[1].keys_mut()[0].record_error();
        original.providers_mut()[0].set_current_key_index(1);
        original.set_current_provider_index(1);
        let stats = RotatorStats {
            total_requests: 7,
            successful_requests: 6,
            failed_requests: 1,
            provider_usage: BTreeMap::from([("gemini".to_string(), 6)]),
        };
        original.set_stats(stats.clone());
        original.save_state(&path).await.unwrap();

        let mut restored = rotator();
        assert!(restored.load_state(&path).await.unwrap());

        assert_eq!(restored.stats(), &stats);
        assert_eq!(restored.current_provider_index(), 1);
        let gemini = &restored.providers()[0];
        assert_eq!(gemini.current_key_index(), 1);
        assert_eq!(gemini.keys()[0].status, KeyStatus::RateLimited);
        assert_eq!(gemini.keys()[1].used_today, 1234);
        assert_eq!(restored.providers()[1].keys()[0].error_count, 1);
    }

    #[tokio::test]
    async fn test_save_load_save_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");

        let mut original = rotator();
        original.providers_mut()[0].keys_mut()[0].charge(42);
        original.save_state(&first).await.unwrap();

        let mut restored = rotator();
        restored.load_state(&first).await.unwrap();
        restored.save_state(&second).await.unwrap();

        let a = tokio::fs::read_to_string(&first).await.unwrap();
        let b = tokio::fs::read_to_string(&second).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_stale_usage_resets_after_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let state = PersistedState {
            providers: vec![PersistedProvider {
                name: "gemini".into(),
                current_key_index: 0,
                keys: vec![PersistedKey {
                    used_today: 90_000,
                    last_reset: Utc::now() - Duration::hours(30),
                    status: KeyStatus::RateLimited,
                    error_count: 0,
                }],
            }],
            ..Default::default()
        };
        tokio::fs::write(&path, serde_json::to_string(&state).unwrap())
            .await
            .unwrap();

        let mut r = rotator();
        r.load_state(&path).await.unwrap();
        assert_eq!(r.providers()[0].keys()[0].used_today, 90_000);

        let key = &mut r.providers_mut()[0].keys_mut()[0];
        assert!(key.is_available());
        assert_eq!(key.used_today, 0);
        assert_eq!(key.status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn test_mismatched_state_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let json = r#"{
            "current_provider_index": 9,
            "providers": [
                {"name": "openai", "keys": [{"used_today": 5}]},
                {"name": "groq", "current_key_index": 4, "keys": [
                    {"used_today": 10, "status": "error", "error_count": 2},
                    {"used_today": 99}
                ]}
            ]
        }"#;
        tokio::fs::write(&path, json).await.unwrap();

        let mut r = rotator();
        assert!(r.load_state(&path).await.unwrap());

        assert_eq!(r.current_provider_index(), 1);
        let groq = &r.providers()[1];
        assert_eq!(groq.keys().len(), 1);
        assert_eq!(groq.current_key_index(), 0);
        assert_eq!(groq.keys()[0].used_today, 10);
        assert_eq!(groq.keys()[0].status, KeyStatus::Error);
        assert_eq!(r.providers()[0].keys()[0].used_today, 0);
    }

    #[tokio::test]
    async fn test_configured_disable_wins_over_persisted_status() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut before = rotator();
        before.providers_mut()[1].keys_mut()[0].disable();
        before.save_state(&path).await.unwrap();

        // Persisted disabled, no longer disabled in configuration
        let mut enabled = rotator();
        enabled.load_state(&path).await.unwrap();
        assert_eq!(enabled.providers()[1].keys()[0].status, KeyStatus::Active);

        // Disabled by configuration, persisted active
        let mut settings = RotatorSettings::default();
        settings.providers.insert(
            ProviderKind::Gemini,
            ProviderSettings {
                keys: vec!["g1".into(), "g2".into()],
                disabled_keys: vec![1],
                ..Default::default()
            },
        );
        let mut configured = ProviderRotator::new(&settings).unwrap();
        configured.load_state(&path).await.unwrap();
        assert_eq!(configured.providers()[0].keys()[0].status, KeyStatus::Disabled);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_json_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = rotator().load_state(&path).await.unwrap_err();
        assert!(matches!(err, StateError::Json(_)));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let mut r = rotator();
        r.providers_mut()[1].keys_mut()[0].charge(9);
        r.shutdown(Some(&path)).await.unwrap();

        let saved: PersistedState =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(saved.providers[1].keys[0].used_today, 9);
    }
}
