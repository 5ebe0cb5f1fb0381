//! Operator-facing status snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::key::KeyStatus;
use super::provider::Provider;
use super::rotator::RotatorStats;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub stats: RotatorStats,
    pub providers: Vec<ProviderReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub name: String,
    pub model: String,
    pub total_keys: usize,
    pub available_keys: usize,
    pub keys: Vec<KeyReport>,
}

/// Per-key usage; never includes the credential itself
#[derive(Debug, Clone, Serialize)]
pub struct KeyReport {
    /// 1-based position within the provider
    pub index: usize,
    pub status: KeyStatus,
    pub used_today: u64,
    pub remaining: u64,
    pub error_count: u64,
}

impl StatusReport {
    pub(crate) fn collect(stats: &RotatorStats, providers: &mut [Provider]) -> Self {
        let providers = providers
            .iter_mut()
            .map(|provider| {
                let keys: Vec<KeyReport> = provider
                    .keys_mut()
                    .iter_mut()
                    .enumerate()
                    .map(|(i, key)| {
                        // Read remaining first so a due reset is reflected in the status
                        let remaining = key.remaining();
                        KeyReport {
                            index: i + 1,
                            status: key.status,
                            used_today: key.used_today,
                            remaining,
                            error_count: key.error_count,
                        }
                    })
                    .collect();
                ProviderReport {
                    name: provider.name().to_string(),
                    model: provider.model().to_string(),
                    total_keys: keys.len(),
                    available_keys: keys
                        .iter()
                        .filter(|k| k.status == KeyStatus::Active && k.remaining > 0)
                        .count(),
                    keys,
                }
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            stats: stats.clone(),
            providers,
        }
    }

    /// Keys usable right now, across all providers
    pub fn available_keys(&self) -> usize {
        self.providers.iter().map(|p| p.available_keys).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::types::ProviderKind;
    use chrono::Duration;

    #[test]
    fn test_report_counts_available_keys() {
        let mut providers = vec![
            Provider::new(ProviderKind::Groq, ["a", "b", "c"]).with_daily_limit(100),
            Provider::new(ProviderKind::Zai, ["z"]),
        ];
        providers[0].keys_mut()[0].charge(40);
        providers[0].keys_mut()[1].mark_rate_limited();
        providers[0].keys_mut()[2].charge(100);

        let report = StatusReport::collect(&RotatorStats::default(), &mut providers);

        let groq = &report.providers[0];
        assert_eq!(groq.name, "groq");
        assert_eq!(groq.model, "llama-3.3-70b-versatile");
        assert_eq!(groq.total_keys, 3);
        assert_eq!(groq.available_keys, 1);
        assert_eq!(groq.keys[0].index, 1);
        assert_eq!(groq.keys[0].remaining, 60);
        assert_eq!(groq.keys[1].status, KeyStatus::RateLimited);
        assert_eq!(groq.keys[2].remaining, 0);
        assert_eq!(report.available_keys(), 2);
    }

    #[test]
    fn test_report_applies_due_reset() {
        let mut providers = vec![Provider::new(ProviderKind::Gemini, ["g"])];
        {
            let key = &mut providers[0].keys_mut()[0];
            key.mark_rate_limited();
            key.charge(500);
            key.last_reset = Utc::now() - Duration::hours(25);
        }

        let report = StatusReport::collect(&RotatorStats::default(), &mut providers);

        let key = &report.providers[0].keys[0];
        assert_eq!(key.status, KeyStatus::Active);
        assert_eq!(key.used_today, 0);
        assert_eq!(key.remaining, 1_500_000);
    }

    #[test]
    fn test_report_json_has_no_secrets() {
        let mut providers = vec![Provider::new(ProviderKind::Groq, ["gsk_very_secret_key"])];
        let report = StatusReport::collect(&RotatorStats::default(), &mut providers);
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("gsk_very_secret_key"));
        assert!(json.contains(r#""status":"active""#));
    }
}
