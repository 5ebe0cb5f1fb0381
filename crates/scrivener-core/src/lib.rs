//! scrivener-core - rotation of text generation across free-tier LLM APIs
//!
//! This crate provides:
//! - Per-key daily quota tracking with lazy 24h resets
//! - Vendor adapters for Gemini, Groq, NVIDIA, Z.ai and Hugging Face
//! - A rotator that fails over between providers and keys
//! - JSON persistence of usage and cursors, plus an operator status report

pub mod providers;

// Re-export main types for convenience
pub use providers::{
    ApiKey, GenerateError, Generation, KeyStatus, Prompt, Provider, ProviderKind,
    ProviderRotator, ProviderSettings, RotatorSettings, SharedRotator, StateError, StatusReport,
    TextGenerator, keys_from_env,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rotator_usable_from_crate_root() {
        let mut settings = RotatorSettings::default();
        settings.providers.insert(
            ProviderKind::Groq,
            ProviderSettings {
                keys: vec!["gsk_1".into(), "gsk_2".into()],
                disabled_keys: vec![2],
                ..Default::default()
            },
        );
        let mut rotator = ProviderRotator::new(&settings).unwrap();

        let report = rotator.status_report();
        assert_eq!(report.available_keys(), 1);

        let empty = ProviderRotator::new(&RotatorSettings::default()).unwrap();
        let shared = SharedRotator::new(empty);
        let generator: &dyn TextGenerator = &shared;
        let err = generator.generate(&Prompt::new("hi")).await.unwrap_err();
        assert_eq!(err, GenerateError::AllProvidersExhausted);
    }
}
