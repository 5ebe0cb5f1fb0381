//! Quota-aware rotation across free-tier LLM providers
//!
//! Each [`Provider`] owns a set of [`ApiKey`]s and a [`VendorAdapter`] for its
//! wire format. [`ProviderRotator`] spreads requests across providers and keys,
//! failing over on rate limits and errors until its retry budget runs out.

pub mod google;
pub mod huggingface;
pub mod key;
pub mod openai_compat;
pub mod provider;
pub mod report;
pub mod rotator;
pub mod settings;
pub mod state;
pub mod types;

pub use key::{ApiKey, KeyStatus};
pub use provider::Provider;
pub use report::{KeyReport, ProviderReport, StatusReport};
pub use rotator::{ProviderRotator, RotatorStats, SharedRotator};
pub use settings::{ProviderSettings, RotatorSettings, keys_from_env, keys_from_vars};
pub use state::{PersistedState, StateError};
pub use types::{
    AttemptError, GenerateError, Generation, Prompt, ProviderKind, SettingsError, TextGenerator,
    VendorAdapter,
};
