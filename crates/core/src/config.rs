use std::path::Path;

use serde::Deserialize;

use crate::error::CampaignResult;

/// Root engine configuration. Loaded from an optional TOML/JSON file and
/// environment variables with the prefix `INAPP_ENGINE__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, before growth is applied.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: i32,
    /// Total attempts per backend call, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Jitter bounds added on "too many requests" responses.
    #[serde(default = "default_too_many_requests_lower_bound_secs")]
    pub too_many_requests_lower_bound_secs: u32,
    #[serde(default = "default_too_many_requests_upper_bound_secs")]
    pub too_many_requests_upper_bound_secs: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_initial_delay_ms() -> i32 {
    1_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_too_many_requests_lower_bound_secs() -> u32 {
    2
}
fn default_too_many_requests_upper_bound_secs() -> u32 {
    10
}
fn default_queue_capacity() -> usize {
    64
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_attempts: default_max_attempts(),
            too_many_requests_lower_bound_secs: default_too_many_requests_lower_bound_secs(),
            too_many_requests_upper_bound_secs: default_too_many_requests_upper_bound_secs(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional file, then environment variables.
    /// Environment values win.
    pub fn load(file: Option<&Path>) -> CampaignResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("INAPP_ENGINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
