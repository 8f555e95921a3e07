use refraction_lifecycle::LifecycleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Tunnel limit reached ({limit} active)")]
    AtCapacity { limit: usize },

    #[error("Manager is shutting down: {0}")]
    ShuttingDown(LifecycleError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
