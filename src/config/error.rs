//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Required in production: {0}")]
    RequiredInProduction(&'static str),

    #[error("Not allowed in production: {0}")]
    NotAllowedInProduction(&'static str),

    #[error("Invalid bind address: {0}")]
    InvalidHost(String),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid request timeout")]
    InvalidTimeout,

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("database.max_connections is {max}; background jobs need at least {needed}")]
    PoolTooSmallForWorkers { needed: u32, max: u32 },

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("Vault master key must be base64 encoding of 32 bytes")]
    InvalidVaultKey,

    #[error("Invalid Stripe API key format")]
    InvalidStripeKey,

    #[error("Invalid Stripe webhook secret format")]
    InvalidStripeWebhookSecret,
}
