//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables with the
//! `config` and `dotenvy` crates. Variables use the `RENEWALS` prefix and
//! `__` between nested keys.
//!
//! # Example
//!
//! ```no_run
//! use subscription_renewals::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod billing;
mod database;
mod error;
mod gateway;
mod server;
mod vault;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use gateway::GatewayConfig;
pub use server::{Environment, ServerConfig};
pub use vault::VaultConfig;

use serde::Deserialize;

/// Pool connections kept free for queries and webhook traffic.
const POOL_HEADROOM: u32 = 4;

/// Root application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL connection; in-memory storage when no URL is set
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub billing: BillingConfig,

    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub gateways: GatewayConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Loads `.env` if present, then reads `RENEWALS__*` variables:
    ///
    /// - `RENEWALS__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `RENEWALS__BILLING__GRACE_DAYS=7` -> `billing.grace_days = 7`
    /// - `RENEWALS__BILLING__RETRY_INTERVALS_DAYS=1,3,7` -> list
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("RENEWALS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("billing.retry_intervals_days")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let production = self.is_production();
        self.server.validate()?;
        self.database.validate()?;
        if production && !self.database.is_configured() {
            return Err(ValidationError::RequiredInProduction("DATABASE__URL"));
        }
        self.billing.validate()?;
        if self.database.is_configured() && self.billing.run_background_jobs {
            // Scheduler and retry runner each hold up to `concurrency` lock
            // connections while their queries draw from the same pool.
            let needed = u32::try_from(self.billing.concurrency)
                .unwrap_or(u32::MAX)
                .saturating_mul(2)
                .saturating_add(POOL_HEADROOM);
            if needed > self.database.max_connections {
                return Err(ValidationError::PoolTooSmallForWorkers {
                    needed,
                    max: self.database.max_connections,
                });
            }
        }
        self.vault.validate(production)?;
        self.gateways.validate(production)?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
