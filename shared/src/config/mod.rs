pub mod loader;

pub use loader::{
    DestinationConfig, FlushConfig, MemoryConfig, ObservabilityConfig, StreamConfig,
    TidewaterConfig,
};

use std::path::Path;

use crate::error::TidewaterError;

/// Load configuration from a TOML file with environment-variable overrides.
///
/// Resolution order:
/// 1. `config/default.toml`: base configuration
/// 2. `config/{env}.toml`: environment overlay (development, testing, production)
/// 3. Environment variables with prefix `TIDEWATER_` (double underscore for nesting)
///
/// # Example
///
/// `TIDEWATER_FLUSH__WORKER_POOL_SIZE=8` overrides `flush.worker_pool_size`.
pub fn load_config(config_dir: &Path, env: &str) -> Result<TidewaterConfig, TidewaterError> {
    let settings = config::Config::builder()
        .add_source(config::File::from(config_dir.join("default.toml")).required(true))
        .add_source(config::File::from(config_dir.join(format!("{}.toml", env))).required(false))
        .add_source(
            config::Environment::with_prefix("TIDEWATER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| TidewaterError::ConfigLoadFailed(Box::new(e)))?;

    let cfg: TidewaterConfig = settings
        .try_deserialize()
        .map_err(|e| TidewaterError::ConfigLoadFailed(Box::new(e)))?;
    cfg.validate()?;
    Ok(cfg)
}
