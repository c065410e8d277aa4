use std::path::Path;

use anyhow::{Context, Result};
use config::{Environment, File};
use tracing::info;

use crate::models::common::Config;
use crate::models::errors::DecodeError;

/// Parses a JSON-RPC hex quantity such as `"0x10"`.
pub fn hex_to_u64(hex: &str) -> Result<u64, DecodeError> {
    let digits = hex
        .strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .ok_or_else(|| DecodeError::InvalidHex {
            got: hex.to_string(),
        })?;

    u64::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidHex {
        got: hex.to_string(),
    })
}

/// Loads the config file (if present) and layers `WATCHER__*` environment
/// variables on top, e.g. `WATCHER__SERVER__PORT=9000`.
pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    let config_path = file_name.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    let config: Config = config::Config::builder()
        .add_source(File::from(config_path).required(false))
        .add_source(Environment::with_prefix("WATCHER").separator("__"))
        .build()
        .context("failed to read config")?
        .try_deserialize()
        .context("failed to parse config")?;

    config.validate().context("invalid config")?;

    Ok(config)
}
