//! Tool configuration.

use crate::Args;
use anyhow::{bail, Context, Result};
use ergo_network::{NetworkSettings, MAINNET_MAGIC, TESTNET_MAGIC};
use ergo_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration: wire limits plus synchronizer settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    pub network: NetworkSettings,
    pub sync: SyncConfig,
}

impl WireConfig {
    /// Load from `config_path` if it exists, then apply CLI overrides.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        if let Some(ref network) = args.network {
            config.network.magic = magic_for(network)?;
        }
        if let Some(max) = args.max_inv_objects {
            config.network.max_inv_objects = max;
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

fn magic_for(network: &str) -> Result<[u8; 4]> {
    match network.to_lowercase().as_str() {
        "mainnet" => Ok(MAINNET_MAGIC),
        "testnet" => Ok(TESTNET_MAGIC),
        other => bail!("Unknown network: {}", other),
    }
}
