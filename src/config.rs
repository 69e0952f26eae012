//! Configuration management for the HTLC relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub evm: HashMap<String, EvmChainConfig>,
    pub cosmos: CosmosConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    /// Seconds to wait for an EVM transaction receipt before giving up.
    pub confirm_timeout_secs: u64,
    /// Escape hatch: force this gas limit onto every deploy/withdraw
    /// transaction instead of letting the node estimate.
    pub gas_limit_override: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// One EVM chain the relayer deploys escrows on.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub private_key: String,
    pub resolver_address: String,
    pub escrow_factory_address: String,
    pub limit_order_address: String,
    pub enabled: bool,
}

/// The Cosmos leg: RPC endpoint plus the signing identity.
#[derive(Debug, Clone, Deserialize)]
pub struct CosmosConfig {
    pub rpc_endpoint: String,
    pub prefix: String,
    pub mnemonic: String,
    /// Decimal price with denom suffix, e.g. "0.025uosmo".
    pub gas_price: String,
    pub escrow_factory_address: String,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_evm_chains().is_empty() {
            anyhow::bail!("At least one EVM chain must be enabled");
        }

        for (name, chain) in &self.evm {
            if !chain.enabled {
                continue;
            }
            if chain.rpc_url.is_empty() {
                anyhow::bail!("EVM chain {} has no RPC URL configured", name);
            }
            if chain.private_key.is_empty() {
                anyhow::bail!("EVM chain {} has no private key configured", name);
            }
            if chain.resolver_address.is_empty()
                || chain.escrow_factory_address.is_empty()
                || chain.limit_order_address.is_empty()
            {
                anyhow::bail!(
                    "EVM chain {} needs resolver, escrow factory and limit order addresses",
                    name
                );
            }
        }

        if self.cosmos.rpc_endpoint.is_empty() {
            anyhow::bail!("Cosmos RPC endpoint is not configured");
        }
        if self.cosmos.mnemonic.is_empty() {
            anyhow::bail!("Cosmos mnemonic is not configured");
        }
        if self.cosmos.escrow_factory_address.is_empty() {
            anyhow::bail!("Cosmos escrow factory address is not configured");
        }

        Ok(())
    }

    /// Get list of enabled EVM chains
    pub fn enabled_evm_chains(&self) -> Vec<(&String, &EvmChainConfig)> {
        self.evm.iter().filter(|(_, c)| c.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
