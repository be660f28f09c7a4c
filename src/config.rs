//! Configuration management for the EVM operator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment flag that force-enables write operations
pub const ENABLE_WRITE_ENV: &str = "EVM_OPERATOR_ENABLE_WRITE";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub submitter: SubmitterConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_rpc_max_attempts")]
    pub rpc_max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    /// Safety multiplier applied to both gas limit and base fee
    #[serde(default = "default_gas_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_priority_fee_floor_gwei")]
    pub priority_fee_floor_gwei: f64,
    #[serde(default = "default_max_fee_gwei")]
    pub max_fee_gwei: f64,
    /// Replace-by-fee step, in percent of the previous fee
    #[serde(default = "default_bump_percent")]
    pub bump_percent: u64,
    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,
    /// Fixed legacy gas price; disables fee sampling when set
    #[serde(default)]
    pub legacy_gas_price_gwei: Option<f64>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            multiplier: default_gas_multiplier(),
            priority_fee_floor_gwei: default_priority_fee_floor_gwei(),
            max_fee_gwei: default_max_fee_gwei(),
            bump_percent: default_bump_percent(),
            quote_ttl_secs: default_quote_ttl_secs(),
            legacy_gas_price_gwei: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitterConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
    #[serde(default = "default_max_bumps")]
    pub max_bumps: u32,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            stall_timeout_secs: default_stall_timeout_secs(),
            max_bumps: default_max_bumps(),
            confirmations: default_confirmations(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl SubmitterConfig {
    /// Upper bound for a caller blocking on one submission: every bump
    /// window plus time for the confirmations to accrue
    pub fn wait_timeout(&self) -> Duration {
        let stall = self.stall_timeout_secs * (u64::from(self.max_bumps) + 1);
        let finality = self.max_poll_interval_ms / 1_000 * self.confirmations.max(1);
        Duration::from_secs(stall + finality)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub write_enabled: bool,
    /// Operation kinds that may be dispatched at all; `*` allows every kind
    #[serde(default = "default_enabled_operations")]
    pub enabled_operations: Vec<String>,
    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,
    #[serde(default = "default_rate_limit_window_ms")]
    pub rate_limit_window_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            write_enabled: false,
            enabled_operations: default_enabled_operations(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_ms: default_rate_limit_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractsConfig {
    pub multicall_address: Option<Address>,
    pub router_address: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_url: String::new(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_rpc_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_private_key_env() -> String {
    "EVM_OPERATOR_PRIVATE_KEY".to_string()
}
fn default_gas_multiplier() -> f64 {
    1.2
}
fn default_priority_fee_floor_gwei() -> f64 {
    1.0
}
fn default_max_fee_gwei() -> f64 {
    500.0
}
fn default_bump_percent() -> u64 {
    125
}
fn default_quote_ttl_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_max_poll_interval_ms() -> u64 {
    10_000
}
fn default_stall_timeout_secs() -> u64 {
    180
}
fn default_max_bumps() -> u32 {
    3
}
fn default_confirmations() -> u64 {
    1
}
fn default_retention_secs() -> u64 {
    3_600
}
fn default_enabled_operations() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_rate_limit_max_requests() -> u32 {
    5
}
fn default_rate_limit_window_ms() -> u64 {
    1_000
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8765
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_max_connections() -> u32 {
    5
}
fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Settings {
    /// Load settings from the configured file
    pub fn load() -> Result<Self> {
        let config_path = env::var("EVM_OPERATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let mut settings = Self::parse(&config_str)?;

        if env_flag_set(ENABLE_WRITE_ENV) {
            settings.gate.write_enabled = true;
        }

        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.is_empty() {
            anyhow::bail!("chain.rpc_url must be set");
        }
        if self.chain.rpc_max_attempts == 0 {
            anyhow::bail!("chain.rpc_max_attempts must be at least 1");
        }
        if self.gas.multiplier < 1.0 {
            anyhow::bail!("gas.multiplier must be >= 1.0, got {}", self.gas.multiplier);
        }
        if self.gas.bump_percent < 110 {
            anyhow::bail!(
                "gas.bump_percent must be >= 110 to be accepted as a replacement, got {}",
                self.gas.bump_percent
            );
        }
        if self.gas.priority_fee_floor_gwei > self.gas.max_fee_gwei {
            anyhow::bail!("gas.priority_fee_floor_gwei exceeds gas.max_fee_gwei");
        }
        if self.submitter.poll_interval_ms == 0 || self.submitter.stall_timeout_secs == 0 {
            anyhow::bail!("submitter intervals must be non-zero");
        }
        if self.gate.rate_limit_max_requests == 0 || self.gate.rate_limit_window_ms == 0 {
            anyhow::bail!("gate rate limit must allow at least one request per window");
        }
        if self.audit.enabled && self.audit.database_url.is_empty() {
            anyhow::bail!("audit.database_url is required when audit is enabled");
        }
        if self.gate.write_enabled && self.contracts.router_address.is_none() {
            tracing::warn!("No router address configured - swaps need an explicit router");
        }

        Ok(())
    }
}

fn env_flag_set(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .context("Invalid substitution pattern")?;

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [chain]
        chain_id = 1114
        rpc_url = "https://rpc.test2.btcs.network"
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("EVM_OPERATOR_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${EVM_OPERATOR_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let settings = Settings::parse(MINIMAL).unwrap();
        assert_eq!(settings.chain.chain_id, 1114);
        assert_eq!(settings.chain.rpc_max_attempts, 3);
        assert!(!settings.gate.write_enabled);
        assert_eq!(settings.gate.enabled_operations, vec!["*".to_string()]);
        assert_eq!(settings.gas.bump_percent, 125);
        assert_eq!(settings.submitter.max_bumps, 3);
        assert_eq!(settings.logging.format, LogFormat::Text);
        assert!(settings.contracts.multicall_address.is_none());
    }

    #[test]
    fn rejects_bump_below_replacement_minimum() {
        let text = format!("{}\n[gas]\nbump_percent = 105\n", MINIMAL);
        assert!(Settings::parse(&text).is_err());
    }

    #[test]
    fn rejects_multiplier_below_one() {
        let text = format!("{}\n[gas]\nmultiplier = 0.9\n", MINIMAL);
        assert!(Settings::parse(&text).is_err());
    }

    #[test]
    fn loads_from_file_with_addresses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "{}\n[contracts]\nmulticall_address = \"0xcA11bde05977b3631167028862bE2a173976CA11\"\n[gate]\nrate_limit_max_requests = 10",
            MINIMAL
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert!(settings.contracts.multicall_address.is_some());
        assert_eq!(settings.gate.rate_limit_max_requests, 10);
    }
}
