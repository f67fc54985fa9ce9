//! Environment-driven configuration.

use std::time::Duration;

use eyre::{eyre, Result, WrapErr};

use crate::address;
use crate::fees::FeeTierConfig;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,

    pub solana_rpc_url: String,
    pub solana_custody_address: String,
    pub solana_required_confirmations: u32,
    pub solana_start_slot: u64,
    pub solana_poll_interval: Duration,

    pub lunes_rpc_url: String,
    pub lunes_required_confirmations: u32,
    pub lunes_start_block: u64,
    pub lunes_poll_interval: Duration,

    pub oracle_url: String,
    pub oracle_timeout: Duration,

    pub api_bind: String,
    /// Cumulative mint volume allowed per hour, in LUSDT smallest units.
    /// Zero disables the cap.
    pub max_mint_volume_per_hour: u128,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub scan_interval: Duration,
    pub watcher_max_range: u64,
    pub rpc_timeout: Duration,

    pub fee_tiers: FeeTierConfig,
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).wrap_err_with(|| format!("missing required env var {}", name))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| eyre!("env var {} has invalid value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let fee_tiers = FeeTierConfig {
            volume_threshold_1_usd: parsed("FEE_VOLUME_THRESHOLD_1_USD", 10_000_000_000)?,
            volume_threshold_2_usd: parsed("FEE_VOLUME_THRESHOLD_2_USD", 100_000_000_000)?,
            low_volume_fee_bps: parsed("FEE_LOW_VOLUME_BPS", 60)?,
            medium_volume_fee_bps: parsed("FEE_MEDIUM_VOLUME_BPS", 50)?,
            high_volume_fee_bps: parsed("FEE_HIGH_VOLUME_BPS", 30)?,
        };

        let config = Self {
            database_url: required("DATABASE_URL")?,
            solana_rpc_url: required("SOLANA_RPC_URL")?,
            solana_custody_address: required("SOLANA_CUSTODY_ADDRESS")?,
            solana_required_confirmations: parsed("SOLANA_REQUIRED_CONFIRMATIONS", 32)?,
            solana_start_slot: parsed("SOLANA_START_SLOT", 0)?,
            solana_poll_interval: Duration::from_secs(parsed("SOLANA_POLL_INTERVAL_SECS", 5)?),
            lunes_rpc_url: required("LUNES_RPC_URL")?,
            lunes_required_confirmations: parsed("LUNES_REQUIRED_CONFIRMATIONS", 12)?,
            lunes_start_block: parsed("LUNES_START_BLOCK", 0)?,
            lunes_poll_interval: Duration::from_secs(parsed("LUNES_POLL_INTERVAL_SECS", 6)?),
            oracle_url: required("PRICE_ORACLE_URL")?,
            oracle_timeout: Duration::from_secs(parsed("PRICE_ORACLE_TIMEOUT_SECS", 10)?),
            api_bind: optional("API_BIND", "0.0.0.0:8080"),
            max_mint_volume_per_hour: parsed("MAX_MINT_VOLUME_PER_HOUR", 0)?,
            breaker_threshold: parsed("CIRCUIT_BREAKER_THRESHOLD", 5)?,
            breaker_cooldown: Duration::from_secs(parsed("CIRCUIT_BREAKER_COOLDOWN_SECS", 60)?),
            scan_interval: Duration::from_secs(parsed("SCAN_INTERVAL_SECS", 30)?),
            watcher_max_range: parsed("WATCHER_MAX_RANGE", 500)?,
            rpc_timeout: Duration::from_secs(parsed("RPC_TIMEOUT_SECS", 30)?),
            fee_tiers,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.solana_required_confirmations == 0 || self.lunes_required_confirmations == 0 {
            return Err(eyre!("required confirmations must be at least 1"));
        }
        if self.watcher_max_range == 0 {
            return Err(eyre!("WATCHER_MAX_RANGE must be at least 1"));
        }
        if self.breaker_threshold == 0 {
            return Err(eyre!("CIRCUIT_BREAKER_THRESHOLD must be at least 1"));
        }
        address::validate_solana(&self.solana_custody_address)
            .map_err(|e| eyre!("SOLANA_CUSTODY_ADDRESS: {}", e))?;
        if self.fee_tiers.volume_threshold_1_usd >= self.fee_tiers.volume_threshold_2_usd {
            return Err(eyre!("fee volume thresholds must be increasing"));
        }
        Ok(())
    }
}

// Redact connection strings; they carry credentials.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("solana_rpc_url", &self.solana_rpc_url)
            .field("solana_custody_address", &self.solana_custody_address)
            .field(
                "solana_required_confirmations",
                &self.solana_required_confirmations,
            )
            .field("lunes_rpc_url", &self.lunes_rpc_url)
            .field(
                "lunes_required_confirmations",
                &self.lunes_required_confirmations,
            )
            .field("oracle_url", &self.oracle_url)
            .field("api_bind", &self.api_bind)
            .field("max_mint_volume_per_hour", &self.max_mint_volume_per_hour)
            .field("scan_interval", &self.scan_interval)
            .finish_non_exhaustive()
    }
}
