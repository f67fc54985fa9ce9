//! Volume-tiered fee engine.
//!
//! The fee schedule matches the bridge's tax policy: 60 bps up to $10k of
//! rolling monthly volume, 50 bps up to $100k, 30 bps above. The tier is
//! selected on the volume observed *before* the current operation is added,
//! so an operation never discounts itself.
//!
//! All USD values are fixed-point with 6 decimals (micro-USD). Prices come
//! from a caller-supplied [`PriceOracle`]; an oracle failure or zero price
//! blocks fee computation, it never defaults.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::types::FeeAsset;

/// Basis points divisor (100 bps = 1%).
const BPS_DENOMINATOR: u128 = 10_000;

/// The volume window resets 30 days after it was opened, matching the
/// on-chain tax manager. This is a reset window, not a sliding window.
const VOLUME_WINDOW_DAYS: i64 = 30;

/// Fee tier configuration, volume thresholds in micro-USD.
#[derive(Debug, Clone)]
pub struct FeeTierConfig {
    pub volume_threshold_1_usd: u128,
    pub volume_threshold_2_usd: u128,
    pub low_volume_fee_bps: u16,
    pub medium_volume_fee_bps: u16,
    pub high_volume_fee_bps: u16,
}

impl Default for FeeTierConfig {
    fn default() -> Self {
        Self {
            volume_threshold_1_usd: 10_000_000_000,  // $10,000
            volume_threshold_2_usd: 100_000_000_000, // $100,000
            low_volume_fee_bps: 60,
            medium_volume_fee_bps: 50,
            high_volume_fee_bps: 30,
        }
    }
}

impl FeeTierConfig {
    /// Select the fee tier for the volume accumulated *before* the current
    /// operation.
    pub fn fee_bps_for_volume(&self, volume_before_usd: u128) -> u16 {
        if volume_before_usd <= self.volume_threshold_1_usd {
            self.low_volume_fee_bps
        } else if volume_before_usd <= self.volume_threshold_2_usd {
            self.medium_volume_fee_bps
        } else {
            self.high_volume_fee_bps
        }
    }
}

/// Rolling fee-volume window, persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeWindow {
    pub window_start: DateTime<Utc>,
    pub volume_usd: u128,
}

impl VolumeWindow {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            volume_usd: 0,
        }
    }

    /// Return the window as observed at `now`, zeroed if it has expired.
    pub fn rolled(&self, now: DateTime<Utc>) -> Self {
        if now - self.window_start >= Duration::days(VOLUME_WINDOW_DAYS) {
            Self::new(now)
        } else {
            self.clone()
        }
    }
}

/// A frozen fee computation for one bridge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    pub fee_bps: u16,
    /// Operation value in micro-USD.
    pub amount_usd: u128,
    /// Fee value in micro-USD.
    pub fee_usd: u128,
    /// Fee in smallest units of `fee_asset`.
    pub fee_amount: u128,
    pub fee_asset: FeeAsset,
    /// Volume read the tier was selected from; stored on the record so
    /// recomputation before `FeeComputed` is left yields the same result.
    pub volume_before_usd: u128,
    pub new_volume_usd: u128,
}

#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("arithmetic overflow computing fee")]
    Overflow,
    #[error("price oracle returned zero price for {0}")]
    ZeroPrice(FeeAsset),
}

/// Convert a smallest-unit amount into micro-USD given a price in micro-USD
/// per whole token.
pub fn usd_value(amount: u128, decimals: u32, price_usd_micro: u128) -> Result<u128, FeeError> {
    amount
        .checked_mul(price_usd_micro)
        .map(|v| v / 10u128.pow(decimals))
        .ok_or(FeeError::Overflow)
}

/// Pure fee computation: `(operation value, prior rolling volume)` to
/// `(fee quote, new rolling volume)`. Stateless and idempotent.
pub fn compute_fee(
    config: &FeeTierConfig,
    amount_usd: u128,
    volume_before_usd: u128,
    fee_asset: FeeAsset,
    fee_asset_price_usd_micro: u128,
) -> Result<FeeQuote, FeeError> {
    if fee_asset_price_usd_micro == 0 {
        return Err(FeeError::ZeroPrice(fee_asset));
    }

    let fee_bps = config.fee_bps_for_volume(volume_before_usd);
    let fee_usd = amount_usd
        .checked_mul(fee_bps as u128)
        .map(|v| v / BPS_DENOMINATOR)
        .ok_or(FeeError::Overflow)?;

    let fee_amount = fee_usd
        .checked_mul(10u128.pow(fee_asset.decimals()))
        .map(|v| v / fee_asset_price_usd_micro)
        .ok_or(FeeError::Overflow)?;

    let new_volume_usd = volume_before_usd
        .checked_add(amount_usd)
        .ok_or(FeeError::Overflow)?;

    Ok(FeeQuote {
        fee_bps,
        amount_usd,
        fee_usd,
        fee_amount,
        fee_asset,
        volume_before_usd,
        new_volume_usd,
    })
}

/// USD price source for fee denomination. External collaborator: the
/// relayer never computes prices itself.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price of one whole token in micro-USD.
    async fn price_usd(&self, asset: FeeAsset) -> Result<u128, OracleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("oracle returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("oracle returned zero price for {0}")]
    ZeroPrice(FeeAsset),
}

/// Price oracle over a simple HTTP endpoint:
/// `GET {base_url}/price/{asset}` returning `{"price_usd_micro": "1000000"}`.
pub struct HttpPriceOracle {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price_usd_micro: String,
}

impl HttpPriceOracle {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn price_usd(&self, asset: FeeAsset) -> Result<u128, OracleError> {
        let url = format!("{}/price/{}", self.base_url, asset);
        let response: PriceResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let price: u128 = response
            .price_usd_micro
            .parse()
            .map_err(|_| OracleError::InvalidResponse(response.price_usd_micro.clone()))?;
        if price == 0 {
            return Err(OracleError::ZeroPrice(asset));
        }
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USD: u128 = 1_000_000; // $1 in micro-USD

    #[test]
    fn tier_selection_at_boundaries() {
        let config = FeeTierConfig::default();
        assert_eq!(config.fee_bps_for_volume(0), 60);
        assert_eq!(config.fee_bps_for_volume(10_000 * USD), 60); // inclusive
        assert_eq!(config.fee_bps_for_volume(10_000 * USD + 1), 50);
        assert_eq!(config.fee_bps_for_volume(100_000 * USD), 50); // inclusive
        assert_eq!(config.fee_bps_for_volume(100_000 * USD + 1), 30);
    }

    #[test]
    fn fee_bps_is_non_increasing_in_volume() {
        let config = FeeTierConfig::default();
        let mut last = u16::MAX;
        for volume in [0, 5_000, 10_000, 10_001, 50_000, 100_000, 100_001, 1_000_000] {
            let bps = config.fee_bps_for_volume(volume * USD);
            assert!(bps <= last, "tier increased at volume {}", volume);
            last = bps;
        }
    }

    #[test]
    fn tier_ignores_current_operation_amount() {
        // $9,999 prior volume + a $1M operation still pays the low-volume
        // tier: no self-referential discount.
        let config = FeeTierConfig::default();
        let quote = compute_fee(&config, 1_000_000 * USD, 9_999 * USD, FeeAsset::Usdt, USD).unwrap();
        assert_eq!(quote.fee_bps, 60);
        assert_eq!(quote.new_volume_usd, 1_009_999 * USD);
    }

    #[test]
    fn deposit_scenario_100_units_at_low_tier() {
        // 100 USDT at $1/unit with $5,000 prior volume: 60 bps -> 0.6 USDT.
        let config = FeeTierConfig::default();
        let amount_units: u128 = 100_000_000; // 100 USDT, 6 decimals
        let amount_usd = usd_value(amount_units, 6, USD).unwrap();
        assert_eq!(amount_usd, 100 * USD);

        let quote = compute_fee(&config, amount_usd, 5_000 * USD, FeeAsset::Usdt, USD).unwrap();
        assert_eq!(quote.fee_bps, 60);
        assert_eq!(quote.fee_usd, 600_000); // $0.60
        assert_eq!(quote.fee_amount, 600_000); // 0.6 USDT
        assert_eq!(amount_units - quote.fee_amount, 99_400_000); // 99.4 minted
        assert_eq!(quote.new_volume_usd, 5_100 * USD);
    }

    #[test]
    fn fee_in_settlement_asset_uses_its_price() {
        // $0.60 fee paid in LUNES at $0.50/LUNES = 1.2 LUNES (8 decimals).
        let config = FeeTierConfig::default();
        let quote = compute_fee(&config, 100 * USD, 0, FeeAsset::Lunes, 500_000).unwrap();
        assert_eq!(quote.fee_usd, 600_000);
        assert_eq!(quote.fee_amount, 120_000_000);
    }

    #[test]
    fn compute_fee_is_idempotent() {
        let config = FeeTierConfig::default();
        let a = compute_fee(&config, 42 * USD, 7 * USD, FeeAsset::Usdt, USD).unwrap();
        let b = compute_fee(&config, 42 * USD, 7 * USD, FeeAsset::Usdt, USD).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_price_is_rejected() {
        let config = FeeTierConfig::default();
        assert!(matches!(
            compute_fee(&config, 100 * USD, 0, FeeAsset::Usdt, 0),
            Err(FeeError::ZeroPrice(FeeAsset::Usdt))
        ));
    }

    #[test]
    fn volume_window_resets_after_30_days() {
        let start = Utc::now();
        let window = VolumeWindow {
            window_start: start,
            volume_usd: 500 * USD,
        };

        let inside = window.rolled(start + Duration::days(29));
        assert_eq!(inside.volume_usd, 500 * USD);

        let expired = window.rolled(start + Duration::days(30));
        assert_eq!(expired.volume_usd, 0);
        assert_eq!(expired.window_start, start + Duration::days(30));
    }

    #[test]
    fn usd_value_scales_by_decimals() {
        // 1.5 LUNES (8 decimals) at $0.50 = $0.75.
        assert_eq!(usd_value(150_000_000, 8, 500_000).unwrap(), 750_000);
    }
}
