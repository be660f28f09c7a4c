//! Gas estimation with bounded fees and replace-by-fee bumps

use super::intent::TransactionIntent;
use crate::chain::ChainClient;
use crate::config::GasConfig;
use crate::error::{OperatorError, OperatorResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, BlockNumber, U256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const GWEI: f64 = 1_000_000_000.0;
const BPS: u64 = 10_000;

/// Gas price types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GasPrice {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    /// Highest per-gas price the sender may pay
    pub fn max_price(&self) -> U256 {
        match self {
            GasPrice::Legacy { gas_price } => *gas_price,
            GasPrice::Eip1559 { max_fee_per_gas, .. } => *max_fee_per_gas,
        }
    }

    /// Tip offered to the block producer
    pub fn priority_fee(&self) -> U256 {
        match self {
            GasPrice::Legacy { gas_price } => *gas_price,
            GasPrice::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => *max_priority_fee_per_gas,
        }
    }

    /// Component-wise maximum; falls back to `self` when the kinds differ
    fn at_least(self, other: GasPrice) -> GasPrice {
        match (self, other) {
            (GasPrice::Legacy { gas_price: a }, GasPrice::Legacy { gas_price: b }) => {
                GasPrice::Legacy { gas_price: a.max(b) }
            }
            (
                GasPrice::Eip1559 {
                    max_fee_per_gas: a_max,
                    max_priority_fee_per_gas: a_tip,
                },
                GasPrice::Eip1559 {
                    max_fee_per_gas: b_max,
                    max_priority_fee_per_gas: b_tip,
                },
            ) => GasPrice::Eip1559 {
                max_fee_per_gas: a_max.max(b_max),
                max_priority_fee_per_gas: a_tip.max(b_tip),
            },
            (own, _) => own,
        }
    }
}

/// Fee and limit decision attached to one submission attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GasQuote {
    pub base_fee: Option<U256>,
    pub gas_price: GasPrice,
    pub estimated_gas: U256,
    pub gas_limit: U256,
    pub computed_at: DateTime<Utc>,
}

impl GasQuote {
    pub fn priority_fee(&self) -> U256 {
        self.gas_price.priority_fee()
    }

    /// Upper bound on what this attempt can cost in wei
    pub fn max_cost(&self) -> U256 {
        self.gas_limit.saturating_mul(self.gas_price.max_price())
    }

    pub fn is_stale(&self, window: Duration) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => Utc::now() - self.computed_at > window,
            Err(_) => false,
        }
    }
}

/// Computes gas quotes within the configured bounds
pub struct GasPolicy {
    client: Arc<dyn ChainClient>,
    multiplier_bps: u64,
    priority_floor: U256,
    ceiling: U256,
    bump_percent: u64,
    fixed_legacy_price: Option<U256>,
    quote_ttl: Duration,
}

fn gwei_to_wei(gwei: f64) -> U256 {
    U256::from((gwei * GWEI).round().max(0.0) as u128)
}

impl GasPolicy {
    pub fn new(client: Arc<dyn ChainClient>, config: &GasConfig) -> Self {
        Self {
            client,
            multiplier_bps: (config.multiplier * BPS as f64).round() as u64,
            priority_floor: gwei_to_wei(config.priority_fee_floor_gwei),
            ceiling: gwei_to_wei(config.max_fee_gwei),
            bump_percent: config.bump_percent,
            fixed_legacy_price: config.legacy_gas_price_gwei.map(gwei_to_wei),
            quote_ttl: Duration::from_secs(config.quote_ttl_secs),
        }
    }

    fn scale(&self, value: U256) -> U256 {
        value.saturating_mul(U256::from(self.multiplier_bps)) / U256::from(BPS)
    }

    /// Simulate the intent and price it
    pub async fn quote(&self, intent: &TransactionIntent, from: Address) -> OperatorResult<GasQuote> {
        let estimated_gas = self.client.estimate_gas(&intent.call_request(from)).await?;
        let buffered = self.scale(estimated_gas).max(estimated_gas);
        let gas_limit = buffered.saturating_add(intent.gas_headroom);

        let (base_fee, gas_price) = self.sample_fees().await?;

        debug!(
            kind = %intent.kind,
            %estimated_gas,
            %gas_limit,
            ?gas_price,
            "Computed gas quote"
        );

        Ok(GasQuote {
            base_fee,
            gas_price,
            estimated_gas,
            gas_limit,
            computed_at: Utc::now(),
        })
    }

    async fn sample_fees(&self) -> OperatorResult<(Option<U256>, GasPrice)> {
        if let Some(price) = self.fixed_legacy_price {
            return Ok((None, GasPrice::Legacy { gas_price: self.bounded(price)? }));
        }

        let base_fee = self
            .client
            .get_block(BlockNumber::Latest)
            .await?
            .and_then(|block| block.base_fee_per_gas);

        match base_fee {
            Some(base) => {
                let priority = self.priority_floor;
                if priority > self.ceiling {
                    return Err(self.ceiling_error(priority));
                }
                let max_fee = self.scale(base).saturating_add(priority).min(self.ceiling);
                Ok((
                    Some(base),
                    GasPrice::Eip1559 {
                        max_fee_per_gas: max_fee,
                        max_priority_fee_per_gas: priority,
                    },
                ))
            }
            None => {
                let network = self.client.gas_price().await?;
                let price = self.scale(network).max(self.priority_floor);
                Ok((None, GasPrice::Legacy { gas_price: self.bounded(price)? }))
            }
        }
    }

    fn bounded(&self, price: U256) -> OperatorResult<U256> {
        if self.priority_floor > self.ceiling {
            return Err(self.ceiling_error(self.priority_floor));
        }
        Ok(price.min(self.ceiling))
    }

    fn ceiling_error(&self, wanted: U256) -> OperatorError {
        OperatorError::GasCeiling(format!(
            "{} wei per gas exceeds the {} wei ceiling",
            wanted, self.ceiling
        ))
    }

    fn raise(&self, value: U256) -> U256 {
        let raised = value.saturating_mul(U256::from(self.bump_percent)) / U256::from(100u64);
        raised.max(value.saturating_add(U256::one()))
    }

    /// Replacement quote for the same nonce; the gas limit is kept
    pub fn bump(&self, previous: &GasQuote) -> OperatorResult<GasQuote> {
        let gas_price = match previous.gas_price {
            GasPrice::Legacy { gas_price } => GasPrice::Legacy {
                gas_price: self.raise(gas_price),
            },
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let priority = self.raise(max_priority_fee_per_gas);
                GasPrice::Eip1559 {
                    max_fee_per_gas: self.raise(max_fee_per_gas).max(priority),
                    max_priority_fee_per_gas: priority,
                }
            }
        };

        if gas_price.max_price() > self.ceiling {
            return Err(self.ceiling_error(gas_price.max_price()));
        }

        Ok(GasQuote {
            base_fee: previous.base_fee,
            gas_price,
            estimated_gas: previous.estimated_gas,
            gas_limit: previous.gas_limit,
            computed_at: Utc::now(),
        })
    }

    /// Bump, and also follow the market up when the previous quote is stale
    pub async fn bump_for_replacement(&self, previous: &GasQuote) -> OperatorResult<GasQuote> {
        let mut bumped = self.bump(previous)?;
        if previous.is_stale(self.quote_ttl) {
            let (base_fee, fresh) = self.sample_fees().await?;
            bumped.gas_price = bumped.gas_price.at_least(fresh);
            bumped.base_fee = base_fee.or(bumped.base_fee);
        }
        Ok(bumped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{BlockSummary, MockChainClient};
    use crate::tx::intent::IntentKind;
    use ethers::types::Bytes;

    fn gwei(value: u64) -> U256 {
        U256::from(value) * U256::exp10(9)
    }

    fn config() -> GasConfig {
        GasConfig {
            multiplier: 1.2,
            priority_fee_floor_gwei: 1.0,
            max_fee_gwei: 100.0,
            bump_percent: 125,
            quote_ttl_secs: 30,
            legacy_gas_price_gwei: None,
        }
    }

    fn block(base_fee: Option<U256>) -> BlockSummary {
        BlockSummary {
            number: 100,
            hash: None,
            timestamp: 1_700_000_000,
            base_fee_per_gas: base_fee,
            gas_used: U256::zero(),
            gas_limit: U256::from(30_000_000u64),
            transaction_count: 0,
        }
    }

    fn intent() -> TransactionIntent {
        TransactionIntent::new(IntentKind::Raw, Address::repeat_byte(1), Bytes::new())
    }

    fn mock(estimate: u64, base_fee: Option<U256>) -> MockChainClient {
        let mut mock = MockChainClient::new();
        mock.expect_estimate_gas()
            .returning(move |_| Ok(U256::from(estimate)));
        mock.expect_get_block()
            .returning(move |_| Ok(Some(block(base_fee))));
        mock.expect_gas_price().returning(|| Ok(gwei(3)));
        mock
    }

    #[tokio::test]
    async fn limit_is_buffered_with_headroom() {
        let policy = GasPolicy::new(Arc::new(mock(21_000, Some(gwei(10)))), &config());
        let quote = policy
            .quote(&intent().with_headroom(U256::from(1_000u64)), Address::zero())
            .await
            .unwrap();

        assert_eq!(quote.estimated_gas, U256::from(21_000u64));
        assert_eq!(quote.gas_limit, U256::from(26_200u64));
        assert!(quote.gas_limit >= quote.estimated_gas);
    }

    #[tokio::test]
    async fn eip1559_fees_follow_base_fee() {
        let policy = GasPolicy::new(Arc::new(mock(21_000, Some(gwei(10)))), &config());
        let quote = policy.quote(&intent(), Address::zero()).await.unwrap();

        assert_eq!(
            quote.gas_price,
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei(13),
                max_priority_fee_per_gas: gwei(1),
            }
        );
        assert_eq!(quote.base_fee, Some(gwei(10)));
    }

    #[tokio::test]
    async fn legacy_when_no_base_fee() {
        let policy = GasPolicy::new(Arc::new(mock(21_000, None)), &config());
        let quote = policy.quote(&intent(), Address::zero()).await.unwrap();

        assert_eq!(
            quote.gas_price,
            GasPrice::Legacy {
                gas_price: U256::from(3_600_000_000u64)
            }
        );
    }

    #[tokio::test]
    async fn fixed_legacy_price_skips_sampling() {
        let mut mock = MockChainClient::new();
        mock.expect_estimate_gas().returning(|_| Ok(U256::from(50_000u64)));
        mock.expect_get_block().never();
        let mut cfg = config();
        cfg.legacy_gas_price_gwei = Some(2.5);

        let policy = GasPolicy::new(Arc::new(mock), &cfg);
        let quote = policy.quote(&intent(), Address::zero()).await.unwrap();
        assert_eq!(quote.gas_price.max_price(), U256::from(2_500_000_000u64));
    }

    #[tokio::test]
    async fn max_fee_is_clamped_to_ceiling() {
        let mut cfg = config();
        cfg.max_fee_gwei = 5.0;
        let policy = GasPolicy::new(Arc::new(mock(21_000, Some(gwei(10)))), &cfg);
        let quote = policy.quote(&intent(), Address::zero()).await.unwrap();
        assert_eq!(quote.gas_price.max_price(), gwei(5));
    }

    #[tokio::test]
    async fn floor_above_ceiling_is_an_error() {
        let mut cfg = config();
        cfg.max_fee_gwei = 0.5;
        let policy = GasPolicy::new(Arc::new(mock(21_000, Some(gwei(10)))), &cfg);
        let err = policy.quote(&intent(), Address::zero()).await.unwrap_err();
        assert!(matches!(err, OperatorError::GasCeiling(_)));
    }

    #[tokio::test]
    async fn estimation_failure_is_surfaced() {
        let mut mock = MockChainClient::new();
        mock.expect_estimate_gas()
            .returning(|_| Err(OperatorError::Estimation("execution reverted".to_string())));
        let policy = GasPolicy::new(Arc::new(mock), &config());
        let err = policy.quote(&intent(), Address::zero()).await.unwrap_err();
        assert!(matches!(err, OperatorError::Estimation(_)));
    }

    #[tokio::test]
    async fn bump_is_strictly_higher_and_keeps_limit() {
        let policy = GasPolicy::new(Arc::new(mock(21_000, Some(gwei(10)))), &config());
        let quote = policy.quote(&intent(), Address::zero()).await.unwrap();
        let bumped = policy.bump(&quote).unwrap();

        assert_eq!(bumped.gas_limit, quote.gas_limit);
        assert!(bumped.priority_fee() > quote.priority_fee());
        assert!(bumped.gas_price.max_price() > quote.gas_price.max_price());
        assert_eq!(bumped.priority_fee(), U256::from(1_250_000_000u64));
    }

    #[test]
    fn bump_of_zero_still_increases() {
        let policy = GasPolicy::new(Arc::new(MockChainClient::new()), &config());
        let quote = GasQuote {
            base_fee: None,
            gas_price: GasPrice::Legacy {
                gas_price: U256::zero(),
            },
            estimated_gas: U256::from(21_000u64),
            gas_limit: U256::from(25_200u64),
            computed_at: Utc::now(),
        };
        assert_eq!(policy.bump(&quote).unwrap().gas_price.max_price(), U256::one());
    }

    #[test]
    fn bump_past_ceiling_fails() {
        let policy = GasPolicy::new(Arc::new(MockChainClient::new()), &config());
        let quote = GasQuote {
            base_fee: Some(gwei(50)),
            gas_price: GasPrice::Eip1559 {
                max_fee_per_gas: gwei(90),
                max_priority_fee_per_gas: gwei(2),
            },
            estimated_gas: U256::from(21_000u64),
            gas_limit: U256::from(25_200u64),
            computed_at: Utc::now(),
        };
        assert!(matches!(
            policy.bump(&quote),
            Err(OperatorError::GasCeiling(_))
        ));
    }
}
