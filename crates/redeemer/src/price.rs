/// Price oracle: USD → native token amount per chain, quoted from a
/// short-TTL cached feed with a static fallback, then signed so the
/// escrow contract can trust it.
use alloy::primitives::utils::parse_units;
use alloy::primitives::{B256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ChainSettings;
use crate::error::{RedeemerError, Result};
use crate::signing::OracleSigner;
use crate::store::unix_now;
use payments_sdk::quote::PriceQuote;

const FEED_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PriceOracle {
    chains: HashMap<u64, ChainSettings>,
    feed_url: String,
    cache_ttl: Duration,
    signer: Arc<OracleSigner>,
    http: reqwest::Client,
    /// chain id → (USD price, fetched at)
    cache: RwLock<HashMap<u64, (f64, Instant)>>,
}

impl PriceOracle {
    pub fn new(
        chains: HashMap<u64, ChainSettings>,
        feed_url: String,
        cache_ttl: Duration,
        signer: Arc<OracleSigner>,
    ) -> Self {
        Self {
            chains,
            feed_url,
            cache_ttl,
            signer,
            http: reqwest::Client::builder()
                .timeout(FEED_TIMEOUT)
                .build()
                .unwrap_or_default(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Signed quote for `usd_amount` worth of the chain's native token,
    /// bound to the commitment the caller will pay with.
    pub async fn quote(
        &self,
        usd_amount: f64,
        chain_id: u64,
        commitment: B256,
        service: &str,
    ) -> Result<PriceQuote> {
        let native_usd = self.native_price_usd(chain_id).await?;
        let amount = token_amount(usd_amount, native_usd)?;
        let timestamp = unix_now();

        let signature = self
            .signer
            .sign_quote(amount, commitment, service, chain_id, timestamp)
            .await?;

        Ok(PriceQuote {
            price: amount.to_string(),
            signature,
            timestamp,
        })
    }

    /// Cache → feed → static fallback, failing only when all three
    /// miss.
    pub async fn native_price_usd(&self, chain_id: u64) -> Result<f64> {
        let settings = self
            .chains
            .get(&chain_id)
            .ok_or_else(|| RedeemerError::NotFound(format!("unknown chain id {}", chain_id)))?;

        {
            let cache = self.cache.read().await;
            if let Some((price, fetched_at)) = cache.get(&chain_id) {
                if fetched_at.elapsed() < self.cache_ttl {
                    return Ok(*price);
                }
            }
        }

        match self.fetch_feed_price(&settings.asset_id).await {
            Ok(price) => {
                self.cache
                    .write()
                    .await
                    .insert(chain_id, (price, Instant::now()));
                info!("Feed price for chain {}: {} USD", chain_id, price);
                Ok(price)
            }
            Err(e) => {
                warn!(
                    "Price feed failed for chain {} ({}), using fallback {} USD",
                    chain_id, e, settings.fallback_usd
                );
                if settings.fallback_usd > 0.0 {
                    Ok(settings.fallback_usd)
                } else {
                    Err(RedeemerError::Upstream(format!(
                        "no price available for chain {}",
                        chain_id
                    )))
                }
            }
        }
    }

    async fn fetch_feed_price(&self, asset_id: &str) -> Result<f64> {
        let url = format!("{}?ids={}&vs_currencies=usd", self.feed_url, asset_id);
        let body: HashMap<String, HashMap<String, f64>> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RedeemerError::Upstream(e.to_string()))?
            .error_for_status()
            .map_err(|e| RedeemerError::Upstream(e.to_string()))?
            .json()
            .await
            .map_err(|e| RedeemerError::Upstream(e.to_string()))?;

        body.get(asset_id)
            .and_then(|prices| prices.get("usd"))
            .copied()
            .filter(|p| *p > 0.0)
            .ok_or_else(|| RedeemerError::Upstream(format!("feed returned no price for {}", asset_id)))
    }

    #[cfg(test)]
    pub async fn prime_cache(&self, chain_id: u64, price: f64) {
        self.cache
            .write()
            .await
            .insert(chain_id, (price, Instant::now()));
    }
}

/// Convert a USD amount to wei of the native token. The division is
/// rounded to exactly 18 decimal places before fixed-point parsing;
/// anything finer would underflow the 18-decimal representation.
pub fn token_amount(usd_amount: f64, native_usd: f64) -> Result<U256> {
    if usd_amount <= 0.0 {
        return Err(RedeemerError::Validation("amount must be positive".into()));
    }
    if native_usd <= 0.0 {
        return Err(RedeemerError::Upstream("non-positive native price".into()));
    }

    let tokens = usd_amount / native_usd;
    let rounded = format!("{:.18}", tokens);
    let parsed = parse_units(&rounded, 18)
        .map_err(|e| RedeemerError::Internal(format!("fixed-point encode failed: {}", e)))?;
    Ok(parsed.get_absolute())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;

    fn oracle_with(chains: HashMap<u64, ChainSettings>, feed_url: &str) -> PriceOracle {
        let signer = Arc::new(OracleSigner::new(Arc::new(PrivateKeySigner::random())));
        PriceOracle::new(chains, feed_url.to_string(), Duration::from_secs(90), signer)
    }

    fn one_chain(fallback_usd: f64) -> HashMap<u64, ChainSettings> {
        let mut chains = HashMap::new();
        chains.insert(
            1,
            ChainSettings {
                rpc_url: "http://localhost:8545".to_string(),
                escrow: alloy::primitives::Address::ZERO,
                asset_id: "ethereum".to_string(),
                fallback_usd,
            },
        );
        chains
    }

    #[test]
    fn test_token_amount_rounding_survives_encoding() {
        // 5 USD at 3000 USD/token = 0.001666... tokens; the repeating
        // expansion must round to 18 places and encode cleanly
        let amount = token_amount(5.0, 3000.0).unwrap();
        assert!(amount > U256::ZERO);
        // ~1.666e15 wei
        assert!(amount > U256::from(1_600_000_000_000_000u64));
        assert!(amount < U256::from(1_700_000_000_000_000u64));
    }

    #[test]
    fn test_token_amount_exact_division() {
        // 3000 USD at 3000 USD/token = exactly 1 token
        let amount = token_amount(3000.0, 3000.0).unwrap();
        assert_eq!(amount, U256::from(10u64).pow(U256::from(18u64)));
    }

    #[test]
    fn test_token_amount_rejects_bad_inputs() {
        assert!(token_amount(0.0, 3000.0).is_err());
        assert!(token_amount(-1.0, 3000.0).is_err());
        assert!(token_amount(5.0, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_cached_price_skips_feed() {
        // Feed URL is unroutable, so only the cache can answer
        let oracle = oracle_with(one_chain(0.0), "http://127.0.0.1:9/price");
        oracle.prime_cache(1, 2500.0).await;
        assert_eq!(oracle.native_price_usd(1).await.unwrap(), 2500.0);
    }

    #[tokio::test]
    async fn test_fallback_when_feed_unreachable() {
        let oracle = oracle_with(one_chain(3000.0), "http://127.0.0.1:9/price");
        assert_eq!(oracle.native_price_usd(1).await.unwrap(), 3000.0);
    }

    #[tokio::test]
    async fn test_error_when_all_sources_miss() {
        let oracle = oracle_with(one_chain(0.0), "http://127.0.0.1:9/price");
        let err = oracle.native_price_usd(1).await.unwrap_err();
        assert!(matches!(err, RedeemerError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_unknown_chain_is_not_found() {
        let oracle = oracle_with(one_chain(3000.0), "http://127.0.0.1:9/price");
        let err = oracle.native_price_usd(99).await.unwrap_err();
        assert!(matches!(err, RedeemerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_quote_is_signed() {
        let oracle = oracle_with(one_chain(3000.0), "http://127.0.0.1:9/price");
        let quote = oracle
            .quote(5.0, 1, B256::with_last_byte(1), "sbt-mint")
            .await
            .unwrap();
        assert_eq!(hex::decode(&quote.signature).unwrap().len(), 65);
        assert!(quote.price.parse::<u128>().unwrap() > 0);
    }
}
