use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long a reservation holds a commitment before it self-heals.
pub const REDEMPTION_LEASE_TTL: Duration = Duration::from_secs(5 * 60);
/// Refund leases live longer: the payer has to submit on-chain.
pub const REFUND_LEASE_TTL: Duration = Duration::from_secs(10 * 60);
/// Reservation token lifetime (matches the redemption lease).
pub const RESERVATION_TTL: Duration = Duration::from_secs(5 * 60);

/// Hard cap on a single batch-issuance call.
pub const MAX_BATCH_SIZE: u32 = 1000;

pub const HOURLY_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const DAILY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-chain settings: where to read payments, which native asset
/// prices them, and what to assume when the feed is down.
#[derive(Clone, Debug, Deserialize)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Payment escrow contract address
    pub escrow: Address,
    /// Price-feed asset id for the chain's native token
    pub asset_id: String,
    /// Static fallback price in USD when cache and feed both miss
    pub fallback_usd: f64,
}

#[derive(Clone)]
pub struct RedeemerConfig {
    pub chains: HashMap<u64, ChainSettings>,
    /// USD price per service
    pub service_prices: HashMap<String, f64>,
    /// Key that signs price quotes and refund authorizations
    pub oracle_signer: Arc<PrivateKeySigner>,
    /// Wallet that submits admin force-refund transactions
    pub operator_signer: Arc<PrivateKeySigner>,
    pub api_key: String,
    pub admin_api_key: String,
    pub host: String,
    pub port: u16,
    pub price_feed_url: String,
    pub price_cache_ttl: Duration,
    /// Per-partner issuance limits (secrets per window)
    pub hourly_secret_limit: u64,
    pub daily_secret_limit: u64,
    /// Optional snapshot path for the durable ledger
    pub ledger_path: Option<std::path::PathBuf>,
}

impl RedeemerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let chains: HashMap<u64, ChainSettings> = match std::env::var("CHAINS") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Failed to parse CHAINS: {}", e))?,
            Err(_) => {
                tracing::warn!("CHAINS not set, defaulting to Sepolia only");
                let mut map = HashMap::new();
                map.insert(
                    11155111,
                    ChainSettings {
                        rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
                        escrow: Address::ZERO,
                        asset_id: "ethereum".to_string(),
                        fallback_usd: 3000.0,
                    },
                );
                map
            }
        };

        let service_prices: HashMap<String, f64> = match std::env::var("SERVICE_PRICES_USD") {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Failed to parse SERVICE_PRICES_USD: {}", e))?,
            Err(_) => {
                let mut map = HashMap::new();
                map.insert("sbt-mint".to_string(), 5.0);
                map
            }
        };

        let oracle_signer = load_signer("ORACLE_KEY")?;
        let operator_signer = match std::env::var("OPERATOR_KEY") {
            Ok(_) => load_signer("OPERATOR_KEY")?,
            Err(_) => {
                tracing::warn!(
                    "OPERATOR_KEY not set! Using the oracle key as the operator wallet. \
                     Set OPERATOR_KEY to a separate funded wallet for force-refunds."
                );
                oracle_signer.clone()
            }
        };

        let api_key = std::env::var("API_KEY").unwrap_or_else(|_| {
            tracing::warn!("API_KEY not set, using insecure development key");
            "dev-api-key".to_string()
        });
        let admin_api_key = std::env::var("ADMIN_API_KEY").unwrap_or_else(|_| {
            tracing::warn!("ADMIN_API_KEY not set, using insecure development key");
            "dev-admin-key".to_string()
        });

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8080);

        let price_feed_url = std::env::var("PRICE_FEED_URL")
            .unwrap_or_else(|_| "https://api.coingecko.com/api/v3/simple/price".to_string());
        let price_cache_ttl = std::env::var("PRICE_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(90));

        let hourly_secret_limit = std::env::var("HOURLY_SECRET_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);
        let daily_secret_limit = std::env::var("DAILY_SECRET_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20_000);

        let ledger_path = std::env::var("LEDGER_PATH")
            .ok()
            .map(std::path::PathBuf::from);

        Ok(Self {
            chains,
            service_prices,
            oracle_signer,
            operator_signer,
            api_key,
            admin_api_key,
            host,
            port,
            price_feed_url,
            price_cache_ttl,
            hourly_secret_limit,
            daily_secret_limit,
            ledger_path,
        })
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainSettings> {
        self.chains.get(&chain_id)
    }

    pub fn service_price_usd(&self, service: &str) -> Option<f64> {
        self.service_prices.get(service).copied()
    }
}

fn load_signer(var: &str) -> anyhow::Result<Arc<PrivateKeySigner>> {
    match std::env::var(var) {
        Ok(raw) => {
            let signer: PrivateKeySigner = raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid {}: {}", var, e))?;
            tracing::info!("{} wallet: {}", var, signer.address());
            Ok(Arc::new(signer))
        }
        Err(_) => {
            let signer = PrivateKeySigner::random();
            tracing::warn!(
                "{} not set, generated ephemeral key {} (quotes signed before a restart \
                 will not verify afterwards)",
                var,
                signer.address()
            );
            Ok(Arc::new(signer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_settings_json() {
        let raw = r#"{
            "11155111": {
                "rpc_url": "http://localhost:8545",
                "escrow": "0x000000000000000000000000000000000000dEaD",
                "asset_id": "ethereum",
                "fallback_usd": 2500.0
            }
        }"#;
        let chains: HashMap<u64, ChainSettings> = serde_json::from_str(raw).unwrap();
        let chain = chains.get(&11155111).unwrap();
        assert_eq!(chain.asset_id, "ethereum");
        assert_eq!(chain.fallback_usd, 2500.0);
    }

    #[test]
    fn test_lease_ttls_are_asymmetric() {
        // Refund leases must outlive redemption leases so a refund in
        // flight blocks a reservation for its whole window
        assert!(REFUND_LEASE_TTL > REDEMPTION_LEASE_TTL);
        assert_eq!(RESERVATION_TTL, REDEMPTION_LEASE_TTL);
    }
}
