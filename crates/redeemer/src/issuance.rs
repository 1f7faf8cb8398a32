/// Bulk pre-committed secret issuance for partner accounts. The whole
/// batch is admitted or rejected up front: limits and prices are
/// checked before the first secret is generated, so an over-limit call
/// persists nothing.
use alloy::primitives::B256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::{DAILY_WINDOW, HOURLY_WINDOW, MAX_BATCH_SIZE};
use crate::error::{RedeemerError, Result};
use crate::lease::{rate_window_key, LeaseStore};
use crate::price::PriceOracle;
use crate::store::{unix_now, CommitmentSource, IssuedSecretRecord, LedgerStore};
use payments_sdk::crypto::{commitment_of, random_secret};
use payments_sdk::issuance::IssuedSecret;

pub struct IssuanceService {
    store: Arc<LedgerStore>,
    leases: Arc<dyn LeaseStore>,
    price: Arc<PriceOracle>,
    service_prices: HashMap<String, f64>,
    hourly_limit: u64,
    daily_limit: u64,
}

impl IssuanceService {
    pub fn new(
        store: Arc<LedgerStore>,
        leases: Arc<dyn LeaseStore>,
        price: Arc<PriceOracle>,
        service_prices: HashMap<String, f64>,
        hourly_limit: u64,
        daily_limit: u64,
    ) -> Self {
        Self {
            store,
            leases,
            price,
            service_prices,
            hourly_limit,
            daily_limit,
        }
    }

    pub async fn issue(
        &self,
        partner: &str,
        count: u32,
        chain_id: u64,
        service: &str,
    ) -> Result<Vec<IssuedSecret>> {
        if count == 0 || count > MAX_BATCH_SIZE {
            return Err(RedeemerError::Validation(format!(
                "batch size must be 1..={}, got {}",
                MAX_BATCH_SIZE, count
            )));
        }

        let usd_amount = self
            .service_prices
            .get(service)
            .copied()
            .ok_or_else(|| RedeemerError::NotFound(format!("unknown service '{}'", service)))?;

        // Capacity is consumed atomically up front: a concurrent batch
        // for the same partner cannot slip past the window while this
        // one is still generating. A failed batch hands it back.
        self.admit(partner, count as u64).await?;

        match self.generate(partner, count, chain_id, service, usd_amount).await {
            Ok(issued) => {
                info!(
                    "Issued {} secrets for partner {} (service={}, chain={})",
                    count, partner, service, chain_id
                );
                Ok(issued)
            }
            Err(e) => {
                self.leases
                    .counter_sub(&rate_window_key(partner, "hourly"), count as u64)
                    .await;
                self.leases
                    .counter_sub(&rate_window_key(partner, "daily"), count as u64)
                    .await;
                Err(e)
            }
        }
    }

    async fn admit(&self, partner: &str, amount: u64) -> Result<()> {
        let hourly = rate_window_key(partner, "hourly");
        if !self
            .leases
            .counter_try_add(&hourly, amount, self.hourly_limit, HOURLY_WINDOW)
            .await
        {
            return Err(RedeemerError::RateLimited(format!(
                "hourly issuance limit reached ({}/{} used, {} requested)",
                self.leases.counter_peek(&hourly).await,
                self.hourly_limit,
                amount
            )));
        }

        let daily = rate_window_key(partner, "daily");
        if !self
            .leases
            .counter_try_add(&daily, amount, self.daily_limit, DAILY_WINDOW)
            .await
        {
            // Release the hourly capacity the rejected batch took
            self.leases.counter_sub(&hourly, amount).await;
            return Err(RedeemerError::RateLimited(format!(
                "daily issuance limit reached ({}/{} used, {} requested)",
                self.leases.counter_peek(&daily).await,
                self.daily_limit,
                amount
            )));
        }
        Ok(())
    }

    async fn generate(
        &self,
        partner: &str,
        count: u32,
        chain_id: u64,
        service: &str,
        usd_amount: f64,
    ) -> Result<Vec<IssuedSecret>> {
        // Generate everything before persisting anything, so a feed or
        // signing failure mid-batch leaves no partial issuance
        let mut issued = Vec::with_capacity(count as usize);
        let mut rows = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let secret = random_secret();
            let commitment = commitment_of(&secret);
            let quote = self
                .price
                .quote(usd_amount, chain_id, B256::from(commitment), service)
                .await?;

            issued.push(IssuedSecret {
                secret: hex::encode(secret),
                commitment: hex::encode(commitment),
                quote,
            });
            rows.push(IssuedSecretRecord {
                commitment: hex::encode(commitment),
                secret: hex::encode(secret),
                partner: partner.to_string(),
                created_at: unix_now(),
            });
        }

        for row in &rows {
            self.store
                .get_or_create_commitment(&row.commitment, CommitmentSource::Credits)
                .await?;
        }
        self.store.insert_issued_secrets(rows).await?;
        Ok(issued)
    }
}
