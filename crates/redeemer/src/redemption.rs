/// Reserve / complete / cancel orchestration. A reservation binds one
/// fulfillment attempt to one commitment through a single-use opaque
/// token; the durable RedemptionRecord is the permanent guard, the
/// leases only fence what is currently in flight.
use alloy::primitives::B256;
use rand::RngCore;
use std::sync::Arc;
use tracing::info;

use crate::chain::ChainOracle;
use crate::config::{REDEMPTION_LEASE_TTL, RESERVATION_TTL};
use crate::error::{RedeemerError, Result};
use crate::lease::{redemption_pending_key, refund_pending_key, reservation_key, LeaseStore};
use crate::store::{CommitmentSource, LedgerStore};
use payments_sdk::crypto::{commitment_of, decode_bytes32};

pub struct RedemptionService {
    chain: Arc<dyn ChainOracle>,
    store: Arc<LedgerStore>,
    leases: Arc<dyn LeaseStore>,
}

impl RedemptionService {
    pub fn new(
        chain: Arc<dyn ChainOracle>,
        store: Arc<LedgerStore>,
        leases: Arc<dyn LeaseStore>,
    ) -> Self {
        Self {
            chain,
            store,
            leases,
        }
    }

    /// Reserve the payment behind `secret` for one fulfillment
    /// attempt. Exactly one of any number of concurrent reserves for
    /// the same commitment wins; the losers see Conflict.
    pub async fn reserve(&self, secret_hex: &str, chain_id: u64, service: &str) -> Result<String> {
        let secret = decode_bytes32(secret_hex)
            .map_err(|e| RedeemerError::Validation(e.to_string()))?;
        let commitment = B256::from(commitment_of(&secret));
        let commitment_hex = hex::encode(commitment);

        let payment = self
            .chain
            .payment(chain_id, commitment)
            .await?
            .ok_or_else(|| RedeemerError::NotFound("no payment found for commitment".into()))?;

        if payment.refunded {
            return Err(RedeemerError::Conflict("payment already refunded".into()));
        }
        if payment.service != service {
            return Err(RedeemerError::Conflict(format!(
                "payment is for service '{}', not '{}'",
                payment.service, service
            )));
        }

        let record = self
            .store
            .get_or_create_commitment(&commitment_hex, CommitmentSource::User)
            .await?;

        // Terminal, not retry-worthy: the payment was consumed
        if self.store.redemption_for(&commitment_hex).await.is_some() {
            return Err(RedeemerError::Conflict("payment already redeemed".into()));
        }

        if self.leases.held(&refund_pending_key(&commitment_hex)).await {
            return Err(RedeemerError::Conflict(
                "refund pending for this payment".into(),
            ));
        }

        if !self
            .leases
            .try_acquire(&redemption_pending_key(&commitment_hex), REDEMPTION_LEASE_TTL)
            .await
        {
            return Err(RedeemerError::Conflict(
                "reservation already pending, cancel it first".into(),
            ));
        }

        // The token is the only handle handed out; the commitment
        // never leaves the service past this point, so a leaked token
        // cannot be replayed against another commitment
        let token = mint_token();
        self.leases
            .put(&reservation_key(&token), &commitment_hex, RESERVATION_TTL)
            .await;

        info!(
            "Reserved payment: commitment_id={}, chain={}, service={}",
            record.id, chain_id, service
        );
        Ok(token)
    }

    /// Consume the reservation token and record the redemption.
    /// Intentionally leaves the redemption-pending lease to expire on
    /// its own as a replay cooldown; clearing it here would reopen a
    /// race with a concurrent reserve.
    pub async fn complete(
        &self,
        reservation_token: &str,
        service: &str,
        fulfillment_receipt: &str,
    ) -> Result<String> {
        let commitment_hex = self
            .leases
            .resolve_and_consume(&reservation_key(reservation_token))
            .await
            .ok_or_else(|| {
                RedeemerError::NotFound("unknown or expired reservation token".into())
            })?;

        let record = self
            .store
            .commitment(&commitment_hex)
            .await
            .ok_or_else(|| RedeemerError::Internal("reservation without commitment".into()))?;

        // Guards double resolution racing ahead of mapping deletion;
        // the unique insert below would catch it anyway
        if self.store.redemption_for(&commitment_hex).await.is_some() {
            return Err(RedeemerError::Conflict("payment already redeemed".into()));
        }

        let redemption = self
            .store
            .insert_redemption(record.id, service, fulfillment_receipt)
            .await?;

        info!(
            "Redemption complete: commitment_id={}, redemption_id={}, service={}",
            record.id, redemption.id, service
        );
        Ok(commitment_hex)
    }

    /// Consume the token and release the redemption-pending lease,
    /// making the commitment immediately reservable again.
    pub async fn cancel(&self, reservation_token: &str) -> Result<String> {
        let commitment_hex = self
            .leases
            .resolve_and_consume(&reservation_key(reservation_token))
            .await
            .ok_or_else(|| {
                RedeemerError::NotFound("unknown or expired reservation token".into())
            })?;

        self.leases
            .release(&redemption_pending_key(&commitment_hex))
            .await;

        info!("Reservation cancelled: commitment={}", commitment_hex);
        Ok(commitment_hex)
    }
}

fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
