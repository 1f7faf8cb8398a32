/// Refund protocol: self-serve signed refund authorizations, the
/// privileged force-refund path, and the deterministic payment status
/// check.
use alloy::primitives::B256;
use std::sync::Arc;
use tracing::info;

use crate::chain::ChainOracle;
use crate::config::REFUND_LEASE_TTL;
use crate::error::{RedeemerError, Result};
use crate::lease::{redemption_pending_key, refund_pending_key, LeaseStore};
use crate::signing::OracleSigner;
use crate::store::LedgerStore;
use payments_sdk::crypto::{commitment_of, decode_bytes32};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Redeemed,
    PendingRedemption,
    PendingRefund,
    Unredeemed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Redeemed => "redeemed",
            PaymentStatus::PendingRedemption => "pending-redemption",
            PaymentStatus::PendingRefund => "pending-refund",
            PaymentStatus::Unredeemed => "unredeemed",
        }
    }
}

pub struct RefundService {
    chain: Arc<dyn ChainOracle>,
    store: Arc<LedgerStore>,
    leases: Arc<dyn LeaseStore>,
    signer: Arc<OracleSigner>,
}

impl RefundService {
    pub fn new(
        chain: Arc<dyn ChainOracle>,
        store: Arc<LedgerStore>,
        leases: Arc<dyn LeaseStore>,
        signer: Arc<OracleSigner>,
    ) -> Self {
        Self {
            chain,
            store,
            leases,
            signer,
        }
    }

    /// Self-serve refund: mark the commitment refund-pending and hand
    /// back a signed authorization the payer submits to the contract
    /// directly. The contract re-checks the payment itself, so no
    /// chain read happens here.
    pub async fn request_refund(
        &self,
        secret_hex: &str,
        chain_id: u64,
        timestamp: u64,
    ) -> Result<String> {
        let secret = decode_bytes32(secret_hex)
            .map_err(|e| RedeemerError::Validation(e.to_string()))?;
        let commitment = B256::from(commitment_of(&secret));
        let commitment_hex = hex::encode(commitment);

        self.ensure_refundable(&commitment_hex).await?;

        if !self
            .leases
            .try_acquire(&refund_pending_key(&commitment_hex), REFUND_LEASE_TTL)
            .await
        {
            return Err(RedeemerError::Conflict("refund already pending".into()));
        }

        let signature = self.signer.sign_refund(commitment, chain_id, timestamp).await?;
        info!(
            "Refund authorization signed: commitment={}, chain={}",
            commitment_hex, chain_id
        );
        Ok(signature)
    }

    /// Privileged path: submit forceRefund through the operator wallet
    /// and block until it confirms. Safe to re-invoke after a failed
    /// submit; the lease plus the on-chain refunded flag prevent a
    /// double refund once the original transaction lands.
    pub async fn admin_force_refund(&self, commitment_hex: &str, chain_id: u64) -> Result<B256> {
        let commitment = B256::from(
            decode_bytes32(commitment_hex)
                .map_err(|e| RedeemerError::Validation(e.to_string()))?,
        );
        let commitment_hex = hex::encode(commitment);

        let payment = self
            .chain
            .payment(chain_id, commitment)
            .await?
            .ok_or_else(|| RedeemerError::NotFound("no payment found for commitment".into()))?;
        if payment.refunded {
            return Err(RedeemerError::Conflict("payment already refunded".into()));
        }

        self.ensure_refundable(&commitment_hex).await?;

        if !self
            .leases
            .try_acquire(&refund_pending_key(&commitment_hex), REFUND_LEASE_TTL)
            .await
        {
            return Err(RedeemerError::Conflict("refund already pending".into()));
        }

        let tx_hash = self.chain.force_refund(chain_id, commitment).await?;
        info!(
            "Force refund confirmed: commitment={}, chain={}, tx={}",
            commitment_hex, chain_id, tx_hash
        );
        Ok(tx_hash)
    }

    /// Deterministic check order; also the tie-break under races.
    pub async fn status(&self, commitment_hex: &str) -> PaymentStatus {
        if self.store.redemption_for(commitment_hex).await.is_some() {
            return PaymentStatus::Redeemed;
        }
        if self
            .leases
            .held(&redemption_pending_key(commitment_hex))
            .await
        {
            return PaymentStatus::PendingRedemption;
        }
        if self.leases.held(&refund_pending_key(commitment_hex)).await {
            return PaymentStatus::PendingRefund;
        }
        PaymentStatus::Unredeemed
    }

    /// Common gate: a redemption, pending or recorded, blocks both
    /// refund paths.
    async fn ensure_refundable(&self, commitment_hex: &str) -> Result<()> {
        if self.store.redemption_for(commitment_hex).await.is_some() {
            return Err(RedeemerError::Conflict("payment already redeemed".into()));
        }
        if self
            .leases
            .held(&redemption_pending_key(commitment_hex))
            .await
        {
            return Err(RedeemerError::Conflict("redemption pending".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChainOracle;
    use crate::chain::PaymentRecord;
    use crate::lease::MemoryLeaseStore;
    use crate::redemption::RedemptionService;
    use alloy::primitives::{Address, U256};
    use alloy::signers::local::PrivateKeySigner;
    use payments_sdk::crypto::random_secret;

    const CHAIN: u64 = 11155111;

    struct Fixture {
        chain: Arc<MockChainOracle>,
        redemption: RedemptionService,
        refund: RefundService,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MockChainOracle::new());
        let store = Arc::new(LedgerStore::in_memory());
        let leases = Arc::new(MemoryLeaseStore::new());
        let signer = Arc::new(OracleSigner::new(Arc::new(PrivateKeySigner::random())));
        Fixture {
            chain: chain.clone(),
            redemption: RedemptionService::new(chain.clone(), store.clone(), leases.clone()),
            refund: RefundService::new(chain, store, leases, signer),
        }
    }

    async fn paid_secret(fx: &Fixture) -> (String, String) {
        let secret = random_secret();
        let commitment = B256::from(commitment_of(&secret));
        fx.chain
            .put_payment(
                CHAIN,
                PaymentRecord {
                    commitment,
                    service: "sbt-mint".to_string(),
                    amount: U256::from(10_000_000_000_000_000u64),
                    payer: Address::with_last_byte(1),
                    paid_at: 1_700_000_000,
                    refunded: false,
                },
            )
            .await;
        (hex::encode(secret), hex::encode(commitment))
    }

    #[tokio::test]
    async fn test_refund_request_signs_and_sets_lease() {
        let fx = fixture();
        let (secret, commitment) = paid_secret(&fx).await;

        let signature = fx
            .refund
            .request_refund(&secret, CHAIN, 1_700_000_100)
            .await
            .unwrap();
        assert_eq!(hex::decode(&signature).unwrap().len(), 65);
        assert_eq!(fx.refund.status(&commitment).await, PaymentStatus::PendingRefund);

        // Second request while pending is terminal
        let err = fx
            .refund
            .request_refund(&secret, CHAIN, 1_700_000_200)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_refund_blocked_by_pending_redemption() {
        let fx = fixture();
        let (secret, _) = paid_secret(&fx).await;

        fx.redemption.reserve(&secret, CHAIN, "sbt-mint").await.unwrap();
        let err = fx
            .refund
            .request_refund(&secret, CHAIN, 1_700_000_100)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_refund_blocked_after_redemption() {
        let fx = fixture();
        let (secret, _) = paid_secret(&fx).await;

        let token = fx.redemption.reserve(&secret, CHAIN, "sbt-mint").await.unwrap();
        fx.redemption
            .complete(&token, "sbt-mint", "receipt-1")
            .await
            .unwrap();

        let err = fx
            .refund
            .request_refund(&secret, CHAIN, 1_700_000_100)
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_admin_force_refund_confirms_on_chain() {
        let fx = fixture();
        let (_, commitment) = paid_secret(&fx).await;

        let tx_hash = fx.refund.admin_force_refund(&commitment, CHAIN).await.unwrap();
        assert_ne!(tx_hash, B256::ZERO);
        assert!(
            fx.chain
                .refunded(CHAIN, B256::from(decode_bytes32(&commitment).unwrap()))
                .await
        );

        // A second call sees the refund pending (and, once the lease
        // expires, the refunded flag on-chain)
        let err = fx.refund.admin_force_refund(&commitment, CHAIN).await.unwrap_err();
        assert!(matches!(err, RedeemerError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_admin_force_refund_unknown_commitment() {
        let fx = fixture();
        let commitment = hex::encode(random_secret());
        let err = fx.refund.admin_force_refund(&commitment, CHAIN).await.unwrap_err();
        assert!(matches!(err, RedeemerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_moves_forward_through_redemption() {
        let fx = fixture();
        let (secret, commitment) = paid_secret(&fx).await;

        assert_eq!(fx.refund.status(&commitment).await, PaymentStatus::Unredeemed);

        let token = fx.redemption.reserve(&secret, CHAIN, "sbt-mint").await.unwrap();
        assert_eq!(
            fx.refund.status(&commitment).await,
            PaymentStatus::PendingRedemption
        );

        fx.redemption
            .complete(&token, "sbt-mint", "receipt-1")
            .await
            .unwrap();
        // The redemption-pending lease is still live, but the record
        // wins the deterministic check order
        assert_eq!(fx.refund.status(&commitment).await, PaymentStatus::Redeemed);
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let fx = fixture();
        let (secret, commitment) = paid_secret(&fx).await;

        let token = fx.redemption.reserve(&secret, CHAIN, "sbt-mint").await.unwrap();
        assert!(token.len() >= 32);

        let resolved = fx
            .redemption
            .complete(&token, "sbt-mint", "receipt-1")
            .await
            .unwrap();
        assert_eq!(resolved, commitment);
        assert_eq!(fx.refund.status(&commitment).await, PaymentStatus::Redeemed);

        let err = fx
            .redemption
            .reserve(&secret, CHAIN, "sbt-mint")
            .await
            .unwrap_err();
        assert!(matches!(err, RedeemerError::Conflict(_)));
    }
}
