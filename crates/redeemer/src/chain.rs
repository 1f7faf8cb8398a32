/// Read/write access to the escrow contract's payment state. The
/// contract is the trust anchor: this service only reads payment
/// records and, for privileged refunds, submits forceRefund through
/// the operator wallet.
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::ChainSettings;
use crate::error::{RedeemerError, Result};

sol! {
    #[sol(rpc)]
    interface PaymentEscrow {
        function payments(bytes32 commitment)
            external
            view
            returns (
                bytes32 storedCommitment,
                string service,
                uint256 amount,
                address payer,
                uint256 paidAt,
                bool refunded
            );

        function forceRefund(bytes32 commitment) external;
    }
}

/// Chain-resident payment record. Immutable once written except
/// `refunded`, which flips false → true exactly once.
#[derive(Clone, Debug)]
pub struct PaymentRecord {
    pub commitment: B256,
    pub service: String,
    pub amount: U256,
    pub payer: Address,
    pub paid_at: u64,
    pub refunded: bool,
}

#[async_trait]
pub trait ChainOracle: Send + Sync {
    /// Fetch the payment record for a commitment; `None` when no
    /// payment exists on that chain.
    async fn payment(&self, chain_id: u64, commitment: B256) -> Result<Option<PaymentRecord>>;

    /// Submit forceRefund via the operator wallet and wait for the
    /// transaction to confirm. Returns the transaction hash.
    async fn force_refund(&self, chain_id: u64, commitment: B256) -> Result<B256>;
}

pub struct EvmChainOracle {
    chains: HashMap<u64, ChainSettings>,
    operator: Arc<PrivateKeySigner>,
}

impl EvmChainOracle {
    pub fn new(chains: HashMap<u64, ChainSettings>, operator: Arc<PrivateKeySigner>) -> Self {
        Self { chains, operator }
    }

    fn settings(&self, chain_id: u64) -> Result<&ChainSettings> {
        self.chains
            .get(&chain_id)
            .ok_or_else(|| RedeemerError::NotFound(format!("unknown chain id {}", chain_id)))
    }
}

#[async_trait]
impl ChainOracle for EvmChainOracle {
    async fn payment(&self, chain_id: u64, commitment: B256) -> Result<Option<PaymentRecord>> {
        let settings = self.settings(chain_id)?;
        let url = settings
            .rpc_url
            .parse()
            .map_err(|e| RedeemerError::Internal(format!("Bad RPC url: {}", e)))?;
        let provider = ProviderBuilder::new().on_http(url);
        let escrow = PaymentEscrow::new(settings.escrow, provider);

        let record = escrow
            .payments(commitment)
            .call()
            .await
            .map_err(|e| RedeemerError::Upstream(format!("payment lookup failed: {}", e)))?;

        // The mapping returns a zeroed struct for unknown commitments
        if record.storedCommitment == B256::ZERO {
            return Ok(None);
        }

        Ok(Some(PaymentRecord {
            commitment: record.storedCommitment,
            service: record.service,
            amount: record.amount,
            payer: record.payer,
            paid_at: record.paidAt.saturating_to::<u64>(),
            refunded: record.refunded,
        }))
    }

    async fn force_refund(&self, chain_id: u64, commitment: B256) -> Result<B256> {
        let settings = self.settings(chain_id)?;
        let url = settings
            .rpc_url
            .parse()
            .map_err(|e| RedeemerError::Internal(format!("Bad RPC url: {}", e)))?;
        let wallet = EthereumWallet::from((*self.operator).clone());
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);
        let escrow = PaymentEscrow::new(settings.escrow, provider);

        let pending = escrow
            .forceRefund(commitment)
            .send()
            .await
            .map_err(|e| RedeemerError::Upstream(format!("forceRefund submit failed: {}", e)))?;

        // Block until the transaction lands; the admin path accepts
        // this latency in exchange for a definitive answer
        let tx_hash = pending
            .watch()
            .await
            .map_err(|e| RedeemerError::Upstream(format!("forceRefund not confirmed: {}", e)))?;

        info!(
            "forceRefund confirmed: chain={}, commitment={}, tx={}",
            chain_id, commitment, tx_hash
        );
        Ok(tx_hash)
    }
}
