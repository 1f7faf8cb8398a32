/// EIP-191 signatures over ABI-encoded tuples, produced with the
/// server-held oracle key. The escrow contract recovers the signer
/// address and trusts quotes and refund authorizations without its own
/// feed access.
use alloy::primitives::{keccak256, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol_types::SolValue;
use std::sync::Arc;

use crate::error::{RedeemerError, Result};

pub struct OracleSigner {
    signer: Arc<PrivateKeySigner>,
}

impl OracleSigner {
    pub fn new(signer: Arc<PrivateKeySigner>) -> Self {
        Self { signer }
    }

    pub fn address(&self) -> alloy::primitives::Address {
        self.signer.address()
    }

    /// Sign (amount, commitment, service, chainId, timestamp).
    pub async fn sign_quote(
        &self,
        amount: U256,
        commitment: B256,
        service: &str,
        chain_id: u64,
        timestamp: u64,
    ) -> Result<String> {
        let encoded = (
            amount,
            commitment,
            service.to_string(),
            U256::from(chain_id),
            U256::from(timestamp),
        )
            .abi_encode();
        self.sign_hash_191(keccak256(&encoded)).await
    }

    /// Sign (commitment, chainId, timestamp); the payer submits this
    /// directly to the contract's refund entrypoint.
    pub async fn sign_refund(
        &self,
        commitment: B256,
        chain_id: u64,
        timestamp: u64,
    ) -> Result<String> {
        let encoded = (commitment, U256::from(chain_id), U256::from(timestamp)).abi_encode();
        self.sign_hash_191(keccak256(&encoded)).await
    }

    async fn sign_hash_191(&self, hash: B256) -> Result<String> {
        let signature = self
            .signer
            .sign_message(hash.as_slice())
            .await
            .map_err(|e| RedeemerError::Internal(format!("signing failed: {}", e)))?;
        Ok(hex::encode(signature.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_signer() -> (OracleSigner, alloy::primitives::Address) {
        let key = PrivateKeySigner::random();
        let address = key.address();
        (OracleSigner::new(Arc::new(key)), address)
    }

    #[tokio::test]
    async fn test_quote_signature_recovers_oracle_address() {
        let (oracle, address) = test_signer();
        let amount = U256::from(1_666_666_666_666_666u64);
        let commitment = B256::with_last_byte(7);

        let sig_hex = oracle
            .sign_quote(amount, commitment, "sbt-mint", 11155111, 1_700_000_000)
            .await
            .unwrap();
        let sig_bytes = hex::decode(&sig_hex).unwrap();
        assert_eq!(sig_bytes.len(), 65);

        let encoded = (
            amount,
            commitment,
            "sbt-mint".to_string(),
            U256::from(11155111u64),
            U256::from(1_700_000_000u64),
        )
            .abi_encode();
        let hash = keccak256(&encoded);
        let signature = alloy::primitives::Signature::try_from(sig_bytes.as_slice()).unwrap();
        let recovered = signature.recover_address_from_msg(hash.as_slice()).unwrap();
        assert_eq!(recovered, address);
    }

    #[tokio::test]
    async fn test_refund_signature_binds_chain_and_timestamp() {
        let (oracle, _) = test_signer();
        let commitment = B256::with_last_byte(9);

        let sig_a = oracle.sign_refund(commitment, 1, 100).await.unwrap();
        let sig_b = oracle.sign_refund(commitment, 2, 100).await.unwrap();
        let sig_c = oracle.sign_refund(commitment, 1, 101).await.unwrap();
        assert_ne!(sig_a, sig_b);
        assert_ne!(sig_a, sig_c);
    }
}
