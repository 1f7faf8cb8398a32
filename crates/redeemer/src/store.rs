/// Durable record store joining commitments to their provenance and to
/// the uniquely-keyed redemption ledger. The existence of a
/// RedemptionRecord is the only permanent truth that a payment was
/// consumed; leases merely signal what is in flight.
///
/// Snapshots persist as JSON with a SHA-256 checksum sidecar and an
/// atomic temp-file rename, so a corrupted file is detected on load.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{RedeemerError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentSource {
    /// Payer-held secret, paid directly on-chain
    User,
    /// Server-generated secret issued to a partner account
    Credits,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub id: u64,
    pub commitment: String,
    pub source: CommitmentSource,
    pub created_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedemptionRecord {
    pub id: u64,
    /// Unique: at most one redemption per commitment, ever
    pub commitment_id: u64,
    pub redeemed_at: u64,
    pub service: String,
    pub fulfillment_receipt: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuedSecretRecord {
    pub commitment: String,
    pub secret: String,
    pub partner: String,
    pub created_at: u64,
}

#[derive(Default, Serialize, Deserialize)]
struct LedgerState {
    next_commitment_id: u64,
    next_redemption_id: u64,
    /// Keyed by commitment hex
    commitments: HashMap<String, CommitmentRecord>,
    /// Keyed by commitment id (the unique constraint)
    redemptions: HashMap<u64, RedemptionRecord>,
    issued_secrets: Vec<IssuedSecretRecord>,
}

pub struct LedgerStore {
    state: RwLock<LedgerState>,
    /// When set, every mutation snapshots to disk
    path: Option<PathBuf>,
}

impl LedgerStore {
    /// In-memory only (tests, or an external document store fronting
    /// this process).
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            path: None,
        }
    }

    /// Load or create a disk-backed store with integrity verification.
    pub fn open(path: PathBuf) -> Self {
        let state = if path.exists() {
            match Self::load_snapshot(&path) {
                Ok(state) => {
                    info!(
                        "Loaded ledger: {} commitments, {} redemptions (checksum verified)",
                        state.commitments.len(),
                        state.redemptions.len()
                    );
                    state
                }
                Err(e) => {
                    warn!("Failed to load ledger from {}: {}", path.display(), e);
                    warn!("Starting with an empty ledger for safety.");
                    LedgerState::default()
                }
            }
        } else {
            LedgerState::default()
        };

        Self {
            state: RwLock::new(state),
            path: Some(path),
        }
    }

    fn load_snapshot(path: &PathBuf) -> std::result::Result<LedgerState, String> {
        let data = std::fs::read(path).map_err(|e| e.to_string())?;

        let checksum_path = path.with_extension("checksum");
        if checksum_path.exists() {
            let stored = std::fs::read(&checksum_path).map_err(|e| e.to_string())?;
            let computed = Sha256::digest(&data);
            if stored != computed.as_slice() {
                return Err("checksum mismatch, file may be corrupted".to_string());
            }
        } else {
            warn!("No ledger checksum file, proceeding without verification");
        }

        serde_json::from_slice(&data).map_err(|e| e.to_string())
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let data = serde_json::to_vec(state)
            .map_err(|e| RedeemerError::Internal(format!("Failed to encode ledger: {}", e)))?;
        let checksum = Sha256::digest(&data);

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &data)
            .map_err(|e| RedeemerError::Internal(format!("Failed to write ledger: {}", e)))?;
        std::fs::write(path.with_extension("checksum"), checksum)
            .map_err(|e| RedeemerError::Internal(format!("Failed to write checksum: {}", e)))?;
        std::fs::rename(&temp_path, path)
            .map_err(|e| RedeemerError::Internal(format!("Failed to rename ledger: {}", e)))?;
        Ok(())
    }

    /// Idempotent: returns the existing record when the commitment is
    /// already known, creating it lazily otherwise.
    pub async fn get_or_create_commitment(
        &self,
        commitment: &str,
        source: CommitmentSource,
    ) -> Result<CommitmentRecord> {
        let mut state = self.state.write().await;
        if let Some(record) = state.commitments.get(commitment) {
            return Ok(record.clone());
        }

        state.next_commitment_id += 1;
        let record = CommitmentRecord {
            id: state.next_commitment_id,
            commitment: commitment.to_string(),
            source,
            created_at: unix_now(),
        };
        state
            .commitments
            .insert(commitment.to_string(), record.clone());
        if let Err(e) = self.persist(&state) {
            state.commitments.remove(commitment);
            state.next_commitment_id -= 1;
            return Err(e);
        }
        Ok(record)
    }

    pub async fn commitment(&self, commitment: &str) -> Option<CommitmentRecord> {
        self.state.read().await.commitments.get(commitment).cloned()
    }

    pub async fn redemption_for(&self, commitment: &str) -> Option<RedemptionRecord> {
        let state = self.state.read().await;
        let record = state.commitments.get(commitment)?;
        state.redemptions.get(&record.id).cloned()
    }

    /// Enforces the unique constraint: a second insert for the same
    /// commitment id fails with Conflict and changes nothing. A failed
    /// snapshot rolls the insert back, so memory and disk never
    /// disagree about whether a payment was consumed.
    pub async fn insert_redemption(
        &self,
        commitment_id: u64,
        service: &str,
        fulfillment_receipt: &str,
    ) -> Result<RedemptionRecord> {
        let mut state = self.state.write().await;
        if state.redemptions.contains_key(&commitment_id) {
            return Err(RedeemerError::Conflict("payment already redeemed".into()));
        }

        state.next_redemption_id += 1;
        let record = RedemptionRecord {
            id: state.next_redemption_id,
            commitment_id,
            redeemed_at: unix_now(),
            service: service.to_string(),
            fulfillment_receipt: fulfillment_receipt.to_string(),
        };
        state.redemptions.insert(commitment_id, record.clone());
        if let Err(e) = self.persist(&state) {
            state.redemptions.remove(&commitment_id);
            state.next_redemption_id -= 1;
            return Err(e);
        }
        Ok(record)
    }

    pub async fn insert_issued_secrets(&self, records: Vec<IssuedSecretRecord>) -> Result<()> {
        let mut state = self.state.write().await;
        let prior = state.issued_secrets.len();
        state.issued_secrets.extend(records);
        if let Err(e) = self.persist(&state) {
            state.issued_secrets.truncate(prior);
            return Err(e);
        }
        Ok(())
    }

    pub async fn issued_secrets_for(&self, partner: &str) -> Vec<IssuedSecretRecord> {
        self.state
            .read()
            .await
            .issued_secrets
            .iter()
            .filter(|r| r.partner == partner)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub async fn redemption_count(&self) -> usize {
        self.state.read().await.redemptions.len()
    }

    #[cfg(test)]
    pub async fn issued_secret_count(&self) -> usize {
        self.state.read().await.issued_secrets.len()
    }
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
