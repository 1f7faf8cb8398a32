/// Secret/commitment derivation shared by the service and its callers.
/// The secret stays with the payer; only its SHA-256 digest (the
/// commitment) ever appears on-chain or in service requests.
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Result, SdkError};

/// Generate a random 32-byte secret (guaranteed non-zero).
pub fn random_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    loop {
        rand::thread_rng().fill_bytes(&mut secret);
        if secret.iter().any(|&b| b != 0) {
            return secret;
        }
    }
}

/// Commitment = SHA-256(secret).
pub fn commitment_of(secret: &[u8; 32]) -> [u8; 32] {
    let digest = Sha256::digest(secret);
    let mut commitment = [0u8; 32];
    commitment.copy_from_slice(&digest);
    commitment
}

/// Commitment as the lowercase hex string used as the public
/// correlation key everywhere else.
pub fn commitment_hex(secret: &[u8; 32]) -> String {
    hex::encode(commitment_of(secret))
}

/// Decode a hex-encoded 32-byte value (secret or commitment).
pub fn decode_bytes32(s: &str) -> Result<[u8; 32]> {
    let raw = hex::decode(s.trim_start_matches("0x"))
        .map_err(|_| SdkError::InvalidInput("expected hex-encoded bytes".into()))?;
    raw.try_into()
        .map_err(|_| SdkError::InvalidInput("expected exactly 32 bytes".into()))
}
