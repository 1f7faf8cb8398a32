use serde::{Deserialize, Serialize};

/// Signed price quote: `price` is the token amount in wei (18
/// decimals) and `signature` authenticates
/// (amount, commitment, service, chain_id, timestamp) for the escrow
/// contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Token amount as a decimal wei string
    pub price: String,
    /// Hex-encoded EIP-191 signature over the quote tuple
    pub signature: String,
    pub timestamp: u64,
}
