use serde::{Deserialize, Serialize};

use crate::quote::PriceQuote;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchIssueRequest {
    /// Number of secrets to issue (1..=1000); over-limit batches are
    /// rejected whole
    pub count: u32,
    pub chain_id: u64,
    pub service: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuedSecret {
    /// Hex-encoded 32-byte secret, held server-side for the partner
    pub secret: String,
    /// Hex-encoded commitment (SHA-256 of the secret)
    pub commitment: String,
    pub quote: PriceQuote,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchIssueResponse {
    pub success: bool,
    pub secrets: Vec<IssuedSecret>,
    pub error: Option<String>,
}
