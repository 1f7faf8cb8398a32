use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Hex-encoded 32-byte secret proving ownership of the commitment
    pub secret: String,
    pub chain_id: u64,
    /// Unix timestamp bound into the signed refund authorization
    pub timestamp: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefundResponse {
    pub success: bool,
    /// EIP-191 signature the payer submits to the contract directly
    pub signature: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminRefundRequest {
    /// Hex-encoded commitment (admins never hold the secret)
    pub commitment: String,
    pub chain_id: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminRefundResponse {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// "redeemed" | "pending-redemption" | "pending-refund" | "unredeemed"
    pub status: String,
}
