/// Fulfillment service flow: reserve a payment before verification,
/// then complete (or cancel) with the one-shot reservation token.
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReserveRequest {
    /// Hex-encoded 32-byte secret; the service derives the commitment
    pub secret: String,
    pub chain_id: u64,
    pub service: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub success: bool,
    /// Opaque single-use token binding this fulfillment attempt
    pub reservation_token: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub reservation_token: String,
    pub service: String,
    /// Receipt from the fulfillment side (credential id, tx ref, ...)
    pub fulfillment_receipt: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reservation_token: String,
}

/// Shared by complete and cancel: both resolve the token back to the
/// commitment they acted on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionResponse {
    pub success: bool,
    pub commitment: Option<String>,
    pub error: Option<String>,
}
