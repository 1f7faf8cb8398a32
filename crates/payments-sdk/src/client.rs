/// HTTP client for the redemption service. Used by the fulfillment
/// flow: quote → (payer pays on-chain) → reserve → verify → complete
/// or cancel.
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::crypto::decode_bytes32;
use crate::error::{Result, SdkError};
use crate::issuance::{BatchIssueRequest, BatchIssueResponse};
use crate::quote::PriceQuote;
use crate::redemption::{CancelRequest, CompleteRequest, ReserveRequest, ResolutionResponse};
use crate::refund::{RefundRequest, RefundResponse, StatusResponse};

pub struct ClientConfig {
    /// Base URL of the redemption service
    pub base_url: String,
    /// Service-to-service API key (sent as x-api-key)
    pub api_key: String,
    /// Partner identity for batch issuance (sent as x-partner-id)
    pub partner_id: Option<String>,
}

pub struct RedemptionClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl RedemptionClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub async fn quote(&self, service: &str, chain_id: u64, commitment: &str) -> Result<PriceQuote> {
        let url = format!(
            "{}/quote?service={}&chain_id={}&commitment={}",
            self.config.base_url, service, chain_id, commitment
        );
        self.get(&url).await
    }

    pub async fn reserve(&self, secret_hex: &str, chain_id: u64, service: &str) -> Result<String> {
        // Fail locally on malformed secrets before they hit the wire
        decode_bytes32(secret_hex)?;

        let req = ReserveRequest {
            secret: secret_hex.to_string(),
            chain_id,
            service: service.to_string(),
        };
        let url = format!("{}/redemption/reserve", self.config.base_url);
        let resp: crate::redemption::ReserveResponse = self.post(&url, &req).await?;
        resp.reservation_token.ok_or_else(|| SdkError::Server {
            status: 500,
            message: resp.error.unwrap_or_else(|| "missing reservation token".into()),
        })
    }

    pub async fn complete(
        &self,
        reservation_token: &str,
        service: &str,
        fulfillment_receipt: &str,
    ) -> Result<String> {
        let req = CompleteRequest {
            reservation_token: reservation_token.to_string(),
            service: service.to_string(),
            fulfillment_receipt: fulfillment_receipt.to_string(),
        };
        let url = format!("{}/redemption/complete", self.config.base_url);
        let resp: ResolutionResponse = self.post(&url, &req).await?;
        resp.commitment.ok_or_else(|| SdkError::Server {
            status: 500,
            message: resp.error.unwrap_or_else(|| "missing commitment".into()),
        })
    }

    pub async fn cancel(&self, reservation_token: &str) -> Result<String> {
        let req = CancelRequest {
            reservation_token: reservation_token.to_string(),
        };
        let url = format!("{}/redemption/cancel", self.config.base_url);
        let resp: ResolutionResponse = self.post(&url, &req).await?;
        resp.commitment.ok_or_else(|| SdkError::Server {
            status: 500,
            message: resp.error.unwrap_or_else(|| "missing commitment".into()),
        })
    }

    pub async fn request_refund(
        &self,
        secret_hex: &str,
        chain_id: u64,
        timestamp: u64,
    ) -> Result<RefundResponse> {
        decode_bytes32(secret_hex)?;

        let req = RefundRequest {
            secret: secret_hex.to_string(),
            chain_id,
            timestamp,
        };
        let url = format!("{}/refund/request", self.config.base_url);
        self.post(&url, &req).await
    }

    pub async fn status(&self, commitment: &str, chain_id: u64) -> Result<String> {
        let url = format!(
            "{}/payment/status?commitment={}&chain_id={}",
            self.config.base_url, commitment, chain_id
        );
        let resp: StatusResponse = self.get(&url).await?;
        Ok(resp.status)
    }

    pub async fn issue_batch(
        &self,
        count: u32,
        chain_id: u64,
        service: &str,
    ) -> Result<BatchIssueResponse> {
        let req = BatchIssueRequest {
            count,
            chain_id,
            service: service.to_string(),
        };
        let url = format!("{}/credits/issue", self.config.base_url);
        self.post(&url, &req).await
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .header("x-api-key", &self.config.api_key)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T> {
        let mut req = self
            .http
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .json(body);
        if let Some(partner) = &self.config.partner_id {
            req = req.header("x-partner-id", partner);
        }
        Self::decode(req.send().await?).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return resp.json::<T>().await.map_err(SdkError::Network);
        }

        // Error bodies carry {"success": false, "error": "..."}
        let message = match resp.json::<Value>().await {
            Ok(body) => body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(SdkError::Server {
            status: status.as_u16(),
            message,
        })
    }
}
