use alloy::primitives::B256;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::chain::{ChainOracle, EvmChainOracle};
use crate::config::RedeemerConfig;
use crate::error::{RedeemerError, Result};
use crate::issuance::IssuanceService;
use crate::lease::{LeaseStore, MemoryLeaseStore};
use crate::price::PriceOracle;
use crate::redemption::RedemptionService;
use crate::refund::RefundService;
use crate::signing::OracleSigner;
use crate::store::LedgerStore;

use payments_sdk::crypto::decode_bytes32;
use payments_sdk::issuance::{BatchIssueRequest, BatchIssueResponse};
use payments_sdk::quote::PriceQuote;
use payments_sdk::redemption::{
    CancelRequest, CompleteRequest, ReserveRequest, ReserveResponse, ResolutionResponse,
};
use payments_sdk::refund::{
    AdminRefundRequest, AdminRefundResponse, RefundRequest, RefundResponse, StatusResponse,
};

pub struct RedeemerState {
    pub config: RedeemerConfig,
    pub price_oracle: Arc<PriceOracle>,
    pub redemption: RedemptionService,
    pub refund: RefundService,
    pub issuance: IssuanceService,
}

impl RedeemerState {
    pub fn new(config: RedeemerConfig) -> anyhow::Result<Self> {
        let signer = Arc::new(OracleSigner::new(config.oracle_signer.clone()));
        info!("Oracle signing address: {}", signer.address());

        let chain: Arc<dyn ChainOracle> = Arc::new(EvmChainOracle::new(
            config.chains.clone(),
            config.operator_signer.clone(),
        ));
        let store = Arc::new(match &config.ledger_path {
            Some(path) => LedgerStore::open(path.clone()),
            None => LedgerStore::in_memory(),
        });
        let leases: Arc<dyn LeaseStore> = Arc::new(MemoryLeaseStore::new());

        let price_oracle = Arc::new(PriceOracle::new(
            config.chains.clone(),
            config.price_feed_url.clone(),
            config.price_cache_ttl,
            signer.clone(),
        ));

        let redemption = RedemptionService::new(chain.clone(), store.clone(), leases.clone());
        let refund = RefundService::new(chain, store.clone(), leases.clone(), signer);
        let issuance = IssuanceService::new(
            store,
            leases,
            price_oracle.clone(),
            config.service_prices.clone(),
            config.hourly_secret_limit,
            config.daily_secret_limit,
        );

        Ok(Self {
            config,
            price_oracle,
            redemption,
            refund,
            issuance,
        })
    }
}

pub async fn run(state: Arc<RedeemerState>) -> anyhow::Result<()> {
    // 10 requests per second per IP
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(10)
        .burst_size(20)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .unwrap();

    let app = Router::new()
        // Health check (no rate limit concerns, no auth)
        .route("/health", get(health))
        // Signed price quotes
        .route("/quote", get(get_quote))
        // Reservation lifecycle (service-to-service)
        .route("/redemption/reserve", post(handle_reserve))
        .route("/redemption/complete", post(handle_complete))
        .route("/redemption/cancel", post(handle_cancel))
        // Self-serve refunds and status
        .route("/refund/request", post(handle_refund_request))
        .route("/payment/status", get(get_payment_status))
        // Privileged force-refund
        .route("/admin/refund", post(handle_admin_refund))
        // Partner batch issuance
        .route("/credits/issue", post(handle_issue_batch))
        .layer(GovernorLayer {
            config: Arc::new(governor_conf),
        })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Redeemer listening on {} (rate limited: 10 req/s per IP)", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(), // ConnectInfo for rate limiting
    )
    .await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct QuoteParams {
    service: String,
    chain_id: u64,
    /// The commitment the caller will pay with; it is bound into the
    /// signed tuple
    commitment: String,
}

async fn get_quote(
    State(state): State<Arc<RedeemerState>>,
    Query(params): Query<QuoteParams>,
) -> Result<Json<PriceQuote>> {
    let usd_amount = state
        .config
        .service_price_usd(&params.service)
        .ok_or_else(|| RedeemerError::NotFound(format!("unknown service '{}'", params.service)))?;
    let commitment = B256::from(
        decode_bytes32(&params.commitment)
            .map_err(|e| RedeemerError::Validation(e.to_string()))?,
    );

    let quote = state
        .price_oracle
        .quote(usd_amount, params.chain_id, commitment, &params.service)
        .await?;
    Ok(Json(quote))
}

async fn handle_reserve(
    State(state): State<Arc<RedeemerState>>,
    headers: HeaderMap,
    Json(req): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>> {
    require_key(&headers, &state.config.api_key)?;

    let token = state
        .redemption
        .reserve(&req.secret, req.chain_id, &req.service)
        .await?;
    Ok(Json(ReserveResponse {
        success: true,
        reservation_token: Some(token),
        error: None,
    }))
}

async fn handle_complete(
    State(state): State<Arc<RedeemerState>>,
    headers: HeaderMap,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<ResolutionResponse>> {
    require_key(&headers, &state.config.api_key)?;

    let commitment = state
        .redemption
        .complete(&req.reservation_token, &req.service, &req.fulfillment_receipt)
        .await?;
    Ok(Json(ResolutionResponse {
        success: true,
        commitment: Some(commitment),
        error: None,
    }))
}

async fn handle_cancel(
    State(state): State<Arc<RedeemerState>>,
    headers: HeaderMap,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ResolutionResponse>> {
    require_key(&headers, &state.config.api_key)?;

    let commitment = state.redemption.cancel(&req.reservation_token).await?;
    Ok(Json(ResolutionResponse {
        success: true,
        commitment: Some(commitment),
        error: None,
    }))
}

async fn handle_refund_request(
    State(state): State<Arc<RedeemerState>>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundResponse>> {
    let signature = state
        .refund
        .request_refund(&req.secret, req.chain_id, req.timestamp)
        .await?;
    Ok(Json(RefundResponse {
        success: true,
        signature: Some(signature),
        error: None,
    }))
}

#[derive(Deserialize)]
struct StatusParams {
    commitment: String,
    chain_id: u64,
}

async fn get_payment_status(
    State(state): State<Arc<RedeemerState>>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusResponse>> {
    if state.config.chain(params.chain_id).is_none() {
        return Err(RedeemerError::NotFound(format!(
            "unknown chain id {}",
            params.chain_id
        )));
    }
    decode_bytes32(&params.commitment).map_err(|e| RedeemerError::Validation(e.to_string()))?;

    let status = state.refund.status(&params.commitment).await;
    Ok(Json(StatusResponse {
        status: status.as_str().to_string(),
    }))
}

async fn handle_admin_refund(
    State(state): State<Arc<RedeemerState>>,
    headers: HeaderMap,
    Json(req): Json<AdminRefundRequest>,
) -> Result<Json<AdminRefundResponse>> {
    require_key(&headers, &state.config.admin_api_key)?;

    let tx_hash = state
        .refund
        .admin_force_refund(&req.commitment, req.chain_id)
        .await?;
    Ok(Json(AdminRefundResponse {
        success: true,
        tx_hash: Some(format!("{:#x}", tx_hash)),
        error: None,
    }))
}

async fn handle_issue_batch(
    State(state): State<Arc<RedeemerState>>,
    headers: HeaderMap,
    Json(req): Json<BatchIssueRequest>,
) -> Result<Json<BatchIssueResponse>> {
    require_key(&headers, &state.config.api_key)?;
    let partner = headers
        .get("x-partner-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RedeemerError::Validation("missing x-partner-id header".into()))?
        .to_string();

    let secrets = state
        .issuance
        .issue(&partner, req.count, req.chain_id, &req.service)
        .await?;
    Ok(Json(BatchIssueResponse {
        success: true,
        secrets,
        error: None,
    }))
}

fn require_key(headers: &HeaderMap, expected: &str) -> Result<()> {
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or(RedeemerError::Unauthorized)?;
    if presented != expected {
        return Err(RedeemerError::Unauthorized);
    }
    Ok(())
}
