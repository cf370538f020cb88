//! HTTP API for the Cambio daemon.
//!
//! Provides REST endpoints for:
//! - Health check
//! - Supported currencies
//! - Price quotes
//! - Exchange creation and status lookup
//!
//! Rendering, QR generation, and all copy/localization are the
//! presentation layer's concern; this surface only exposes engine state.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use cambio_connectors::ConnectorError;
use cambio_domain::{CurrencyCatalog, ExchangeRecord, Network, RateType};
use cambio_store::{ExchangeRepository, StoreError};

use crate::error::DaemonError;
use crate::exchange_manager::{ExchangeManager, NewExchangeRequest};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState {
    /// Exchange manager (creation, quoting, monitoring)
    pub manager: Arc<ExchangeManager>,
    /// Currency catalog
    pub catalog: Arc<CurrencyCatalog>,
    /// Exchange store (status lookups)
    pub store: Arc<dyn ExchangeRepository>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One supported currency.
#[derive(Debug, Serialize)]
pub struct CurrencyInfo {
    pub code: String,
    pub name: String,
    pub networks: Vec<Network>,
    pub required_confirmations: u32,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

/// Supported currencies response.
#[derive(Debug, Serialize)]
pub struct CurrenciesResponse {
    pub currencies: Vec<CurrencyInfo>,
}

/// Price quote query parameters.
#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub rate_type: Option<String>,
}

/// Price quote response.
#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub from_currency: String,
    pub to_currency: String,
    pub rate_type: String,
    pub rate: Decimal,
    pub base_rate: Decimal,
    pub fee_percent: Decimal,
}

/// Request to create an exchange.
#[derive(Debug, Deserialize)]
pub struct CreateExchangeRequest {
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Decimal,
    pub receiving_address: String,
    #[serde(default)]
    pub refund_address: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub rate_type: Option<String>,
}

/// Exchange state as exposed to the presentation layer.
#[derive(Debug, Serialize)]
pub struct ExchangeResponse {
    pub id: Uuid,
    pub from_currency: String,
    pub to_currency: String,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_received_amount: Option<Decimal>,
    pub rate_type: String,
    pub rate: Decimal,
    pub deposit_address: String,
    pub receiving_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_tx_hash: Option<String>,
    pub confirmations: u32,
    pub required_confirmations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&ExchangeRecord> for ExchangeResponse {
    fn from(record: &ExchangeRecord) -> Self {
        Self {
            id: record.id,
            from_currency: record.from_currency.to_string(),
            to_currency: record.to_currency.to_string(),
            from_amount: record.from_amount.as_decimal(),
            to_amount: record.to_amount.as_decimal(),
            actual_received_amount: record.actual_received_amount,
            rate_type: record.rate_type.to_string(),
            rate: record.rate,
            deposit_address: record.deposit_address.clone(),
            receiving_address: record.receiving_address.clone(),
            refund_address: record.refund_address.clone(),
            email: record.email.clone(),
            status: record.status.to_string(),
            deposit_tx_hash: record.deposit_tx_hash.clone(),
            confirmations: record.confirmations,
            required_confirmations: record.required_confirmations,
            failure_reason: record.failure_reason.clone(),
            created_at: record.created_at,
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// API error wrapper with status mapping.
#[derive(Debug)]
pub struct ApiError(DaemonError);

impl From<DaemonError> for ApiError {
    fn from(err: DaemonError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DaemonError::Domain(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DaemonError::Connector(ConnectorError::UnsupportedPair { .. })
            | DaemonError::Connector(ConnectorError::UnsupportedCurrency(_)) => {
                StatusCode::BAD_REQUEST
            }
            DaemonError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/currencies", get(currencies_handler))
        .route("/price", get(price_handler))
        .route("/exchanges", post(create_exchange_handler))
        .route("/exchanges/:id", get(get_exchange_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List supported currencies.
async fn currencies_handler(State(state): State<Arc<ApiState>>) -> Json<CurrenciesResponse> {
    let mut currencies: Vec<CurrencyInfo> = state
        .catalog
        .all()
        .map(|c| CurrencyInfo {
            code: c.code.to_string(),
            name: c.name.clone(),
            networks: c.networks.clone(),
            required_confirmations: c.required_confirmations,
            min_amount: c.min_amount,
            max_amount: c.max_amount,
        })
        .collect();
    currencies.sort_by(|a, b| a.code.cmp(&b.code));

    Json(CurrenciesResponse { currencies })
}

fn parse_rate_type(value: Option<&str>) -> Result<RateType, ApiError> {
    match value {
        Some(raw) => RateType::from_str(raw).map_err(|e| ApiError(e.into())),
        None => Ok(RateType::Floating),
    }
}

/// Quote a pair without touching any record.
async fn price_handler(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<PriceQuery>,
) -> Result<Json<PriceResponse>, ApiError> {
    let rate_type = parse_rate_type(query.rate_type.as_deref())?;
    let quote = state.manager.quote(&query.from, &query.to, rate_type).await?;

    Ok(Json(PriceResponse {
        from_currency: quote.from_currency.to_string(),
        to_currency: quote.to_currency.to_string(),
        rate_type: quote.rate_type.to_string(),
        rate: quote.rate,
        base_rate: quote.base_rate,
        fee_percent: quote.fee_percent,
    }))
}

/// Create an exchange.
async fn create_exchange_handler(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateExchangeRequest>,
) -> Result<(StatusCode, Json<ExchangeResponse>), ApiError> {
    let rate_type = parse_rate_type(body.rate_type.as_deref())?;

    let record = state
        .manager
        .clone()
        .create_exchange(NewExchangeRequest {
            from_currency: body.from_currency,
            to_currency: body.to_currency,
            from_amount: body.from_amount,
            receiving_address: body.receiving_address,
            refund_address: body.refund_address,
            email: body.email,
            rate_type,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ExchangeResponse::from(&record))))
}

/// Look up an exchange's current state.
async fn get_exchange_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let record = state
        .store
        .load(id)
        .await
        .map_err(|e| ApiError(e.into()))?;

    Ok(Json(ExchangeResponse::from(&record)))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use cambio_testkit::btc_to_xmr;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exchange_response_from_record() {
        let record = btc_to_xmr(dec!(0.1), dec!(112.78421));
        let response = ExchangeResponse::from(&record);

        assert_eq!(response.status, "waiting");
        assert_eq!(response.rate_type, "float");
        assert_eq!(response.to_amount, dec!(11.16563679));
        assert_eq!(response.required_confirmations, 2);

        // Unset optionals are omitted from the payload
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("deposit_tx_hash").is_none());
        assert!(json.get("failure_reason").is_none());
    }

    #[test]
    fn test_parse_rate_type_defaults_to_floating() {
        assert_eq!(parse_rate_type(None).unwrap(), RateType::Floating);
        assert_eq!(parse_rate_type(Some("fixed")).unwrap(), RateType::Fixed);
        assert!(parse_rate_type(Some("bogus")).is_err());
    }
}
