use crate::db::{self, DistributionStore};
use crate::errors::{EngineError, EngineResult};
use crate::feeds::quotes::{apply_quote_update, QuoteApplication, QuoteUpdate};
use crate::models::calibration::DistributionParameters;
use crate::portfolio::leg::Group;
use crate::portfolio::normalize::ValuationContext;
use crate::portfolio::valuation::{pnl_curve, value_group, CurvePoint, GroupValuation};
use crate::risk::monte_carlo::PriceBounds;
use crate::risk::request::{build_simulation, SimulationRequest};
use crate::state::{AppState, DbCommand, EngineEvent, EngineSnapshot, PerfCounters, WsMessage};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Default curve: ±20% around spot.
const CURVE_HALF_RANGE: f64 = 0.20;
const CURVE_POINTS: usize = 101;

// ── Error mapping ──

pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            EngineError::MissingDistribution { .. } => (StatusCode::NOT_FOUND, "missing_distribution"),
            EngineError::NothingToSimulate => (StatusCode::UNPROCESSABLE_ENTITY, "nothing_to_simulate"),
            EngineError::InvalidRequest(_) | EngineError::InvalidLeg(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_request")
            }
            EngineError::Parse(_) => (StatusCode::BAD_REQUEST, "parse"),
            EngineError::Cancelled => (StatusCode::CONFLICT, "cancelled"),
            EngineError::ChannelClosed(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            EngineError::Sampler(_) | EngineError::Database(_) | EngineError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string(), "kind": kind });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Request bodies ──

/// Scenario as sent by clients. The base date is always the session's; rate and
/// IV offset fall back to configuration.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextInput {
    #[serde(default)]
    pub simulated_date: Option<NaiveDate>,
    pub underlying_price: f64,
    #[serde(default)]
    pub interest_rate: Option<f64>,
    #[serde(default)]
    pub iv_offset: Option<f64>,
}

impl ContextInput {
    fn resolve(&self, state: &AppState) -> EngineResult<ValuationContext> {
        let base = state.session_base_date;
        ValuationContext::new(
            base,
            self.simulated_date.unwrap_or(base),
            self.underlying_price,
            self.interest_rate.unwrap_or(state.config.default_rate),
            self.iv_offset.unwrap_or(0.0),
        )
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateBody {
    pub group: Group,
    pub context: ContextInput,
    #[serde(default)]
    pub price_bounds: Option<PriceBounds>,
    #[serde(default)]
    pub bin_count: Option<usize>,
    #[serde(default)]
    pub path_count: Option<usize>,
    #[serde(default)]
    pub target_vol: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, serde::Deserialize)]
pub struct CurveInput {
    pub lower: f64,
    pub upper: f64,
    pub points: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct ValuationBody {
    pub group: Group,
    pub context: ContextInput,
    #[serde(default)]
    pub curve: Option<CurveInput>,
}

#[derive(Debug, serde::Serialize)]
pub struct ValuationResponse {
    pub valuation: GroupValuation,
    pub curve: Vec<CurvePoint>,
}

#[derive(Debug, serde::Deserialize)]
pub struct QuotesBody {
    pub group: Group,
    pub update: QuoteUpdate,
}

#[derive(Debug, serde::Serialize)]
pub struct QuotesResponse {
    pub group: Group,
    pub applied: QuoteApplication,
}

// ── Handlers ──

/// POST /api/simulate -- validate, then queue. Refusals answer synchronously.
pub async fn post_simulate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SimulateBody>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let built = body.context.resolve(&state).and_then(|context| {
        let request = SimulationRequest {
            group: body.group,
            context,
            price_bounds: body.price_bounds,
            bin_count: body.bin_count,
            path_count: body.path_count,
            target_vol: body.target_vol,
            seed: body.seed,
        };
        build_simulation(&request, &state.db, &state.calendar, &state.simulation_defaults())
    });
    let params = match built {
        Ok(p) => p,
        Err(e) => {
            if e.is_refusal() {
                PerfCounters::bump(&state.counters.requests_refused);
                tracing::info!(reason = %e, "simulation refused");
            }
            return Err(e.into());
        }
    };

    let summary = serde_json::json!({
        "queued": true,
        "horizonDays": params.horizon_days,
        "pathCount": params.path_count,
        "binCount": params.bin_count,
        "priceBounds": params.price_bounds,
        "calibration": params.calibration,
    });
    state
        .engine_tx
        .send(EngineEvent::Simulate(Box::new(params)))
        .await
        .map_err(|_| EngineError::ChannelClosed("engine".into()))?;
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

/// POST /api/cancel -- abandon whatever is queued or running
pub async fn post_cancel(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state
        .engine_tx
        .send(EngineEvent::Cancel)
        .await
        .map_err(|_| EngineError::ChannelClosed("engine".into()))?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/state -- current engine snapshot (from watch channel, no lock)
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<EngineSnapshot> {
    let snapshot = state.snapshot_rx.borrow().clone();
    Json(snapshot)
}

/// POST /api/valuation -- table rows and P&L curve for one scenario
pub async fn post_valuation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValuationBody>,
) -> ApiResult<Json<ValuationResponse>> {
    let ctx = body.context.resolve(&state)?;
    let (lower, upper, points) = match body.curve {
        Some(c) => (c.lower, c.upper, c.points),
        None => (
            ctx.underlying_price * (1.0 - CURVE_HALF_RANGE),
            ctx.underlying_price * (1.0 + CURVE_HALF_RANGE),
            CURVE_POINTS,
        ),
    };
    let valuation = value_group(&body.group, &ctx, &state.calendar);
    let curve = pnl_curve(&body.group, &ctx, &state.calendar, lower, upper, points)?;
    Ok(Json(ValuationResponse { valuation, curve }))
}

/// POST /api/quotes -- fold a bridge update into a group
pub async fn post_quotes(Json(body): Json<QuotesBody>) -> Json<QuotesResponse> {
    let mut group = body.group;
    let applied = apply_quote_update(&mut group, &body.update);
    Json(QuotesResponse { group, applied })
}

/// GET /api/params -- every fitted ticker (cold path)
pub async fn list_params(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let rows = db::list_params(&state.db)?;
    Ok(Json(serde_json::json!({ "params": rows })))
}

/// GET /api/params/{ticker}
pub async fn get_params(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
) -> ApiResult<Json<DistributionParameters>> {
    let params = state
        .db
        .by_ticker(&ticker)?
        .ok_or_else(|| EngineError::MissingDistribution { ticker: db::ticker_key(&ticker) })?;
    Ok(Json(params))
}

/// PUT /api/params/{ticker} -- store a fit through the writer task
pub async fn put_params(
    State(state): State<Arc<AppState>>,
    Path(ticker): Path<String>,
    Json(params): Json<DistributionParameters>,
) -> ApiResult<StatusCode> {
    let (reply, done) = oneshot::channel();
    let key = db::ticker_key(&ticker);
    state
        .db_tx
        .send(DbCommand::UpsertParams { ticker: key.clone(), params, reply })
        .await
        .map_err(|_| EngineError::ChannelClosed("db writer".into()))?;
    done.await
        .map_err(|_| EngineError::ChannelClosed("db writer".into()))??;

    tracing::info!(ticker = %key, df = params.degrees_of_freedom, "distribution parameters updated");
    state.broadcast(WsMessage::ParamsUpdated { ticker: key });
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    use portable_atomic::Ordering::Relaxed;
    let c = &state.counters;
    Json(serde_json::json!({
        "simulations_requested": c.simulations_requested.load(Relaxed),
        "simulations_started": c.simulations_started.load(Relaxed),
        "simulations_completed": c.simulations_completed.load(Relaxed),
        "simulations_failed": c.simulations_failed.load(Relaxed),
        "simulations_cancelled": c.simulations_cancelled.load(Relaxed),
        "results_discarded": c.results_discarded.load(Relaxed),
        "requests_refused": c.requests_refused.load(Relaxed),
        "ws_messages_sent": c.ws_messages_sent.load(Relaxed),
    }))
}
