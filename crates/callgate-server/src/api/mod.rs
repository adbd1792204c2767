//! REST API for call control
//!
//! | method | path | body |
//! |---|---|---|
//! | POST | `/load/offer` | [`OfferRequest`] |
//! | POST | `/load/calls` | [`AnswerRequest`] |
//! | POST | `/load/action` | [`ActionRequest`] |
//! | GET | `/health` | none |

pub mod error;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use callgate_core::{
    ActionRequest, ActionResponse, AnswerRequest, AnswerResponse, Event, Gateway, OfferRequest,
};

pub use error::ApiError;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Gateway,
}

impl ApiState {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

/// Create the REST API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/load/offer", post(create_offer))
        .route("/load/calls", post(create_answer))
        .route("/load/action", post(process_action))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn create_offer(
    State(state): State<ApiState>,
    payload: Result<Json<OfferRequest>, JsonRejection>,
) -> Result<Json<Event>, ApiError> {
    let Json(request) = payload?;
    info!("Offer requested to {} from {}", request.to, request.from);
    let event = state
        .gateway
        .create_offer(request)
        .await
        .map_err(ApiError::Offer)?;
    Ok(Json(event))
}

async fn create_answer(
    State(state): State<ApiState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let Json(request) = payload?;
    let response = state
        .gateway
        .create_answer(request)
        .await
        .map_err(ApiError::Answer)?;
    Ok(Json(response))
}

async fn process_action(
    State(state): State<ApiState>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let Json(request) = payload?;
    let status = state
        .gateway
        .dispatch_action(&request)
        .await
        .map_err(ApiError::Action)?;
    Ok(Json(status.response(&request)))
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    active_sessions: usize,
}

async fn health(State(state): State<ApiState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        active_sessions: state.gateway.registry().len(),
    })
}
