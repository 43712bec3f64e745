use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use log::{error, info};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{
    filter::PoolFilterParams,
    query::{AprParams, QueryError},
    repository::PoolStatsRepository,
    service::AprService,
    types::AprResponse,
};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidQuery(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid query parameters", "details": e.issues })),
            )
                .into_response(),
            Self::Internal(e) => {
                error!("Request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            },
        }
    }
}

async fn apr<R: PoolStatsRepository>(
    State(service): State<Arc<AprService<R>>>,
    Query(params): Query<AprParams>,
    Query(filters): Query<PoolFilterParams>,
) -> Result<Json<AprResponse>, ApiError> {
    let query = params.validate(Utc::now().date_naive())?;
    Ok(Json(service.apr(&query, &filters).await?))
}

async fn health<R: PoolStatsRepository>(
    State(service): State<Arc<AprService<R>>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    service.repository().ping().await?;
    Ok(Json(json!({ "status": "ok" })))
}

pub fn router<R: PoolStatsRepository>(service: Arc<AprService<R>>) -> Router {
    Router::new()
        .route("/apr/api", get(apr::<R>))
        .route("/health", get(health::<R>))
        .with_state(service)
}

/// Serve the API on `bind` until `cancellation_token` is cancelled.
pub async fn serve<R: PoolStatsRepository>(
    service: Arc<AprService<R>>,
    bind: &str,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", bind))?;

    info!("API listening on {}", addr);
    axum::Server::try_bind(&addr)?
        .serve(router(service).into_make_service())
        .with_graceful_shutdown(async move { cancellation_token.cancelled().await })
        .await?;

    info!("API stopped");
    Ok(())
}
