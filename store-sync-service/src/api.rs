use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use shared::{MessageResponse, SyncStatus};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::backend::SyncBackend;
use crate::synchronizer::StoreSynchronizer;

pub const STORE_ID_HEADER: &str = "x-store-id";

type ApiError = (StatusCode, Json<MessageResponse>);

pub struct AppState<B> {
    pub synchronizer: StoreSynchronizer<B>,
}

impl<B> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            synchronizer: self.synchronizer.clone(),
        }
    }
}

/// Store the request acts on, taken from the `X-Store-Id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreScope(pub i64);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for StoreScope {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts.headers.get(STORE_ID_HEADER).ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(MessageResponse::new("missing X-Store-Id header")),
            )
        })?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(StoreScope)
            .ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(MessageResponse::new("invalid X-Store-Id header")),
                )
            })
    }
}

pub fn create_router<B: SyncBackend + 'static>(state: AppState<B>) -> Router {
    Router::new()
        .route("/store-synchronizers", post(synchronize_store::<B>))
        .route("/store-synchronizers/status", get(sync_status::<B>))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn synchronize_store<B: SyncBackend + 'static>(
    State(state): State<AppState<B>>,
    StoreScope(store_id): StoreScope,
) -> Result<Json<MessageResponse>, ApiError> {
    match state.synchronizer.run(store_id).await {
        Ok(report) => Ok(Json(MessageResponse::new(format!(
            "Store {} synchronized: {} catalog changes applied",
            store_id,
            report.total_changed()
        )))),
        Err(_) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(MessageResponse::new("Failed to synchronize store")),
        )),
    }
}

pub async fn sync_status<B: SyncBackend + 'static>(
    State(state): State<AppState<B>>,
    StoreScope(store_id): StoreScope,
) -> Result<Json<SyncStatus>, ApiError> {
    match state.synchronizer.status(store_id).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => {
            tracing::error!("Failed to load sync status of store {}: {:#}", store_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(MessageResponse::new("Failed to load synchronization status")),
            ))
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
