use std::{future::Future, sync::Arc};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    clients::health::HealthChecker,
    error::DispatchError,
    models::{
        health::HealthStatus, notification::NotificationPayload, response::ApiResponse,
        stats::NotificationStats,
    },
    notification::{DispatchReceipt, NotificationService},
};

pub struct AppState {
    pub service: Arc<NotificationService>,
    pub health_checker: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/users/notifications", post(send_notification))
        .route("/v1/users/notifications/stats", get(notification_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API until `shutdown` resolves.
pub async fn run_api_server<F>(
    port: u16,
    state: Arc<AppState>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Maps dispatch failures to HTTP responses.
pub struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            DispatchError::RecipientNotFound(_) => (StatusCode::NOT_FOUND, "Recipient not found"),
            DispatchError::UserLookup(_) => (StatusCode::BAD_GATEWAY, "User service unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        let body = ApiResponse::<()>::error(self.0.to_string(), message.to_string());
        (status, Json(body)).into_response()
    }
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NotificationPayload>,
) -> Result<(StatusCode, Json<ApiResponse<DispatchReceipt>>), ApiError> {
    info!(recipient_id = %payload.recipient_id, "Received request to send notification");

    let receipt = state.service.send_notification(payload).await.map_err(|e| {
        error!(error = %e, "Error sending notification");
        ApiError::from(e)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            receipt,
            "Notification has been queued".to_string(),
        )),
    ))
}

async fn notification_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<NotificationStats>>, ApiError> {
    let stats = state.service.get_notification_stats()?;

    Ok(Json(ApiResponse::success(
        stats,
        "Notification processing stats".to_string(),
    )))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
