use axum::{
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{
    referrals::ReferralRequest, users::UserRequest, ServiceChannels, ServiceError,
};
use crate::repositories::LedgerError;

mod admin;
mod users;

#[derive(Clone)]
pub struct AppState {
    referral_channel: mpsc::Sender<ReferralRequest>,
    user_channel: mpsc::Sender<UserRequest>,
}

/// Sends a request to a service and waits for its answer.
async fn dispatch<T, R>(
    channel: &mpsc::Sender<T>,
    request: impl FnOnce(oneshot::Sender<Result<R, ServiceError>>) -> T,
) -> Result<R, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication("Http".to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication("Http".to_string(), e.to_string()))?
}

fn status_for(error: &ServiceError) -> StatusCode {
    match error {
        ServiceError::Ledger(ledger_error) => match ledger_error {
            LedgerError::UserNotFound(_)
            | LedgerError::ReferralNotFound(_)
            | LedgerError::WithdrawalNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::DuplicateReferral { .. }
            | LedgerError::EmailTaken(_)
            | LedgerError::InvalidTransition { .. }
            | LedgerError::LastAdmin => StatusCode::CONFLICT,
            LedgerError::SelfReferral
            | LedgerError::UnknownReferralCode(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::BelowMinimumWithdrawal { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        ServiceError::Communication(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Storage and plumbing failures are logged and hidden behind a generic
/// message; ledger refusals are shown as-is.
fn error_message(error: &ServiceError) -> String {
    match status_for(error) {
        StatusCode::INTERNAL_SERVER_ERROR => {
            log::error!("Request failed: {}", error);
            "Internal server error.".to_string()
        }
        _ => error.to_string(),
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let message = error_message(&self);

        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(channels: ServiceChannels) -> Router {
    let state = AppState {
        referral_channel: channels.referral_channel,
        user_channel: channels.user_channel,
    };

    let admin_routes = Router::new()
        .route("/stats", get(admin::system_stats))
        .route(
            "/referrals",
            get(admin::list_referrals).post(admin::create_referral),
        )
        .route("/referrals/top", get(admin::top_referrers))
        .route("/referrals/{id}/complete", post(admin::complete_referral))
        .route("/referrals/{id}/cancel", post(admin::cancel_referral))
        .route(
            "/withdrawals/{id}/processing",
            post(admin::mark_withdrawal_processing),
        )
        .route(
            "/withdrawals/{id}/complete",
            post(admin::mark_withdrawal_completed),
        )
        .route(
            "/withdrawals/{id}/reject",
            post(admin::mark_withdrawal_rejected),
        )
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/users/{id}",
            get(admin::user_details)
                .put(admin::update_user)
                .delete(admin::delete_user),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin,
        ));

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/users", post(users::register_user))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/referrals", get(users::list_referrals))
        .route("/users/{id}/referrals/stats", get(users::referral_stats))
        .route(
            "/users/{id}/withdrawals",
            get(users::list_withdrawals).post(users::request_withdrawal),
        )
        .nest("/admin", admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    listen: &str,
    channels: ServiceChannels,
) -> Result<(), anyhow::Error> {
    let app = router(channels);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
