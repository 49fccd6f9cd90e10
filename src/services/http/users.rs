use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use super::{dispatch, error_message, status_for, AppState};
use crate::models::{users::NewUser, withdrawals::NewWithdrawal};
use crate::repositories::LedgerError;
use crate::services::{referrals::ReferralRequest, users::UserRequest, ServiceError};

pub async fn register_user(
    State(state): State<AppState>,
    Json(new_user): Json<NewUser>,
) -> impl IntoResponse {
    match dispatch(&state.user_channel, |response| UserRequest::RegisterUser {
        new_user,
        response,
    })
    .await
    {
        Ok(user) => (StatusCode::CREATED, Json(json!(user))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let user = dispatch(&state.user_channel, |response| UserRequest::GetUser {
        id: user_id.clone(),
        response,
    })
    .await;

    match user {
        Ok(Some(user)) => (StatusCode::OK, Json(json!(user))).into_response(),
        Ok(None) => ServiceError::from(LedgerError::UserNotFound(user_id)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_referrals(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::ListReferrals {
            referrer_id: Some(user_id),
            response,
        }
    })
    .await
    {
        Ok(referrals) => (StatusCode::OK, Json(json!(referrals))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn referral_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::GetUserReferralStats { user_id, response }
    })
    .await
    {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn request_withdrawal(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<NewWithdrawal>,
) -> impl IntoResponse {
    let receipt = dispatch(&state.referral_channel, |response| {
        ReferralRequest::ProcessWithdrawal {
            user_id,
            request,
            response,
        }
    })
    .await;

    match receipt {
        Ok(receipt) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Withdrawal request submitted.",
                "withdrawal_id": receipt.withdrawal.id,
                "amount": receipt.withdrawal.amount_in_cents,
                "balance": receipt.balance_in_cents,
            })),
        ),
        Err(e) => (
            status_for(&e),
            Json(json!({
                "success": false,
                "message": error_message(&e),
            })),
        ),
    }
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::ListWithdrawals { user_id, response }
    })
    .await
    {
        Ok(withdrawals) => (StatusCode::OK, Json(json!(withdrawals))).into_response(),
        Err(e) => e.into_response(),
    }
}
