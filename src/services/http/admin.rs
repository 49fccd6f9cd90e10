use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{dispatch, error_message, status_for, AppState};
use crate::models::{
    referrals::NewReferral,
    users::{NewUser, UserUpdate},
    withdrawals::WithdrawalTransition,
};
use crate::services::{referrals::ReferralRequest, users::UserRequest};

pub const USER_ID_HEADER: &str = "x-user-id";

/// Unlike public registration, an admin may create another admin.
#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    pub name: String,
    pub email: String,
    pub referral_code: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopReferrersQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteReferralBody {
    pub bonus_amount_in_cents: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WithdrawalTransitionBody {
    pub admin_notes: Option<String>,
    pub reason: Option<String>,
}

/// Lets the request through only when `x-user-id` names an admin.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let user_id = match request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(user_id) => user_id.to_string(),
        None => return unauthenticated(),
    };

    let user = dispatch(&state.user_channel, |response| UserRequest::GetUser {
        id: user_id.clone(),
        response,
    })
    .await;

    match user {
        Ok(Some(user)) if user.is_admin => next.run(request).await,
        Ok(Some(_)) => {
            log::warn!("User {} tried to reach the admin area.", user_id);
            (
                StatusCode::FORBIDDEN,
                Json(json!({"message": "Unauthorized. Admin access required."})),
            )
                .into_response()
        }
        Ok(None) => unauthenticated(),
        Err(e) => e.into_response(),
    }
}

fn unauthenticated() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"message": "Unauthenticated."})),
    )
        .into_response()
}

pub async fn system_stats(State(state): State<AppState>) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::GetSystemStats { response }
    })
    .await
    {
        Ok(stats) => (StatusCode::OK, Json(json!(stats))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_referrals(State(state): State<AppState>) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::ListReferrals {
            referrer_id: None,
            response,
        }
    })
    .await
    {
        Ok(referrals) => (StatusCode::OK, Json(json!(referrals))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn top_referrers(
    State(state): State<AppState>,
    Query(query): Query<TopReferrersQuery>,
) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::GetTopReferrers {
            limit: query.limit,
            response,
        }
    })
    .await
    {
        Ok(referrers) => (StatusCode::OK, Json(json!(referrers))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn create_referral(
    State(state): State<AppState>,
    Json(new_referral): Json<NewReferral>,
) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::CreateReferral {
            referrer_id: new_referral.referrer_id,
            referred_user_id: new_referral.referred_user_id,
            referral_code: new_referral.referral_code,
            response,
        }
    })
    .await
    {
        Ok(referral) => (StatusCode::CREATED, Json(json!(referral))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn complete_referral(
    State(state): State<AppState>,
    Path(referral_id): Path<String>,
    body: Option<Json<CompleteReferralBody>>,
) -> impl IntoResponse {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let referral = dispatch(&state.referral_channel, |response| {
        ReferralRequest::ProcessSuccessfulReferral {
            referral_id,
            bonus_amount_in_cents: body.bonus_amount_in_cents,
            response,
        }
    })
    .await;

    match referral {
        Ok(referral) => (
            StatusCode::OK,
            Json(json!({"success": true, "referral": referral})),
        ),
        Err(e) => (
            status_for(&e),
            Json(json!({"success": false, "message": error_message(&e)})),
        ),
    }
}

pub async fn cancel_referral(
    State(state): State<AppState>,
    Path(referral_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::CancelReferral {
            referral_id,
            response,
        }
    })
    .await
    {
        Ok(referral) => (StatusCode::OK, Json(json!(referral))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn transition_withdrawal(
    state: AppState,
    withdrawal_id: String,
    transition: WithdrawalTransition,
) -> Response {
    match dispatch(&state.referral_channel, |response| {
        ReferralRequest::TransitionWithdrawal {
            withdrawal_id,
            transition,
            response,
        }
    })
    .await
    {
        Ok(withdrawal) => (StatusCode::OK, Json(json!(withdrawal))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn mark_withdrawal_processing(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
    body: Option<Json<WithdrawalTransitionBody>>,
) -> Response {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let transition = WithdrawalTransition::Processing {
        admin_notes: body.admin_notes,
    };
    transition_withdrawal(state, withdrawal_id, transition).await
}

pub async fn mark_withdrawal_completed(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
    body: Option<Json<WithdrawalTransitionBody>>,
) -> Response {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let transition = WithdrawalTransition::Completed {
        admin_notes: body.admin_notes,
    };
    transition_withdrawal(state, withdrawal_id, transition).await
}

pub async fn mark_withdrawal_rejected(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
    body: Option<Json<WithdrawalTransitionBody>>,
) -> Response {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let reason = match body.reason.filter(|reason| !reason.trim().is_empty()) {
        Some(reason) => reason,
        None => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": "A rejection reason is required."})),
            )
                .into_response()
        }
    };

    let transition = WithdrawalTransition::Rejected {
        reason,
        admin_notes: body.admin_notes,
    };
    transition_withdrawal(state, withdrawal_id, transition).await
}

pub async fn list_users(State(state): State<AppState>) -> impl IntoResponse {
    match dispatch(&state.user_channel, |response| UserRequest::ListUsers {
        response,
    })
    .await
    {
        Ok(users) => (StatusCode::OK, Json(json!(users))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<CreateUserBody>,
) -> impl IntoResponse {
    let new_user = NewUser {
        name: body.name,
        email: body.email,
        referral_code: body.referral_code,
        is_admin: body.is_admin,
    };

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

pub async fn user_details(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&state.user_channel, |response| UserRequest::GetUserDetails {
        id: user_id,
        response,
    })
    .await
    {
        Ok(details) => (StatusCode::OK, Json(json!(details))).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(update): Json<UserUpdate>,
) -> impl IntoResponse {
    match dispatch(&state.user_channel, |response| UserRequest::UpdateUser {
        id: user_id,
        update,
        response,
    })
    .await
    {
        Ok(user) => (
            StatusCode::OK,
            Json(json!({"message": "User updated successfully", "user": user})),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match dispatch(&state.user_channel, |response| UserRequest::DeleteUser {
        id: user_id,
        response,
    })
    .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"message": "User deleted successfully"})),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
