use crate::models::withdrawals::{NewWithdrawal, Withdrawal, WithdrawalTransition};

use sqlx::PgConnection;
use uuid::Uuid;

pub async fn insert_withdrawal(
    conn: &mut PgConnection,
    user_id: &str,
    request: &NewWithdrawal,
) -> Result<Withdrawal, sqlx::Error> {
    let withdrawal_id = Uuid::new_v4().hyphenated().to_string();

    sqlx::query_as::<_, Withdrawal>(
        r#"
            INSERT INTO withdrawals
            (id, user_id, amount_in_cents, payment_method, payment_details, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            RETURNING *
        "#,
    )
    .bind(withdrawal_id)
    .bind(user_id)
    .bind(request.amount_in_cents)
    .bind(&request.payment_method)
    .bind(&request.payment_details)
    .fetch_one(&mut *conn)
    .await
}

pub async fn lock_by_id(
    conn: &mut PgConnection,
    withdrawal_id: &str,
) -> Result<Option<Withdrawal>, sqlx::Error> {
    sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1 FOR UPDATE")
        .bind(withdrawal_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn apply_transition(
    conn: &mut PgConnection,
    withdrawal_id: &str,
    transition: &WithdrawalTransition,
) -> Result<Withdrawal, sqlx::Error> {
    sqlx::query_as::<_, Withdrawal>(
        r#"
            UPDATE withdrawals
            SET status = $2,
                processed_at = CASE WHEN $2 = 'processing'::withdrawal_status
                    THEN CURRENT_TIMESTAMP ELSE processed_at END,
                completed_at = CASE WHEN $2 = 'completed'::withdrawal_status
                    THEN CURRENT_TIMESTAMP ELSE completed_at END,
                rejection_reason = COALESCE($3, rejection_reason),
                admin_notes = COALESCE($4, admin_notes),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
        "#,
    )
    .bind(withdrawal_id)
    .bind(transition.target())
    .bind(transition.rejection_reason())
    .bind(transition.admin_notes())
    .fetch_one(&mut *conn)
    .await
}

pub async fn list_for_user(
    conn: &mut PgConnection,
    user_id: &str,
) -> Result<Vec<Withdrawal>, sqlx::Error> {
    sqlx::query_as::<_, Withdrawal>(
        "SELECT * FROM withdrawals WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
}
