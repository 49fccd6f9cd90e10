use crate::models::referrals::{Referral, ReferralStatus};

use sqlx::PgConnection;
use uuid::Uuid;

/// `None` when the pair already exists.
pub async fn insert_referral(
    conn: &mut PgConnection,
    referrer_id: &str,
    referred_user_id: &str,
    referral_code_used: &str,
) -> Result<Option<Referral>, sqlx::Error> {
    let referral_id = Uuid::new_v4().hyphenated().to_string();

    sqlx::query_as::<_, Referral>(
        r#"
            INSERT INTO referrals
            (id, referrer_id, referred_user_id, referral_code_used, status, earnings_in_cents)
            VALUES ($1, $2, $3, $4, 'pending', 0)
            ON CONFLICT (referrer_id, referred_user_id) DO NOTHING
            RETURNING *
        "#,
    )
    .bind(referral_id)
    .bind(referrer_id)
    .bind(referred_user_id)
    .bind(referral_code_used)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn find_by_id(
    conn: &mut PgConnection,
    referral_id: &str,
) -> Result<Option<Referral>, sqlx::Error> {
    sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE id = $1")
        .bind(referral_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn lock_by_id(
    conn: &mut PgConnection,
    referral_id: &str,
) -> Result<Option<Referral>, sqlx::Error> {
    sqlx::query_as::<_, Referral>("SELECT * FROM referrals WHERE id = $1 FOR UPDATE")
        .bind(referral_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn mark_completed(
    conn: &mut PgConnection,
    referral_id: &str,
    earnings_in_cents: i64,
) -> Result<Referral, sqlx::Error> {
    sqlx::query_as::<_, Referral>(
        r#"
            UPDATE referrals
            SET status = 'completed',
                earnings_in_cents = $2,
                completed_at = CURRENT_TIMESTAMP,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
        "#,
    )
    .bind(referral_id)
    .bind(earnings_in_cents)
    .fetch_one(&mut *conn)
    .await
}

pub async fn mark_cancelled(
    conn: &mut PgConnection,
    referral_id: &str,
) -> Result<Referral, sqlx::Error> {
    sqlx::query_as::<_, Referral>(
        "UPDATE referrals SET status = 'cancelled', updated_at = CURRENT_TIMESTAMP WHERE id = $1 RETURNING *",
    )
    .bind(referral_id)
    .fetch_one(&mut *conn)
    .await
}

pub async fn list(
    conn: &mut PgConnection,
    referrer_id: Option<&str>,
) -> Result<Vec<Referral>, sqlx::Error> {
    sqlx::query_as::<_, Referral>(
        r#"
            SELECT * FROM referrals
            WHERE $1::TEXT IS NULL OR referrer_id = $1
            ORDER BY created_at DESC
        "#,
    )
    .bind(referrer_id)
    .fetch_all(&mut *conn)
    .await
}

pub async fn count_by_status(
    conn: &mut PgConnection,
    referrer_id: &str,
    status: ReferralStatus,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(1) FROM referrals WHERE referrer_id = $1 AND status = $2")
        .bind(referrer_id)
        .bind(status)
        .fetch_one(&mut *conn)
        .await
}
