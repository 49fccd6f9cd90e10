use crate::models::referrals::LedgerTotals;
use crate::models::users::{self, NewUser, TopReferrer, User, UserUpdate};

use sqlx::{Connection, PgConnection};
use uuid::Uuid;

use super::LedgerError;

const EMAIL_KEY: &str = "users_email_key";
const REFERRAL_CODE_KEY: &str = "users_referral_code_key";

/// Name of the unique constraint a failed statement ran into, if any.
fn unique_violation(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            db.constraint().map(str::to_string)
        }
        _ => None,
    }
}

/// A concurrent registration can claim the generated code between the
/// lookup and the insert. The insert runs in a savepoint so the caller's
/// transaction survives the collision and a fresh code is tried.
pub async fn insert_user(
    conn: &mut PgConnection,
    new_user: &NewUser,
    referred_by: Option<&str>,
) -> Result<User, LedgerError> {
    loop {
        let mut savepoint = conn.begin().await?;

        let user_id = Uuid::new_v4().hyphenated().to_string();
        let referral_code = unused_referral_code(&mut savepoint).await?;

        let inserted = sqlx::query_as::<_, User>(
            r#"
                INSERT INTO users (id, name, email, is_admin, referral_code, referred_by)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(new_user.is_admin)
        .bind(&referral_code)
        .bind(referred_by)
        .fetch_one(&mut *savepoint)
        .await;

        match inserted {
            Ok(user) => {
                savepoint.commit().await?;
                return Ok(user);
            }
            Err(e) => match unique_violation(&e).as_deref() {
                Some(REFERRAL_CODE_KEY) => {
                    savepoint.rollback().await?;
                    log::debug!("Referral code {} was taken concurrently, retrying.", referral_code);
                }
                Some(EMAIL_KEY) => return Err(LedgerError::EmailTaken(new_user.email.clone())),
                _ => return Err(e.into()),
            },
        }
    }
}

async fn unused_referral_code(conn: &mut PgConnection) -> Result<String, sqlx::Error> {
    loop {
        let code = users::generate_referral_code();
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE referral_code = $1)")
                .bind(&code)
                .fetch_one(&mut *conn)
                .await?;

        if !taken {
            return Ok(code);
        }
    }
}

pub async fn email_taken(conn: &mut PgConnection, email: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(&mut *conn)
        .await
}

pub async fn find_by_id(conn: &mut PgConnection, user_id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn list(conn: &mut PgConnection) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC, id")
        .fetch_all(&mut *conn)
        .await
}

/// Row lock held until the surrounding transaction ends.
pub async fn lock_by_id(conn: &mut PgConnection, user_id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn lock_by_referral_code(
    conn: &mut PgConnection,
    code: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE referral_code = $1 FOR UPDATE")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn increment_referral_count(
    conn: &mut PgConnection,
    user_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE users SET referral_count = referral_count + 1, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn credit_earnings(
    conn: &mut PgConnection,
    user_id: &str,
    amount_in_cents: i64,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
            UPDATE users
            SET referral_earnings_in_cents = referral_earnings_in_cents + $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(amount_in_cents)
    .fetch_one(&mut *conn)
    .await
}

/// Negative deltas return a rejected withdrawal to the balance.
pub async fn add_withdrawn(
    conn: &mut PgConnection,
    user_id: &str,
    delta_in_cents: i64,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(
        r#"
            UPDATE users
            SET referral_withdrawn_in_cents = referral_withdrawn_in_cents + $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(delta_in_cents)
    .fetch_one(&mut *conn)
    .await
}

/// Absent fields keep their current value.
pub async fn update(
    conn: &mut PgConnection,
    user_id: &str,
    update: &UserUpdate,
) -> Result<User, LedgerError> {
    sqlx::query_as::<_, User>(
        r#"
            UPDATE users
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                is_admin = COALESCE($4, is_admin),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(&update.name)
    .bind(&update.email)
    .bind(update.is_admin)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match unique_violation(&e).as_deref() {
        Some(EMAIL_KEY) => LedgerError::EmailTaken(update.email.clone().unwrap_or_default()),
        _ => e.into(),
    })
}

pub async fn count_admins(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE is_admin")
        .fetch_one(&mut *conn)
        .await
}

pub async fn delete(conn: &mut PgConnection, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn top_referrers(
    conn: &mut PgConnection,
    limit: i64,
) -> Result<Vec<TopReferrer>, sqlx::Error> {
    sqlx::query_as::<_, TopReferrer>(
        r#"
            SELECT id, name, email, referral_count, referral_earnings_in_cents
            FROM users
            WHERE referral_count > 0
            ORDER BY referral_count DESC, created_at ASC
            LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await
}

pub async fn totals(conn: &mut PgConnection) -> Result<LedgerTotals, sqlx::Error> {
    sqlx::query_as::<_, LedgerTotals>(
        r#"
            SELECT
                (SELECT COUNT(1) FROM users) AS total_users,
                (SELECT COUNT(1) FROM referrals) AS total_referrals,
                (SELECT COUNT(1) FROM referrals WHERE status = 'pending') AS pending_referrals,
                (SELECT COUNT(1) FROM referrals WHERE status = 'completed') AS completed_referrals,
                (SELECT COALESCE(SUM(referral_earnings_in_cents), 0)::BIGINT FROM users)
                    AS total_referral_earnings_in_cents
        "#,
    )
    .fetch_one(&mut *conn)
    .await
}
