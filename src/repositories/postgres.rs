use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::{
    check_referral_pair, check_referral_transition, check_withdrawal,
    check_withdrawal_transition, referrals, users, withdrawals, LedgerError, LedgerStore,
};
use crate::models::{
    referrals::{LedgerTotals, Referral, ReferralStatus},
    users::{NewUser, TopReferrer, User, UserUpdate},
    withdrawals::{
        NewWithdrawal, Withdrawal, WithdrawalReceipt, WithdrawalStatus, WithdrawalTransition,
    },
};

#[derive(Clone)]
pub struct PgLedgerStore {
    conn: PgPool,
}

impl PgLedgerStore {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

/// Inserts the referral and bumps the referrer's count on the caller's
/// transaction. The referrer row must already be locked.
async fn insert_referral_for(
    conn: &mut PgConnection,
    referrer: &User,
    referred_user_id: &str,
    referral_code: &str,
) -> Result<Referral, LedgerError> {
    let referral =
        referrals::insert_referral(&mut *conn, &referrer.id, referred_user_id, referral_code)
            .await?
            .ok_or_else(|| LedgerError::DuplicateReferral {
                referrer_id: referrer.id.clone(),
                referred_user_id: referred_user_id.to_string(),
            })?;

    users::increment_referral_count(&mut *conn, &referrer.id).await?;

    Ok(referral)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn register_user(&self, new_user: &NewUser) -> Result<User, LedgerError> {
        let mut tx = self.conn.begin().await?;

        if users::email_taken(&mut tx, &new_user.email).await? {
            return Err(LedgerError::EmailTaken(new_user.email.clone()));
        }

        let referrer = match new_user.effective_referral_code() {
            Some(code) => Some(
                users::lock_by_referral_code(&mut tx, code)
                    .await?
                    .ok_or_else(|| LedgerError::UnknownReferralCode(code.to_string()))?,
            ),
            None => None,
        };

        let user =
            users::insert_user(&mut tx, new_user, referrer.as_ref().map(|r| r.id.as_str()))
                .await?;

        if let (Some(referrer), Some(code)) = (&referrer, new_user.effective_referral_code()) {
            insert_referral_for(&mut tx, referrer, &user.id, code).await?;
        }

        tx.commit().await?;

        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(users::find_by_id(&mut conn, user_id).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(users::find_by_email(&mut conn, email).await?)
    }

    async fn list_users(&self) -> Result<Vec<User>, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(users::list(&mut conn).await?)
    }

    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<User, LedgerError> {
        let mut tx = self.conn.begin().await?;

        let user = users::lock_by_id(&mut tx, user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        if user.is_admin && update.demotes() && users::count_admins(&mut tx).await? <= 1 {
            return Err(LedgerError::LastAdmin);
        }
        if let Some(email) = update.email.as_deref().filter(|email| *email != user.email) {
            if users::email_taken(&mut tx, email).await? {
                return Err(LedgerError::EmailTaken(email.to_string()));
            }
        }

        let user = users::update(&mut tx, user_id, update).await?;
        tx.commit().await?;

        Ok(user)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), LedgerError> {
        let mut tx = self.conn.begin().await?;

        let user = users::lock_by_id(&mut tx, user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        if user.is_admin && users::count_admins(&mut tx).await? <= 1 {
            return Err(LedgerError::LastAdmin);
        }

        users::delete(&mut tx, user_id).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn create_referral(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
        referral_code: Option<&str>,
    ) -> Result<Referral, LedgerError> {
        check_referral_pair(referrer_id, referred_user_id)?;

        let mut tx = self.conn.begin().await?;

        let referrer = users::lock_by_id(&mut tx, referrer_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(referrer_id.to_string()))?;
        if users::find_by_id(&mut tx, referred_user_id).await?.is_none() {
            return Err(LedgerError::UserNotFound(referred_user_id.to_string()));
        }

        let code = referral_code.unwrap_or(&referrer.referral_code).to_string();
        let referral = insert_referral_for(&mut tx, &referrer, referred_user_id, &code).await?;

        tx.commit().await?;

        Ok(referral)
    }

    async fn get_referral(&self, referral_id: &str) -> Result<Option<Referral>, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(referrals::find_by_id(&mut conn, referral_id).await?)
    }

    async fn complete_referral(
        &self,
        referral_id: &str,
        earnings_in_cents: i64,
    ) -> Result<Referral, LedgerError> {
        let mut tx = self.conn.begin().await?;

        let referral = referrals::lock_by_id(&mut tx, referral_id)
            .await?
            .ok_or_else(|| LedgerError::ReferralNotFound(referral_id.to_string()))?;
        check_referral_transition(referral.status, ReferralStatus::Completed)?;

        let referral = referrals::mark_completed(&mut tx, referral_id, earnings_in_cents).await?;
        users::credit_earnings(&mut tx, &referral.referrer_id, earnings_in_cents).await?;

        tx.commit().await?;

        Ok(referral)
    }

    async fn cancel_referral(&self, referral_id: &str) -> Result<Referral, LedgerError> {
        let mut tx = self.conn.begin().await?;

        let referral = referrals::lock_by_id(&mut tx, referral_id)
            .await?
            .ok_or_else(|| LedgerError::ReferralNotFound(referral_id.to_string()))?;
        check_referral_transition(referral.status, ReferralStatus::Cancelled)?;

        let referral = referrals::mark_cancelled(&mut tx, referral_id).await?;
        tx.commit().await?;

        Ok(referral)
    }

    async fn list_referrals(
        &self,
        referrer_id: Option<&str>,
    ) -> Result<Vec<Referral>, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(referrals::list(&mut conn, referrer_id).await?)
    }

    async fn count_referrals(
        &self,
        referrer_id: &str,
        status: ReferralStatus,
    ) -> Result<i64, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(referrals::count_by_status(&mut conn, referrer_id, status).await?)
    }

    async fn withdraw(
        &self,
        user_id: &str,
        request: &NewWithdrawal,
        min_withdrawal_in_cents: i64,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        let mut tx = self.conn.begin().await?;

        let user = users::lock_by_id(&mut tx, user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        check_withdrawal(
            user.available_balance(),
            request.amount_in_cents,
            min_withdrawal_in_cents,
        )?;

        let user = users::add_withdrawn(&mut tx, user_id, request.amount_in_cents).await?;
        let withdrawal = withdrawals::insert_withdrawal(&mut tx, user_id, request).await?;

        tx.commit().await?;

        Ok(WithdrawalReceipt {
            withdrawal,
            balance_in_cents: user.available_balance(),
        })
    }

    async fn transition_withdrawal(
        &self,
        withdrawal_id: &str,
        transition: &WithdrawalTransition,
    ) -> Result<Withdrawal, LedgerError> {
        let mut tx = self.conn.begin().await?;

        let withdrawal = withdrawals::lock_by_id(&mut tx, withdrawal_id)
            .await?
            .ok_or_else(|| LedgerError::WithdrawalNotFound(withdrawal_id.to_string()))?;
        check_withdrawal_transition(withdrawal.status, transition.target())?;

        if transition.target() == WithdrawalStatus::Rejected {
            users::lock_by_id(&mut tx, &withdrawal.user_id).await?;
            users::add_withdrawn(&mut tx, &withdrawal.user_id, -withdrawal.amount_in_cents)
                .await?;
        }

        let withdrawal = withdrawals::apply_transition(&mut tx, withdrawal_id, transition).await?;
        tx.commit().await?;

        Ok(withdrawal)
    }

    async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(withdrawals::list_for_user(&mut conn, user_id).await?)
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(users::top_referrers(&mut conn, limit).await?)
    }

    async fn totals(&self) -> Result<LedgerTotals, LedgerError> {
        let mut conn = self.conn.acquire().await?;
        Ok(users::totals(&mut conn).await?)
    }
}
