use async_trait::async_trait;

use crate::models::{
    referrals::{LedgerTotals, Referral, ReferralStatus},
    users::{NewUser, TopReferrer, User, UserUpdate},
    withdrawals::{NewWithdrawal, Withdrawal, WithdrawalReceipt, WithdrawalStatus, WithdrawalTransition},
};

#[cfg(test)]
pub mod memory;
pub mod postgres;
mod referrals;
mod users;
mod withdrawals;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Referral not found: {0}")]
    ReferralNotFound(String),
    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(String),
    #[error("A user cannot refer themselves")]
    SelfReferral,
    #[error("User {referred_user_id} has already been referred by {referrer_id}")]
    DuplicateReferral {
        referrer_id: String,
        referred_user_id: String,
    },
    #[error("Unknown referral code: {0}")]
    UnknownReferralCode(String),
    #[error("Email already registered: {0}")]
    EmailTaken(String),
    #[error("Withdrawal amount must be positive, got {0}")]
    InvalidAmount(i64),
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },
    #[error("Minimum withdrawal amount is {minimum}, requested {requested}")]
    BelowMinimumWithdrawal { requested: i64, minimum: i64 },
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("Cannot remove the last admin user")]
    LastAdmin,
    #[error("Storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Persistence for the user, referral and withdrawal ledgers.
///
/// Every mutating method is all-or-nothing: validation happens against locked
/// rows before anything is written, and a failure leaves the ledgers as they
/// were.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Inserts the user and, for a non-empty referral code, the pending
    /// referral plus the referrer's count increment.
    async fn register_user(&self, new_user: &NewUser) -> Result<User, LedgerError>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, LedgerError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError>;

    /// Newest first.
    async fn list_users(&self) -> Result<Vec<User>, LedgerError>;

    /// Changes profile fields only. Demoting the last admin fails with
    /// `LastAdmin`.
    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<User, LedgerError>;

    async fn delete_user(&self, user_id: &str) -> Result<(), LedgerError>;

    async fn create_referral(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
        referral_code: Option<&str>,
    ) -> Result<Referral, LedgerError>;

    async fn get_referral(&self, referral_id: &str) -> Result<Option<Referral>, LedgerError>;

    /// Marks a pending referral completed and credits the referrer.
    async fn complete_referral(
        &self,
        referral_id: &str,
        earnings_in_cents: i64,
    ) -> Result<Referral, LedgerError>;

    async fn cancel_referral(&self, referral_id: &str) -> Result<Referral, LedgerError>;

    /// Newest first. `None` lists every referral.
    async fn list_referrals(&self, referrer_id: Option<&str>)
        -> Result<Vec<Referral>, LedgerError>;

    async fn count_referrals(
        &self,
        referrer_id: &str,
        status: ReferralStatus,
    ) -> Result<i64, LedgerError>;

    /// Debits the available balance and records a pending withdrawal.
    async fn withdraw(
        &self,
        user_id: &str,
        request: &NewWithdrawal,
        min_withdrawal_in_cents: i64,
    ) -> Result<WithdrawalReceipt, LedgerError>;

    /// Rejections return the amount to the user's balance.
    async fn transition_withdrawal(
        &self,
        withdrawal_id: &str,
        transition: &WithdrawalTransition,
    ) -> Result<Withdrawal, LedgerError>;

    async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>, LedgerError>;

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, LedgerError>;

    async fn totals(&self) -> Result<LedgerTotals, LedgerError>;
}

pub fn check_referral_pair(referrer_id: &str, referred_user_id: &str) -> Result<(), LedgerError> {
    if referrer_id == referred_user_id {
        return Err(LedgerError::SelfReferral);
    }

    Ok(())
}

/// Balance first, then the configured floor.
pub fn check_withdrawal(
    available: i64,
    requested: i64,
    min_withdrawal_in_cents: i64,
) -> Result<(), LedgerError> {
    if requested <= 0 {
        return Err(LedgerError::InvalidAmount(requested));
    }
    if requested > available {
        return Err(LedgerError::InsufficientBalance {
            requested,
            available,
        });
    }
    if requested < min_withdrawal_in_cents {
        return Err(LedgerError::BelowMinimumWithdrawal {
            requested,
            minimum: min_withdrawal_in_cents,
        });
    }

    Ok(())
}

pub fn check_referral_transition(
    current: ReferralStatus,
    next: ReferralStatus,
) -> Result<(), LedgerError> {
    if !current.can_transition_to(next) {
        return Err(LedgerError::InvalidTransition {
            entity: "referral",
            from: current.to_string(),
            to: next.to_string(),
        });
    }

    Ok(())
}

pub fn check_withdrawal_transition(
    current: WithdrawalStatus,
    next: WithdrawalStatus,
) -> Result<(), LedgerError> {
    if !current.can_transition_to(next) {
        return Err(LedgerError::InvalidTransition {
            entity: "withdrawal",
            from: current.to_string(),
            to: next.to_string(),
        });
    }

    Ok(())
}
