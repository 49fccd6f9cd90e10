use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    check_referral_pair, check_referral_transition, check_withdrawal,
    check_withdrawal_transition, LedgerError, LedgerStore,
};
use crate::models::{
    referrals::{LedgerTotals, Referral, ReferralStatus},
    users::{generate_referral_code, NewUser, TopReferrer, User, UserUpdate},
    withdrawals::{
        NewWithdrawal, Withdrawal, WithdrawalReceipt, WithdrawalStatus, WithdrawalTransition,
    },
};

#[derive(Clone, Default)]
struct MemoryState {
    users: Vec<User>,
    referrals: Vec<Referral>,
    withdrawals: Vec<Withdrawal>,
}

impl MemoryState {
    fn user(&self, user_id: &str) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    fn user_mut(&mut self, user_id: &str) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == user_id)
    }

    fn referral_mut(&mut self, referral_id: &str) -> Option<&mut Referral> {
        self.referrals.iter_mut().find(|r| r.id == referral_id)
    }

    fn pair_exists(&self, referrer_id: &str, referred_user_id: &str) -> bool {
        self.referrals
            .iter()
            .any(|r| r.referrer_id == referrer_id && r.referred_user_id == referred_user_id)
    }

    fn unused_referral_code(&self) -> String {
        loop {
            let code = generate_referral_code();
            if !self.users.iter().any(|u| u.referral_code == code) {
                return code;
            }
        }
    }

    /// Callers have already validated the pair and both users.
    fn insert_referral(&mut self, referrer_id: &str, referred_user_id: &str, code: &str) -> Referral {
        let now = now();
        let referral = Referral {
            id: new_id(),
            referrer_id: referrer_id.to_string(),
            referred_user_id: referred_user_id.to_string(),
            referral_code_used: code.to_string(),
            status: ReferralStatus::Pending,
            earnings_in_cents: 0,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.referrals.push(referral.clone());

        if let Some(referrer) = self.user_mut(referrer_id) {
            referrer.referral_count += 1;
            referrer.updated_at = now;
        }

        referral
    }
}

/// Single-lock stand-in for Postgres. Every call holds the lock for its whole
/// duration, so each operation is serialisable. Mutations work on a staged
/// copy of the state that replaces the real one only once every write has
/// gone through.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
    fail_between_writes: AtomicBool,
}

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn new_id() -> String {
    Uuid::new_v4().hyphenated().to_string()
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes mutations fail with a storage error after their first write,
    /// the way a dropped connection fails a transaction midway.
    pub fn fail_between_writes(&self, fail: bool) {
        self.fail_between_writes.store(fail, Ordering::SeqCst);
    }

    fn between_writes(&self) -> Result<(), LedgerError> {
        if self.fail_between_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Storage(sqlx::Error::PoolClosed));
        }

        Ok(())
    }

    /// Fixture helper: overwrites a user's earnings, withdrawals and count.
    pub async fn set_referral_totals(
        &self,
        user_id: &str,
        earnings_in_cents: i64,
        withdrawn_in_cents: i64,
        referral_count: i32,
    ) {
        let mut state = self.state.lock().await;
        if let Some(user) = state.user_mut(user_id) {
            user.referral_earnings_in_cents = earnings_in_cents;
            user.referral_withdrawn_in_cents = withdrawn_in_cents;
            user.referral_count = referral_count;
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn register_user(&self, new_user: &NewUser) -> Result<User, LedgerError> {
        let mut state = self.state.lock().await;

        if state.users.iter().any(|u| u.email == new_user.email) {
            return Err(LedgerError::EmailTaken(new_user.email.clone()));
        }

        let code = new_user.effective_referral_code();
        let referrer_id = match code {
            Some(code) => Some(
                state
                    .users
                    .iter()
                    .find(|u| u.referral_code == code)
                    .map(|u| u.id.clone())
                    .ok_or_else(|| LedgerError::UnknownReferralCode(code.to_string()))?,
            ),
            None => None,
        };

        let mut staged = state.clone();
        let now = now();
        let user = User {
            id: new_id(),
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            is_admin: new_user.is_admin,
            referral_code: staged.unused_referral_code(),
            referred_by: referrer_id.clone(),
            referral_earnings_in_cents: 0,
            referral_withdrawn_in_cents: 0,
            referral_count: 0,
            created_at: now,
            updated_at: now,
        };
        staged.users.push(user.clone());
        self.between_writes()?;

        if let (Some(referrer_id), Some(code)) = (referrer_id, code) {
            staged.insert_referral(&referrer_id, &user.id, code);
        }

        *state = staged;
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>, LedgerError> {
        Ok(self.state.lock().await.user(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, LedgerError> {
        Ok(self.state.lock().await.users.iter().rev().cloned().collect())
    }

    async fn update_user(&self, user_id: &str, update: &UserUpdate) -> Result<User, LedgerError> {
        let mut state = self.state.lock().await;

        let user = state
            .user(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        if user.is_admin
            && update.demotes()
            && state.users.iter().filter(|u| u.is_admin).count() <= 1
        {
            return Err(LedgerError::LastAdmin);
        }
        if let Some(email) = &update.email {
            if state.users.iter().any(|u| u.id != user_id && &u.email == email) {
                return Err(LedgerError::EmailTaken(email.clone()));
            }
        }

        let mut staged = state.clone();
        let user = staged
            .user_mut(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        if let Some(name) = &update.name {
            user.name = name.clone();
        }
        if let Some(email) = &update.email {
            user.email = email.clone();
        }
        if let Some(is_admin) = update.is_admin {
            user.is_admin = is_admin;
        }
        user.updated_at = now();
        let user = user.clone();
        self.between_writes()?;

        *state = staged;
        Ok(user)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;

        let user = state
            .user(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        if user.is_admin && state.users.iter().filter(|u| u.is_admin).count() <= 1 {
            return Err(LedgerError::LastAdmin);
        }

        let mut staged = state.clone();
        staged.users.retain(|u| u.id != user_id);
        self.between_writes()?;
        staged
            .referrals
            .retain(|r| r.referrer_id != user_id && r.referred_user_id != user_id);
        staged.withdrawals.retain(|w| w.user_id != user_id);
        for user in staged.users.iter_mut() {
            if user.referred_by.as_deref() == Some(user_id) {
                user.referred_by = None;
            }
        }

        *state = staged;
        Ok(())
    }

    async fn create_referral(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
        referral_code: Option<&str>,
    ) -> Result<Referral, LedgerError> {
        check_referral_pair(referrer_id, referred_user_id)?;
        let mut state = self.state.lock().await;

        let referrer = state
            .user(referrer_id)
            .ok_or_else(|| LedgerError::UserNotFound(referrer_id.to_string()))?;
        let code = referral_code
            .unwrap_or(&referrer.referral_code)
            .to_string();
        if state.user(referred_user_id).is_none() {
            return Err(LedgerError::UserNotFound(referred_user_id.to_string()));
        }
        if state.pair_exists(referrer_id, referred_user_id) {
            return Err(LedgerError::DuplicateReferral {
                referrer_id: referrer_id.to_string(),
                referred_user_id: referred_user_id.to_string(),
            });
        }

        let mut staged = state.clone();
        let referral = staged.insert_referral(referrer_id, referred_user_id, &code);
        self.between_writes()?;

        *state = staged;
        Ok(referral)
    }

    async fn get_referral(&self, referral_id: &str) -> Result<Option<Referral>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.referrals.iter().find(|r| r.id == referral_id).cloned())
    }

    async fn complete_referral(
        &self,
        referral_id: &str,
        earnings_in_cents: i64,
    ) -> Result<Referral, LedgerError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();

        let referral = staged
            .referral_mut(referral_id)
            .ok_or_else(|| LedgerError::ReferralNotFound(referral_id.to_string()))?;
        check_referral_transition(referral.status, ReferralStatus::Completed)?;

        let now = now();
        referral.status = ReferralStatus::Completed;
        referral.earnings_in_cents = earnings_in_cents;
        referral.completed_at = Some(now);
        referral.updated_at = now;
        let referral = referral.clone();
        self.between_writes()?;

        if let Some(referrer) = staged.user_mut(&referral.referrer_id) {
            referrer.referral_earnings_in_cents += earnings_in_cents;
            referrer.updated_at = now;
        }

        *state = staged;
        Ok(referral)
    }

    async fn cancel_referral(&self, referral_id: &str) -> Result<Referral, LedgerError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();

        let referral = staged
            .referral_mut(referral_id)
            .ok_or_else(|| LedgerError::ReferralNotFound(referral_id.to_string()))?;
        check_referral_transition(referral.status, ReferralStatus::Cancelled)?;

        referral.status = ReferralStatus::Cancelled;
        referral.updated_at = now();
        let referral = referral.clone();
        self.between_writes()?;

        *state = staged;
        Ok(referral)
    }

    async fn list_referrals(
        &self,
        referrer_id: Option<&str>,
    ) -> Result<Vec<Referral>, LedgerError> {
        let state = self.state.lock().await;

        Ok(state
            .referrals
            .iter()
            .rev()
            .filter(|r| referrer_id.map_or(true, |id| r.referrer_id == id))
            .cloned()
            .collect())
    }

    async fn count_referrals(
        &self,
        referrer_id: &str,
        status: ReferralStatus,
    ) -> Result<i64, LedgerError> {
        let state = self.state.lock().await;

        Ok(state
            .referrals
            .iter()
            .filter(|r| r.referrer_id == referrer_id && r.status == status)
            .count() as i64)
    }

    async fn withdraw(
        &self,
        user_id: &str,
        request: &NewWithdrawal,
        min_withdrawal_in_cents: i64,
    ) -> Result<WithdrawalReceipt, LedgerError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();

        let user = staged
            .user_mut(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        check_withdrawal(
            user.available_balance(),
            request.amount_in_cents,
            min_withdrawal_in_cents,
        )?;

        let now = now();
        user.referral_withdrawn_in_cents += request.amount_in_cents;
        user.updated_at = now;
        let balance_in_cents = user.available_balance();
        self.between_writes()?;

        let withdrawal = Withdrawal {
            id: new_id(),
            user_id: user_id.to_string(),
            amount_in_cents: request.amount_in_cents,
            payment_method: request.payment_method.clone(),
            payment_details: request.payment_details.clone(),
            status: WithdrawalStatus::Pending,
            rejection_reason: None,
            admin_notes: None,
            processed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        staged.withdrawals.push(withdrawal.clone());

        *state = staged;
        Ok(WithdrawalReceipt {
            withdrawal,
            balance_in_cents,
        })
    }

    async fn transition_withdrawal(
        &self,
        withdrawal_id: &str,
        transition: &WithdrawalTransition,
    ) -> Result<Withdrawal, LedgerError> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();

        let withdrawal = staged
            .withdrawals
            .iter_mut()
            .find(|w| w.id == withdrawal_id)
            .ok_or_else(|| LedgerError::WithdrawalNotFound(withdrawal_id.to_string()))?;
        let target = transition.target();
        check_withdrawal_transition(withdrawal.status, target)?;

        let now = now();
        withdrawal.status = target;
        match target {
            WithdrawalStatus::Processing => withdrawal.processed_at = Some(now),
            WithdrawalStatus::Completed => withdrawal.completed_at = Some(now),
            _ => {}
        }
        if let Some(reason) = transition.rejection_reason() {
            withdrawal.rejection_reason = Some(reason.to_string());
        }
        if let Some(notes) = transition.admin_notes() {
            withdrawal.admin_notes = Some(notes.to_string());
        }
        withdrawal.updated_at = now;
        let withdrawal = withdrawal.clone();
        self.between_writes()?;

        if target == WithdrawalStatus::Rejected {
            if let Some(user) = staged.user_mut(&withdrawal.user_id) {
                user.referral_withdrawn_in_cents -= withdrawal.amount_in_cents;
                user.updated_at = now;
            }
        }

        *state = staged;
        Ok(withdrawal)
    }

    async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        let state = self.state.lock().await;

        Ok(state
            .withdrawals
            .iter()
            .rev()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, LedgerError> {
        let state = self.state.lock().await;

        let mut referrers: Vec<&User> = state
            .users
            .iter()
            .filter(|u| u.referral_count > 0)
            .collect();
        // Stable sort keeps registration order among equal counts.
        referrers.sort_by(|a, b| b.referral_count.cmp(&a.referral_count));

        Ok(referrers
            .into_iter()
            .take(limit.max(0) as usize)
            .map(TopReferrer::from)
            .collect())
    }

    async fn totals(&self) -> Result<LedgerTotals, LedgerError> {
        let state = self.state.lock().await;

        let count_status = |status: ReferralStatus| {
            state.referrals.iter().filter(|r| r.status == status).count() as i64
        };

        Ok(LedgerTotals {
            total_users: state.users.len() as i64,
            total_referrals: state.referrals.len() as i64,
            pending_referrals: count_status(ReferralStatus::Pending),
            completed_referrals: count_status(ReferralStatus::Completed),
            total_referral_earnings_in_cents: state
                .users
                .iter()
                .map(|u| u.referral_earnings_in_cents)
                .sum(),
        })
    }
}
