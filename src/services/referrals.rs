use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    referrals::{Referral, ReferralStatus, SystemStats, UserReferralStats},
    users::{TopReferrer, User},
    withdrawals::{NewWithdrawal, Withdrawal, WithdrawalReceipt, WithdrawalTransition},
};
use crate::repositories::{LedgerError, LedgerStore};
use crate::settings::Referrals;

pub const DEFAULT_TOP_REFERRERS: i64 = 10;
const MAX_TOP_REFERRERS: i64 = 100;

pub enum ReferralRequest {
    CreateReferral {
        referrer_id: String,
        referred_user_id: String,
        referral_code: Option<String>,
        response: oneshot::Sender<Result<Referral, ServiceError>>,
    },
    ProcessSuccessfulReferral {
        referral_id: String,
        bonus_amount_in_cents: Option<i64>,
        response: oneshot::Sender<Result<Referral, ServiceError>>,
    },
    CancelReferral {
        referral_id: String,
        response: oneshot::Sender<Result<Referral, ServiceError>>,
    },
    ListReferrals {
        referrer_id: Option<String>,
        response: oneshot::Sender<Result<Vec<Referral>, ServiceError>>,
    },
    GetUserReferralStats {
        user_id: String,
        response: oneshot::Sender<Result<UserReferralStats, ServiceError>>,
    },
    ProcessWithdrawal {
        user_id: String,
        request: NewWithdrawal,
        response: oneshot::Sender<Result<WithdrawalReceipt, ServiceError>>,
    },
    TransitionWithdrawal {
        withdrawal_id: String,
        transition: WithdrawalTransition,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    ListWithdrawals {
        user_id: String,
        response: oneshot::Sender<Result<Vec<Withdrawal>, ServiceError>>,
    },
    GetTopReferrers {
        limit: Option<i64>,
        response: oneshot::Sender<Result<Vec<TopReferrer>, ServiceError>>,
    },
    GetSystemStats {
        response: oneshot::Sender<Result<SystemStats, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    store: Arc<dyn LedgerStore>,
    settings: Referrals,
}

impl ReferralRequestHandler {
    pub fn new(store: Arc<dyn LedgerStore>, settings: Referrals) -> Self {
        ReferralRequestHandler { store, settings }
    }

    async fn require_user(&self, user_id: &str) -> Result<User, ServiceError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()).into())
    }

    /// Records a pending referral and counts it against the referrer. The
    /// referrer's current code is recorded when none is given.
    pub async fn create_referral(
        &self,
        referrer_id: &str,
        referred_user_id: &str,
        referral_code: Option<&str>,
    ) -> Result<Referral, ServiceError> {
        let referral = self
            .store
            .create_referral(referrer_id, referred_user_id, referral_code)
            .await
            .map_err(|e| {
                log::warn!(
                    "Could not create referral {} -> {}: {}",
                    referrer_id,
                    referred_user_id,
                    e
                );
                ServiceError::from(e)
            })?;

        log::info!(
            "Created referral {} ({} -> {}).",
            referral.id,
            referral.referrer_id,
            referral.referred_user_id
        );
        Ok(referral)
    }

    /// Completes a pending referral and credits the referrer with the bonus.
    /// The referral count is not touched again; it was counted at creation.
    pub async fn process_successful_referral(
        &self,
        referral_id: &str,
        bonus_amount_in_cents: Option<i64>,
    ) -> Result<Referral, ServiceError> {
        let bonus = bonus_amount_in_cents.unwrap_or(self.settings.bonus_amount_in_cents);
        if bonus < 0 {
            return Err(LedgerError::InvalidAmount(bonus).into());
        }

        match self.store.complete_referral(referral_id, bonus).await {
            Ok(referral) => {
                log::info!(
                    "Referral {} completed, credited {} to {}.",
                    referral.id,
                    bonus,
                    referral.referrer_id
                );
                Ok(referral)
            }
            Err(e) => {
                log::error!(
                    "Failed to process successful referral {} (amount {}): {}",
                    referral_id,
                    bonus,
                    e
                );
                Err(e.into())
            }
        }
    }

    pub async fn cancel_referral(&self, referral_id: &str) -> Result<Referral, ServiceError> {
        let referral = self.store.cancel_referral(referral_id).await.map_err(|e| {
            log::warn!("Could not cancel referral {}: {}", referral_id, e);
            ServiceError::from(e)
        })?;

        log::info!("Referral {} cancelled.", referral.id);
        Ok(referral)
    }

    pub async fn list_referrals(
        &self,
        referrer_id: Option<&str>,
    ) -> Result<Vec<Referral>, ServiceError> {
        Ok(self.store.list_referrals(referrer_id).await?)
    }

    pub async fn get_user_referral_stats(
        &self,
        user_id: &str,
    ) -> Result<UserReferralStats, ServiceError> {
        let user = self.require_user(user_id).await?;
        let pending_referrals = self
            .store
            .count_referrals(&user.id, ReferralStatus::Pending)
            .await?;
        let completed_referrals = self
            .store
            .count_referrals(&user.id, ReferralStatus::Completed)
            .await?;

        Ok(UserReferralStats {
            total_referrals: user.referral_count,
            pending_referrals,
            completed_referrals,
            total_earnings_in_cents: user.referral_earnings_in_cents,
            total_withdrawn_in_cents: user.referral_withdrawn_in_cents,
            available_balance_in_cents: user.available_balance(),
            referral_link: user.referral_link(&self.settings.register_url),
            referral_code: user.referral_code.clone(),
            can_withdraw: self.can_withdraw(&user),
            min_withdrawal_in_cents: self.settings.min_withdrawal_in_cents,
        })
    }

    pub fn can_withdraw(&self, user: &User) -> bool {
        user.available_balance() >= self.settings.min_withdrawal_in_cents
    }

    /// Debits the balance and records a pending withdrawal, or changes
    /// nothing.
    pub async fn process_withdrawal(
        &self,
        user_id: &str,
        request: NewWithdrawal,
    ) -> Result<WithdrawalReceipt, ServiceError> {
        match self
            .store
            .withdraw(user_id, &request, self.settings.min_withdrawal_in_cents)
            .await
        {
            Ok(receipt) => {
                log::info!(
                    "Withdrawal {} of {} requested by {}, balance now {}.",
                    receipt.withdrawal.id,
                    request.amount_in_cents,
                    user_id,
                    receipt.balance_in_cents
                );
                Ok(receipt)
            }
            Err(LedgerError::Storage(e)) => {
                log::error!(
                    "Failed to process withdrawal for {} (amount {}): {}",
                    user_id,
                    request.amount_in_cents,
                    e
                );
                Err(LedgerError::Storage(e).into())
            }
            Err(e) => {
                log::info!(
                    "Withdrawal of {} for {} refused: {}",
                    request.amount_in_cents,
                    user_id,
                    e
                );
                Err(e.into())
            }
        }
    }

    pub async fn transition_withdrawal(
        &self,
        withdrawal_id: &str,
        transition: WithdrawalTransition,
    ) -> Result<Withdrawal, ServiceError> {
        let withdrawal = self
            .store
            .transition_withdrawal(withdrawal_id, &transition)
            .await
            .map_err(|e| {
                log::warn!(
                    "Could not move withdrawal {} to {}: {}",
                    withdrawal_id,
                    transition.target(),
                    e
                );
                ServiceError::from(e)
            })?;

        log::info!("Withdrawal {} is now {}.", withdrawal.id, withdrawal.status);
        Ok(withdrawal)
    }

    pub async fn list_withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>, ServiceError> {
        self.require_user(user_id).await?;
        Ok(self.store.list_withdrawals(user_id).await?)
    }

    pub async fn get_top_referrers(
        &self,
        limit: Option<i64>,
    ) -> Result<Vec<TopReferrer>, ServiceError> {
        let limit = limit
            .unwrap_or(DEFAULT_TOP_REFERRERS)
            .min(MAX_TOP_REFERRERS);
        if limit <= 0 {
            return Ok(Vec::new());
        }

        Ok(self.store.top_referrers(limit).await?)
    }

    pub async fn get_system_stats(&self) -> Result<SystemStats, ServiceError> {
        let totals = self.store.totals().await?;
        let top_referrers = self.get_top_referrers(None).await?;

        Ok(SystemStats {
            totals,
            top_referrers,
        })
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::CreateReferral {
                referrer_id,
                referred_user_id,
                referral_code,
                response,
            } => {
                let referral = self
                    .create_referral(&referrer_id, &referred_user_id, referral_code.as_deref())
                    .await;
                let _ = response.send(referral);
            }
            ReferralRequest::ProcessSuccessfulReferral {
                referral_id,
                bonus_amount_in_cents,
                response,
            } => {
                let referral = self
                    .process_successful_referral(&referral_id, bonus_amount_in_cents)
                    .await;
                let _ = response.send(referral);
            }
            ReferralRequest::CancelReferral {
                referral_id,
                response,
            } => {
                let referral = self.cancel_referral(&referral_id).await;
                let _ = response.send(referral);
            }
            ReferralRequest::ListReferrals {
                referrer_id,
                response,
            } => {
                let referrals = self.list_referrals(referrer_id.as_deref()).await;
                let _ = response.send(referrals);
            }
            ReferralRequest::GetUserReferralStats { user_id, response } => {
                let stats = self.get_user_referral_stats(&user_id).await;
                let _ = response.send(stats);
            }
            ReferralRequest::ProcessWithdrawal {
                user_id,
                request,
                response,
            } => {
                let receipt = self.process_withdrawal(&user_id, request).await;
                let _ = response.send(receipt);
            }
            ReferralRequest::TransitionWithdrawal {
                withdrawal_id,
                transition,
                response,
            } => {
                let withdrawal = self.transition_withdrawal(&withdrawal_id, transition).await;
                let _ = response.send(withdrawal);
            }
            ReferralRequest::ListWithdrawals { user_id, response } => {
                let withdrawals = self.list_withdrawals(&user_id).await;
                let _ = response.send(withdrawals);
            }
            ReferralRequest::GetTopReferrers { limit, response } => {
                let referrers = self.get_top_referrers(limit).await;
                let _ = response.send(referrers);
            }
            ReferralRequest::GetSystemStats { response } => {
                let stats = self.get_system_stats().await;
                let _ = response.send(stats);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
