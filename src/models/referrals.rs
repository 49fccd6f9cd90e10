use std::fmt;

use serde::{Deserialize, Serialize};

use super::users::TopReferrer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "referral_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Pending,
    Completed,
    Cancelled,
}

impl ReferralStatus {
    /// Only pending referrals move, and only once.
    pub fn can_transition_to(self, next: ReferralStatus) -> bool {
        matches!(
            (self, next),
            (ReferralStatus::Pending, ReferralStatus::Completed)
                | (ReferralStatus::Pending, ReferralStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Completed => "completed",
            ReferralStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Referral {
    pub id: String,
    pub referrer_id: String,
    pub referred_user_id: String,
    pub referral_code_used: String,
    pub status: ReferralStatus,
    pub earnings_in_cents: i64,
    pub completed_at: Option<chrono::NaiveDateTime>,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewReferral {
    pub referrer_id: String,
    pub referred_user_id: String,
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserReferralStats {
    pub total_referrals: i32,
    pub pending_referrals: i64,
    pub completed_referrals: i64,
    pub total_earnings_in_cents: i64,
    pub total_withdrawn_in_cents: i64,
    pub available_balance_in_cents: i64,
    pub referral_link: String,
    pub referral_code: String,
    pub can_withdraw: bool,
    pub min_withdrawal_in_cents: i64,
}

/// Counts straight from the ledgers, before top referrers are attached.
#[derive(Clone, Debug, Default, Serialize, sqlx::FromRow)]
pub struct LedgerTotals {
    pub total_users: i64,
    pub total_referrals: i64,
    pub pending_referrals: i64,
    pub completed_referrals: i64,
    pub total_referral_earnings_in_cents: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemStats {
    #[serde(flatten)]
    pub totals: LedgerTotals,
    pub top_referrers: Vec<TopReferrer>,
}
