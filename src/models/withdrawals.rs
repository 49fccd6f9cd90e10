use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Rejected,
}

impl WithdrawalStatus {
    pub fn can_transition_to(self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;

        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Pending, Rejected)
                | (Processing, Rejected)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: String,
    pub user_id: String,
    pub amount_in_cents: i64,
    pub payment_method: String,
    pub payment_details: String,
    pub status: WithdrawalStatus,
    pub rejection_reason: Option<String>,
    pub admin_notes: Option<String>,
    pub processed_at: Option<chrono::NaiveDateTime>,
    pub completed_at: Option<chrono::NaiveDateTime>,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewWithdrawal {
    pub amount_in_cents: i64,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub payment_details: String,
}

/// Admin-driven move of a withdrawal to its next state.
#[derive(Clone, Debug)]
pub enum WithdrawalTransition {
    Processing { admin_notes: Option<String> },
    Completed { admin_notes: Option<String> },
    Rejected {
        reason: String,
        admin_notes: Option<String>,
    },
}

impl WithdrawalTransition {
    pub fn target(&self) -> WithdrawalStatus {
        match self {
            WithdrawalTransition::Processing { .. } => WithdrawalStatus::Processing,
            WithdrawalTransition::Completed { .. } => WithdrawalStatus::Completed,
            WithdrawalTransition::Rejected { .. } => WithdrawalStatus::Rejected,
        }
    }

    pub fn admin_notes(&self) -> Option<&str> {
        match self {
            WithdrawalTransition::Processing { admin_notes }
            | WithdrawalTransition::Completed { admin_notes }
            | WithdrawalTransition::Rejected { admin_notes, .. } => admin_notes.as_deref(),
        }
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            WithdrawalTransition::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Outcome of a successful withdrawal request.
#[derive(Clone, Debug, Serialize)]
pub struct WithdrawalReceipt {
    pub withdrawal: Withdrawal,
    pub balance_in_cents: i64,
}
