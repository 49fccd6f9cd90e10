use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::referrals::Referral;

pub const REFERRAL_CODE_LENGTH: usize = 8;
const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub referral_earnings_in_cents: i64,
    pub referral_withdrawn_in_cents: i64,
    pub referral_count: i32,
    pub created_at: chrono::NaiveDateTime,
    pub updated_at: chrono::NaiveDateTime,
}

impl User {
    /// Earnings that have not been withdrawn yet.
    pub fn available_balance(&self) -> i64 {
        self.referral_earnings_in_cents - self.referral_withdrawn_in_cents
    }

    pub fn referral_link(&self, register_url: &str) -> String {
        format!("{}?ref={}", register_url, self.referral_code)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub referral_code: Option<String>,
    /// Never read from a request body. Admins come from the configured seed
    /// or from an existing admin.
    #[serde(skip)]
    pub is_admin: bool,
}

impl NewUser {
    /// Referral code to honour at registration. Admins are never referred and
    /// blank codes count as absent.
    pub fn effective_referral_code(&self) -> Option<&str> {
        if self.is_admin {
            return None;
        }

        self.referral_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct TopReferrer {
    pub id: String,
    pub name: String,
    pub email: String,
    pub referral_count: i32,
    pub referral_earnings_in_cents: i64,
}

impl From<&User> for TopReferrer {
    fn from(user: &User) -> Self {
        TopReferrer {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            referral_count: user.referral_count,
            referral_earnings_in_cents: user.referral_earnings_in_cents,
        }
    }
}

/// Fields an admin may change. Balances and counters only move through the
/// ledger operations, so bodies naming them are refused.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_admin: Option<bool>,
}

impl UserUpdate {
    pub fn demotes(&self) -> bool {
        self.is_admin == Some(false)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        UserSummary {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UserListing {
    #[serde(flatten)]
    pub user: User,
    pub referrer: Option<UserSummary>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UserDetails {
    #[serde(flatten)]
    pub user: User,
    pub referrer: Option<UserSummary>,
    pub referrals: Vec<Referral>,
}

/// Random uppercase alphanumeric code. Uniqueness is checked by the store.
pub fn generate_referral_code() -> String {
    let mut value = Uuid::new_v4().as_u128();
    let base = REFERRAL_CODE_ALPHABET.len() as u128;

    (0..REFERRAL_CODE_LENGTH)
        .map(|_| {
            let c = REFERRAL_CODE_ALPHABET[(value % base) as usize];
            value /= base;
            c as char
        })
        .collect()
}
