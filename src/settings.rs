use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Referrals {
    #[serde(default = "default_bonus_amount")]
    pub bonus_amount_in_cents: i64,
    #[serde(default = "default_min_withdrawal")]
    pub min_withdrawal_in_cents: i64,
    pub register_url: String,
}

/// Admin account created or promoted at startup.
#[derive(Clone, Debug, Deserialize)]
pub struct Admin {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub referrals: Referrals,
    pub admin: Option<Admin>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_bonus_amount() -> i64 {
    10_00
}

fn default_min_withdrawal() -> i64 {
    50_00
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("REFERRAL_LEDGER").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.referrals.validate()?;

        Ok(settings)
    }
}

impl Referrals {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bonus_amount_in_cents < 0 {
            return Err(ConfigError::Message(
                "referrals.bonus_amount_in_cents must not be negative".to_string(),
            ));
        }
        if self.min_withdrawal_in_cents <= 0 {
            return Err(ConfigError::Message(
                "referrals.min_withdrawal_in_cents must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
