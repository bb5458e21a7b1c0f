use crate::{
    ledger::DEFAULT_BUDGET_LIMIT,
    period::{PeriodError, Scheme},
};
use chrono::{FixedOffset, Local};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

pub const API_URL_VAR: &str = "QUINCENA_SHEET_API";
pub const BUDGET_LIMIT_VAR: &str = "QUINCENA_BUDGET_LIMIT";
pub const SCHEME_VAR: &str = "QUINCENA_SCHEME";
pub const UTC_OFFSET_VAR: &str = "QUINCENA_UTC_OFFSET";

/// Runtime settings, all optional
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Remote ledger endpoint. `None` means local-only mode.
    pub api_url: Option<String>,
    pub budget_limit: Decimal,
    pub scheme: Scheme,
    /// Offset of the user's calendar from UTC. Periods and weeks are decided by the
    /// user's local day, not the UTC one.
    pub utc_offset: FixedOffset,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("QUINCENA_BUDGET_LIMIT must be a non-negative number, got '{0}'")]
    BudgetLimit(String),
    #[error("QUINCENA_SCHEME is invalid: {0}")]
    Scheme(#[from] PeriodError),
    #[error("QUINCENA_UTC_OFFSET must look like -05:00, got '{0}'")]
    UtcOffset(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: None,
            budget_limit: DEFAULT_BUDGET_LIMIT,
            scheme: Scheme::default(),
            utc_offset: *Local::now().offset(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let budget_limit = match get(BUDGET_LIMIT_VAR) {
            Some(limit) => Decimal::from_str(&limit)
                .ok()
                .filter(|l| !l.is_sign_negative())
                .ok_or(ConfigError::BudgetLimit(limit))?,
            None => DEFAULT_BUDGET_LIMIT,
        };

        let scheme = match get(SCHEME_VAR) {
            Some(scheme) => scheme.parse::<Scheme>()?,
            None => Scheme::default(),
        };

        let utc_offset = match get(UTC_OFFSET_VAR) {
            Some(offset) => offset
                .parse::<FixedOffset>()
                .map_err(|_| ConfigError::UtcOffset(offset))?,
            None => *Local::now().offset(),
        };

        Ok(Config {
            api_url: get(API_URL_VAR),
            budget_limit,
            scheme,
            utc_offset,
        })
    }
}
