use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::ledger::chain::DEFAULT_DIFFICULTY;
use crate::ledger::MiningBudget;

/// Above this difficulty a single append takes noticeable CPU time
pub const EXPENSIVE_DIFFICULTY: usize = 5;

/// Errors that can occur while reading configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("LEDGER_DIFFICULTY must be at least 1")]
    ZeroDifficulty,
}

/// Process configuration, read from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub difficulty: usize,

    /// Deadline for each append's proof-of-work search, unbounded if unset
    pub mining_timeout: Option<Duration>,
}

impl AppConfig {
    /// Loads `LEDGER_HOST`, `LEDGER_PORT`, `LEDGER_DIFFICULTY` and
    /// `LEDGER_MINING_TIMEOUT_MS`
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("LEDGER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = parse_or("LEDGER_PORT", lookup("LEDGER_PORT"), 8080)?;

        let difficulty = parse_or("LEDGER_DIFFICULTY", lookup("LEDGER_DIFFICULTY"), DEFAULT_DIFFICULTY)?;
        if difficulty == 0 {
            return Err(ConfigError::ZeroDifficulty);
        }

        let mining_timeout = match lookup("LEDGER_MINING_TIMEOUT_MS") {
            Some(raw) => Some(Duration::from_millis(parse("LEDGER_MINING_TIMEOUT_MS", raw)?)),
            None => None,
        };

        Ok(AppConfig {
            host,
            port,
            difficulty,
            mining_timeout,
        })
    }

    /// Budget applied to every append made by the HTTP layer
    pub fn mining_budget(&self) -> MiningBudget {
        match self.mining_timeout {
            Some(timeout) => MiningBudget::unbounded().with_timeout(timeout),
            None => MiningBudget::unbounded(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => parse(name, raw),
        None => Ok(default),
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, raw: String) -> Result<T, ConfigError> {
    let parsed = raw.trim().parse();
    parsed.map_err(|_| ConfigError::InvalidValue { name, value: raw })
}
