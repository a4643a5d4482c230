#![forbid(unsafe_code)]
//! Engine configuration.
//!
//! The deployment mode only sets the default for auto-execution; an explicit
//! `auto_execute_enabled` always wins.

use crate::error::DispatchError;
use crate::handlers::HandlerRegistry;
use ao_core::{ProposalType, RiskLevel};
use std::time::Duration;

pub const ENV_DEPLOYMENT_MODE: &str = "AO_DEPLOYMENT_MODE";
pub const ENV_AUTO_EXECUTE: &str = "AO_AUTO_EXECUTE";
pub const ENV_AUTO_EXECUTE_MAX_RISK: &str = "AO_AUTO_EXECUTE_MAX_RISK";
pub const ENV_AUTO_EXECUTE_TYPES: &str = "AO_AUTO_EXECUTE_TYPES";
pub const ENV_MAX_ATTEMPTS: &str = "AO_MAX_ATTEMPTS";
pub const ENV_WRITE_TIMEOUT_MS: &str = "AO_WRITE_TIMEOUT_MS";
pub const ENV_SETTLE_TIMEOUT_MS: &str = "AO_SETTLE_TIMEOUT_MS";

pub const DEFAULT_MAX_ATTEMPTS: i64 = 3;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeploymentMode {
    #[default]
    Standard,
    Locked,
}

impl DeploymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMode::Standard => "standard",
            DeploymentMode::Locked => "locked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" | "default" => Some(Self::Standard),
            "locked" | "locked_down" | "locked-down" => Some(Self::Locked),
            _ => None,
        }
    }

    pub fn auto_execute_default(self) -> bool {
        matches!(self, DeploymentMode::Standard)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchConfig {
    pub deployment_mode: DeploymentMode,
    /// `None` defers to the deployment mode.
    pub auto_execute_enabled: Option<bool>,
    pub auto_execute_max_risk: RiskLevel,
    pub auto_execute_types: Vec<ProposalType>,
    pub max_attempts: i64,
    pub write_timeout: Duration,
    /// How long to wait for a timed-out write to drain before reading back
    /// what it did. Past this the job is left `running` as outcome-unknown.
    pub settle_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            deployment_mode: DeploymentMode::Standard,
            auto_execute_enabled: None,
            auto_execute_max_risk: RiskLevel::Low,
            auto_execute_types: vec![ProposalType::ReprioritizeTask],
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            settle_timeout: Duration::from_millis(DEFAULT_SETTLE_TIMEOUT_MS),
        }
    }
}

impl DispatchConfig {
    pub fn auto_execute_enabled(&self) -> bool {
        self.auto_execute_enabled
            .unwrap_or_else(|| self.deployment_mode.auto_execute_default())
    }

    pub fn from_env() -> Result<Self, DispatchError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DispatchError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = get(ENV_DEPLOYMENT_MODE) {
            config.deployment_mode = DeploymentMode::parse(&raw)
                .ok_or_else(|| invalid(ENV_DEPLOYMENT_MODE, &raw, "expected standard|locked"))?;
        }
        if let Some(raw) = get(ENV_AUTO_EXECUTE) {
            config.auto_execute_enabled = Some(
                parse_bool(&raw)
                    .ok_or_else(|| invalid(ENV_AUTO_EXECUTE, &raw, "expected a boolean"))?,
            );
        }
        if let Some(raw) = get(ENV_AUTO_EXECUTE_MAX_RISK) {
            config.auto_execute_max_risk = RiskLevel::parse(&raw).ok_or_else(|| {
                invalid(
                    ENV_AUTO_EXECUTE_MAX_RISK,
                    &raw,
                    "expected low|medium|high|critical",
                )
            })?;
        }
        if let Some(raw) = get(ENV_AUTO_EXECUTE_TYPES) {
            let mut types = Vec::new();
            for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let kind = ProposalType::parse(token).map_err(|err| {
                    invalid(ENV_AUTO_EXECUTE_TYPES, token, &err.message)
                })?;
                if !types.contains(&kind) {
                    types.push(kind);
                }
            }
            config.auto_execute_types = types;
        }
        if let Some(raw) = get(ENV_MAX_ATTEMPTS) {
            config.max_attempts = raw
                .parse::<i64>()
                .map_err(|_| invalid(ENV_MAX_ATTEMPTS, &raw, "expected an integer"))?;
        }
        if let Some(raw) = get(ENV_WRITE_TIMEOUT_MS) {
            let ms = raw
                .parse::<u64>()
                .map_err(|_| invalid(ENV_WRITE_TIMEOUT_MS, &raw, "expected milliseconds"))?;
            config.write_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = get(ENV_SETTLE_TIMEOUT_MS) {
            let ms = raw
                .parse::<u64>()
                .map_err(|_| invalid(ENV_SETTLE_TIMEOUT_MS, &raw, "expected milliseconds"))?;
            config.settle_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// The allowlist must name only types the registry can execute.
    pub fn validate(&self, registry: &HandlerRegistry) -> Result<(), DispatchError> {
        if self.max_attempts < 1 {
            return Err(DispatchError::InvalidConfig(format!(
                "max_attempts must be at least 1 (got {})",
                self.max_attempts
            )));
        }
        if self.write_timeout.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "write_timeout must be positive".to_string(),
            ));
        }
        if self.settle_timeout.is_zero() {
            return Err(DispatchError::InvalidConfig(
                "settle_timeout must be positive".to_string(),
            ));
        }
        for kind in &self.auto_execute_types {
            if !registry.supports(kind) {
                return Err(DispatchError::InvalidConfig(format!(
                    "auto-execute type {kind} has no execution handler"
                )));
            }
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(key: &str, value: &str, expected: &str) -> DispatchError {
    DispatchError::InvalidConfig(format!("{key}={value:?}: {expected}"))
}
