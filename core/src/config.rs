use crate::{
    aggregation::{ScoringPolicy, WeightTable},
    error::{TrustError, TrustResult},
    model::{RiskLevel, SubjectKind},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const WEIGHT_SUM_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub scoring: ScoringPolicy,
    /// How long a trigger waits for the subject's recalculation lock before ENGINE_BUSY.
    pub lock_timeout_ms: u64,
    /// Shared deadline for one round of sub-score provider queries.
    pub provider_timeout_ms: u64,
    /// `can_transact` denies subjects at these levels even without a blacklist entry.
    pub blocked_risk_levels: Vec<RiskLevel>,
    /// Kind assumed when a subject is first scored without an explicit kind.
    pub default_subject_kind: SubjectKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scoring:              ScoringPolicy::default(),
            lock_timeout_ms:      2_000,
            provider_timeout_ms:  1_500,
            blocked_risk_levels:  vec![RiskLevel::Critical],
            default_subject_kind: SubjectKind::Buyer,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing keys are an error: weights are policy
    /// and must be stated explicitly.
    /// In tests, use EngineConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with short waits so contention tests finish quickly.
    pub fn default_test() -> Self {
        Self {
            lock_timeout_ms:     200,
            provider_timeout_ms: 100,
            ..Self::default()
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn validate(&self) -> TrustResult<()> {
        let scoring = &self.scoring;
        if !scoring.bands.is_ordered() {
            return Err(TrustError::InvalidConfig(format!(
                "risk bands must satisfy 0 < high < medium < low <= 100, got {:?}",
                scoring.bands
            )));
        }
        if !(0.0..=100.0).contains(&scoring.neutral_score) {
            return Err(TrustError::InvalidConfig(format!(
                "neutral score {} outside [0, 100]",
                scoring.neutral_score
            )));
        }
        validate_weights("buyer", &scoring.buyer_weights)?;
        validate_weights("counterparty", &scoring.counterparty_weights)?;
        if self.lock_timeout_ms == 0 || self.provider_timeout_ms == 0 {
            return Err(TrustError::InvalidConfig("timeouts must be positive".into()));
        }
        Ok(())
    }
}

fn validate_weights(kind: &str, weights: &WeightTable) -> TrustResult<()> {
    if weights.is_empty() {
        return Err(TrustError::InvalidConfig(format!("{kind} weight table is empty")));
    }
    if let Some((d, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(TrustError::InvalidConfig(format!(
            "{kind} weight for {} is {w}",
            d.as_str()
        )));
    }
    let sum: f64 = weights.values().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(TrustError::InvalidConfig(format!(
            "{kind} weights sum to {sum:.4}, expected 1.0"
        )));
    }
    Ok(())
}
