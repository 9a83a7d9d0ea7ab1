//! Aggregation engine: weighted combination of sub-scores into a score and risk level.
//!
//! RULES:
//!   - Pure: no I/O, no clock, no randomness. Same inputs, same output.
//!   - A dimension with no observed value contributes the neutral score.
//!     Weights are never renormalised over the observed subset.
//!   - Weights and bands come from the `ScoringPolicy`; nothing here is tuned policy.

use crate::model::{RiskLevel, SubjectKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named risk dimension. Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Kyb,
    Compliance,
    Transaction,
    Payment,
    Behavioral,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Self::Kyb,
        Self::Compliance,
        Self::Transaction,
        Self::Payment,
        Self::Behavioral,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kyb         => "kyb",
            Self::Compliance  => "compliance",
            Self::Transaction => "transaction",
            Self::Payment     => "payment",
            Self::Behavioral  => "behavioral",
        }
    }

    /// Classification tag used for `risk_category`.
    pub fn category(self) -> String {
        format!("{}_risk", self.as_str())
    }
}

/// Named sub-score values in [0, 100].
pub type SubScores = BTreeMap<Dimension, f64>;

/// Dimension → weight. Weights of one table sum to 1.0.
pub type WeightTable = BTreeMap<Dimension, f64>;

/// Lower bounds (inclusive) of each band. Anything below `high_min` is critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RiskBands {
    pub low_min:    u8,
    pub medium_min: u8,
    pub high_min:   u8,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self { low_min: 80, medium_min: 60, high_min: 40 }
    }
}

impl RiskBands {
    pub fn level_for(&self, score: u8) -> RiskLevel {
        if score >= self.low_min {
            RiskLevel::Low
        } else if score >= self.medium_min {
            RiskLevel::Medium
        } else if score >= self.high_min {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }

    pub fn is_ordered(&self) -> bool {
        0 < self.high_min && self.high_min < self.medium_min && self.medium_min < self.low_min
            && self.low_min <= 100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringPolicy {
    pub buyer_weights:        WeightTable,
    pub counterparty_weights: WeightTable,
    pub bands:                RiskBands,
    /// Value substituted for any dimension without an observation.
    pub neutral_score:        f64,
    /// Level reported for a subject with no observed dimension at all.
    pub neutral_level:        RiskLevel,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            buyer_weights: [
                (Dimension::Kyb, 0.25),
                (Dimension::Transaction, 0.25),
                (Dimension::Payment, 0.25),
                (Dimension::Behavioral, 0.25),
            ]
            .into(),
            counterparty_weights: [
                (Dimension::Kyb, 0.25),
                (Dimension::Compliance, 0.20),
                (Dimension::Transaction, 0.20),
                (Dimension::Payment, 0.20),
                (Dimension::Behavioral, 0.15),
            ]
            .into(),
            bands:         RiskBands::default(),
            neutral_score: 50.0,
            neutral_level: RiskLevel::Medium,
        }
    }
}

impl ScoringPolicy {
    pub fn weights_for(&self, kind: SubjectKind) -> &WeightTable {
        match kind {
            SubjectKind::Buyer        => &self.buyer_weights,
            SubjectKind::Counterparty => &self.counterparty_weights,
        }
    }

    pub fn neutral_overall(&self) -> u8 {
        to_score(self.neutral_score)
    }
}

/// Result of one aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub overall_score: u8,
    pub risk_level:    RiskLevel,
    pub risk_category: Option<String>,
    /// Every weighted dimension, with neutral fill applied.
    pub effective:     SubScores,
    /// Number of weighted dimensions that had an observation.
    pub observed:      usize,
}

/// Combine `observed` sub-scores for a subject of `kind` under `policy`.
pub fn aggregate(kind: SubjectKind, observed: &SubScores, policy: &ScoringPolicy) -> Aggregate {
    let weights = policy.weights_for(kind);
    let mut effective = SubScores::new();
    let mut seen = 0usize;
    let mut total = 0.0f64;

    for (&dimension, &weight) in weights {
        let value = match observed.get(&dimension) {
            Some(v) if v.is_finite() => {
                seen += 1;
                v.clamp(0.0, 100.0)
            }
            _ => policy.neutral_score,
        };
        total += weight * value;
        effective.insert(dimension, value);
    }

    let overall_score = to_score(total);
    let risk_level = if seen == 0 {
        policy.neutral_level
    } else {
        policy.bands.level_for(overall_score)
    };

    let risk_category = match risk_level {
        RiskLevel::High | RiskLevel::Critical => weakest_dimension(weights, &effective),
        _ => None,
    }
    .map(Dimension::category);

    Aggregate { overall_score, risk_level, risk_category, effective, observed: seen }
}

/// Lowest effective value among positively weighted dimensions; first in order wins ties.
fn weakest_dimension(weights: &WeightTable, effective: &SubScores) -> Option<Dimension> {
    let mut weakest: Option<(Dimension, f64)> = None;
    for (&dimension, &weight) in weights {
        if weight <= 0.0 {
            continue;
        }
        let value = effective.get(&dimension).copied().unwrap_or(f64::MAX);
        match weakest {
            Some((_, current)) if value >= current => {}
            _ => weakest = Some((dimension, value)),
        }
    }
    weakest.map(|(d, _)| d)
}

fn to_score(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}
