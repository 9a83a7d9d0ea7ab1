//! Integration tests: scoring policy as seen through the public aggregation API and the engine.

mod common;

use common::{harness, harness_with};
use trustdesk_core::{
    aggregation::{aggregate, Dimension, RiskBands, ScoringPolicy, SubScores},
    config::EngineConfig,
    engine::Recalculation,
    model::{RiskLevel, SubjectKind, TransactionOutcome, TriggerReason},
};

/// A partial profile is never scored as if the missing dimensions were absent.
#[test]
fn missing_dimensions_do_not_renormalize() {
    let policy = ScoringPolicy::default();
    let observed: SubScores = [(Dimension::Kyb, 100.0), (Dimension::Payment, 100.0)].into();
    let result = aggregate(SubjectKind::Buyer, &observed, &policy);
    // Renormalizing over the observed pair would give 100.
    assert_eq!(result.overall_score, 75);
    assert_eq!(result.risk_level, RiskLevel::Medium);
    assert_eq!(result.effective.get(&Dimension::Transaction), Some(&50.0));
}

/// Bands come from configuration, not from code.
#[test]
fn engine_uses_configured_bands() {
    let mut config = EngineConfig::default_test();
    config.scoring.bands = RiskBands { low_min: 90, medium_min: 70, high_min: 50 };
    let h = harness_with(config);
    h.kyb.set("b-1", 90.0);
    h.transaction.set("b-1", 40.0);
    h.payment.set("b-1", 60.0);
    h.behavioral.set("b-1", 70.0);

    let record = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(record.overall_score, 65);
    assert_eq!(record.risk_level, RiskLevel::High);
    assert_eq!(record.risk_category.as_deref(), Some("transaction_risk"));
}

/// Weights come from configuration too.
#[test]
fn engine_uses_configured_weights() {
    let mut config = EngineConfig::default_test();
    config.scoring.buyer_weights = [(Dimension::Kyb, 0.7), (Dimension::Payment, 0.3)].into();
    let h = harness_with(config);
    h.kyb.set("b-1", 100.0);
    h.payment.set("b-1", 0.0);

    let record = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(record.overall_score, 70);
    assert_eq!(record.sub_scores.len(), 2);
}

#[test]
fn out_of_range_provider_values_count_as_missing() {
    let h = harness_with(EngineConfig::default_test());
    h.kyb.set("b-1", 150.0);
    h.payment.set("b-1", f64::NAN);
    let record = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(record.overall_score, 50);
    assert_eq!(record.risk_level, RiskLevel::Medium);
}

/// The first observation ends the "never seen" neutral read. With default bands a
/// single clean sale lifts the score to 54 yet lands the buyer in HIGH, because
/// the unobserved dimensions fill at 50 and the MEDIUM floor is 60.
#[test]
fn first_clean_transaction_moves_a_new_buyer_to_high() {
    let h = harness();
    let before = h.engine.get_summary("b-1").unwrap();
    assert_eq!((before.overall_score, before.risk_level), (50, RiskLevel::Medium));

    let outcome = h.engine.record_transaction("b-1", TransactionOutcome::Completed).unwrap();
    let Recalculation::Completed(record) = outcome else {
        panic!("expected a completed pass, got {outcome:?}");
    };
    let transaction = record.sub_scores[&Dimension::Transaction];
    assert!((transaction - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(record.overall_score, 54);
    assert_eq!(record.risk_level, RiskLevel::High);
    assert_eq!(record.risk_category.as_deref(), Some("kyb_risk"));
}
