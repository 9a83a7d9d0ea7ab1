//! Integration tests: recalculation passes, audit trail and degraded providers.

mod common;

use common::{harness, t0};
use std::{sync::Arc, time::Duration};
use trustdesk_core::{
    aggregation::Dimension,
    config::EngineConfig,
    engine::{Recalculation, TrustEngine},
    event::TrustEvent,
    model::{RiskLevel, SubjectKind, TransactionOutcome, TriggerReason},
    providers::StaticProvider,
    store::TrustStore,
};

/// Equal weights over {kyb 90, transaction 40, payment 60, behavioral 70} give 65 / MEDIUM.
#[test]
fn weighted_scenario_scores_65_medium() {
    let h = harness();
    h.kyb.set("b-1", 90.0);
    h.transaction.set("b-1", 40.0);
    h.payment.set("b-1", 60.0);
    h.behavioral.set("b-1", 70.0);

    let record = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(record.overall_score, 65);
    assert_eq!(record.risk_level, RiskLevel::Medium);
    assert_eq!(record.kind, SubjectKind::Buyer);
    assert_eq!(record.risk_category, None);
    assert_eq!(record.score_last_updated_at, Some(t0()));

    let history = h.engine.score_history("b-1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous_score, 50);
    assert_eq!(history[0].new_score, 65);
    assert_eq!(history[0].risk_level_before, RiskLevel::Medium);
    assert_eq!(history[0].trigger_reason, TriggerReason::Manual);
}

/// Two passes over unchanged inputs give the same result, and each pass is audited.
#[test]
fn recalculation_is_idempotent_and_always_audited() {
    let h = harness();
    h.kyb.set("b-1", 90.0);

    let first = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    let second = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(first.overall_score, second.overall_score);
    assert_eq!(first.risk_level, second.risk_level);
    assert_eq!(first.sub_scores, second.sub_scores);
    assert_eq!(second.version, 2);

    let history = h.engine.score_history("b-1").unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[1].changed());

    let delivered = h.sink.for_subject("b-1");
    assert_eq!(delivered.len(), 2, "one notification per pass");
    assert!(delivered
        .iter()
        .all(|e| matches!(e, TrustEvent::ScoreRecalculated { .. })));
}

/// The outbox holds the same events the sink received, in the same order.
#[test]
fn outbox_mirrors_delivered_events() {
    let h = harness();
    h.kyb.set("b-1", 85.0);
    h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    h.kyb.set("b-1", 20.0);
    h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();

    let stored: Vec<TrustEvent> = h
        .engine
        .events_for("b-1")
        .unwrap()
        .iter()
        .map(|row| row.event().unwrap())
        .collect();
    assert_eq!(stored, h.sink.for_subject("b-1"));
}

/// When every provider fails the pass keeps the last known sub-scores.
#[test]
fn total_provider_failure_keeps_last_known_values() {
    common::init_logging();
    let store = Arc::new(TrustStore::in_memory().unwrap());
    store.migrate().unwrap();
    let kyb = Arc::new(StaticProvider::new("kyb", Dimension::Kyb));
    let payment = Arc::new(StaticProvider::new("payment", Dimension::Payment));
    let engine = TrustEngine::new(store, EngineConfig::default_test())
        .unwrap()
        .with_provider(kyb.clone())
        .with_provider(payment.clone());

    kyb.set("b-1", 90.0);
    payment.set("b-1", 90.0);
    let before = engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(before.overall_score, 70);

    kyb.set_failing(true);
    payment.set_failing(true);
    let after = engine.recalculate("b-1", TriggerReason::Transaction).unwrap();
    assert_eq!(after.overall_score, 70);
    assert_eq!(after.risk_level, before.risk_level);
    assert_eq!(after.sub_scores, before.sub_scores);

    let history = engine.score_history("b-1").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].previous_score, 70);
    assert_eq!(history[1].new_score, 70);

    // Never scored: neutral default.
    let fresh = engine.recalculate("b-2", TriggerReason::Manual).unwrap();
    assert_eq!(fresh.overall_score, 50);
    assert_eq!(fresh.risk_level, RiskLevel::Medium);
}

/// A provider slower than the deadline counts as missing.
#[test]
fn slow_provider_is_treated_as_missing() {
    let h = harness();
    h.kyb.set("b-1", 90.0);
    h.kyb.set_delay(Some(Duration::from_millis(400)));

    let record = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(record.sub_scores.get(&Dimension::Kyb), Some(&50.0));
    assert_eq!(record.overall_score, 50);
    assert_eq!(record.risk_level, RiskLevel::Medium);
}

/// A failed commit leaves the live record, history, outbox and sink untouched.
#[test]
fn persistence_failure_rolls_back_the_whole_pass() {
    let h = harness();
    h.kyb.set("b-1", 90.0);
    let committed = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(committed.overall_score, 60);

    h.kyb.set("b-1", 10.0);
    h.store
        .execute_batch(
            "CREATE TRIGGER fail_history_insert BEFORE INSERT ON score_history
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .unwrap();

    let err = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap_err();
    assert_eq!(err.code(), "PERSISTENCE_FAILURE");
    assert!(err.is_retryable());

    let live = h.engine.trust_record("b-1").unwrap().unwrap();
    assert_eq!(live, committed);
    assert_eq!(h.store.read(|db| db.history_count("b-1")).unwrap(), 1);
    assert_eq!(h.engine.events_for("b-1").unwrap().len(), 1);
    assert_eq!(h.sink.for_subject("b-1").len(), 1);

    h.store.execute_batch("DROP TRIGGER fail_history_insert;").unwrap();
    let retried = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(retried.overall_score, 40);
    assert_eq!(retried.risk_level, RiskLevel::High);
    assert_eq!(retried.version, 2);
}

/// History rows cannot be rewritten or removed.
#[test]
fn score_history_is_append_only() {
    let h = harness();
    h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();

    assert!(h.store.execute_batch("UPDATE score_history SET new_score = 0;").is_err());
    assert!(h.store.execute_batch("DELETE FROM score_history;").is_err());
    assert_eq!(h.store.read(|db| db.history_count("b-1")).unwrap(), 1);
}

/// Entering CRITICAL raises one admin alert; staying there raises none.
#[test]
fn critical_transition_alerts_admins_once() {
    let h = harness();
    h.kyb.set("b-1", 0.0);
    h.payment.set("b-1", 0.0);

    let record = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(record.overall_score, 25);
    assert_eq!(record.risk_level, RiskLevel::Critical);
    assert_eq!(record.risk_category.as_deref(), Some("kyb_risk"));

    h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    let alerts = h.sink.admin_events();
    assert_eq!(alerts.len(), 1);
    assert!(matches!(alerts[0], TrustEvent::CriticalRiskAlert { new_score: 25, .. }));
}

/// Counterparties use their own weight table, and a subject's kind is fixed.
#[test]
fn counterparty_weights_and_fixed_kind() {
    let h = harness();
    h.kyb.set("c-1", 90.0);
    h.compliance.set("c-1", 70.0);
    h.payment.set("c-1", 60.0);

    let record = h
        .engine
        .recalculate_as("c-1", SubjectKind::Counterparty, TriggerReason::Manual)
        .unwrap();
    assert_eq!(record.kind, SubjectKind::Counterparty);
    assert_eq!(record.overall_score, 66);
    assert_eq!(record.sub_scores.len(), 5);

    let err = h
        .engine
        .recalculate_as("c-1", SubjectKind::Buyer, TriggerReason::Manual)
        .unwrap_err();
    assert_eq!(err.code(), "SUBJECT_KIND_MISMATCH");
    assert!(!err.is_retryable());

    let again = h.engine.recalculate("c-1", TriggerReason::Manual).unwrap();
    assert_eq!(again.kind, SubjectKind::Counterparty);
}

/// Each recorded transaction cascades one TRANSACTION pass over the outcome history.
#[test]
fn transactions_feed_the_transaction_dimension() {
    let h = harness();
    for _ in 0..3 {
        let outcome = h
            .engine
            .record_transaction("b-1", TransactionOutcome::Completed)
            .unwrap();
        assert!(matches!(outcome, Recalculation::Completed(_)));
    }

    let record = h.engine.trust_record("b-1").unwrap().unwrap();
    assert_eq!(record.sub_scores.get(&Dimension::Transaction), Some(&80.0));
    assert_eq!(record.overall_score, 58);
    assert_eq!(record.risk_level, RiskLevel::High);
    assert_eq!(record.risk_category.as_deref(), Some("kyb_risk"));
    assert_eq!(record.last_transaction_at, Some(t0()));
    assert_eq!(
        h.store
            .read(|db| db.history_count_for_reason("b-1", TriggerReason::Transaction))
            .unwrap(),
        3
    );
    assert!(h.engine.pending_triggers().unwrap().is_empty());
}

/// Disputes pull the transaction dimension down; refunds count half.
#[test]
fn disputes_and_refunds_weigh_on_transactions() {
    let h = harness();
    h.engine.record_transaction("b-1", TransactionOutcome::Completed).unwrap();
    h.engine.record_transaction("b-1", TransactionOutcome::Disputed).unwrap();
    let record = h.engine.trust_record("b-1").unwrap().unwrap();
    assert_eq!(record.sub_scores.get(&Dimension::Transaction), Some(&50.0));

    h.engine.record_transaction("b-1", TransactionOutcome::Refunded).unwrap();
    let outcome = h
        .engine
        .record_transaction("b-1", TransactionOutcome::Disputed)
        .unwrap();
    // clean = 1 + 0.5 over 4 outcomes
    let record = outcome.record().unwrap();
    let value = record.sub_scores[&Dimension::Transaction];
    assert!((value - 100.0 * 2.5 / 6.0).abs() < 1e-9, "got {value}");
}
