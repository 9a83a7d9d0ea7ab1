//! Integration tests: flag lifecycle and the recalculations it cascades.

mod common;

use common::{contention_config, harness, harness_with};
use std::thread;
use trustdesk_core::{
    aggregation::Dimension,
    engine::Recalculation,
    event::TrustEvent,
    flag::{FlagOutcome, FlagStatus, Severity},
    model::{RiskLevel, TriggerReason},
};

/// Raising a flag cascades a FLAG_RAISED pass that sees the open flag.
#[test]
fn raising_a_flag_lowers_behavioral_score() {
    let h = harness();
    h.kyb.set("b-1", 90.0);
    h.payment.set("b-1", 80.0);
    let before = h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    assert_eq!(before.overall_score, 68);
    assert_eq!(before.risk_level, RiskLevel::Medium);

    let raised = h
        .engine
        .raise_flag("b-1", Severity::Critical, "chargeback", "three chargebacks in a day", "detector")
        .unwrap();
    assert_eq!(raised.value.status, FlagStatus::Active);

    let record = raised.recalculation.record().unwrap();
    assert_eq!(record.sub_scores.get(&Dimension::Behavioral), Some(&10.0));
    assert_eq!(record.overall_score, 58);
    assert_eq!(record.risk_level, RiskLevel::High);
    assert_eq!(record.risk_category.as_deref(), Some("behavioral_risk"));
    assert_eq!(record.last_flag_at, Some(raised.value.raised_at));

    let admin = h.sink.admin_events();
    assert!(matches!(admin[0], TrustEvent::FlagRaised { severity: Severity::Critical, .. }));
}

/// FALSE_POSITIVE drops the flag's contribution and restores the pre-flag score.
#[test]
fn false_positive_restores_pre_flag_score() {
    let h = harness();
    h.kyb.set("b-1", 90.0);
    h.payment.set("b-1", 80.0);
    h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();

    let flag = h
        .engine
        .raise_flag("b-1", Severity::Critical, "velocity", "order burst", "detector")
        .unwrap()
        .value;
    let resolved = h
        .engine
        .resolve_flag(&flag.id, FlagOutcome::FalsePositive, "rev-1", Some("legit bulk buyer"))
        .unwrap();

    assert_eq!(resolved.value.status, FlagStatus::FalsePositive);
    assert_eq!(resolved.value.review_notes.as_deref(), Some("legit bulk buyer"));
    let record = resolved.recalculation.record().unwrap();
    assert_eq!(record.overall_score, 68);
    assert_eq!(record.risk_level, RiskLevel::Medium);

    let reasons: Vec<TriggerReason> = h
        .engine
        .score_history("b-1")
        .unwrap()
        .iter()
        .map(|e| e.trigger_reason)
        .collect();
    assert_eq!(
        reasons,
        vec![TriggerReason::Manual, TriggerReason::FlagRaised, TriggerReason::FlagResolved]
    );
}

/// The resolution pass reads providers afresh rather than reusing pre-flag values.
#[test]
fn resolution_reflects_current_provider_output() {
    let h = harness();
    h.kyb.set("b-1", 90.0);
    h.payment.set("b-1", 80.0);
    h.engine.recalculate("b-1", TriggerReason::Manual).unwrap();
    let flag = h
        .engine
        .raise_flag("b-1", Severity::High, "kyb_mismatch", "document mismatch", "detector")
        .unwrap()
        .value;

    // The KYB vendor downgraded the subject while the flag was open.
    h.kyb.set("b-1", 70.0);
    let resolved = h
        .engine
        .resolve_flag(&flag.id, FlagOutcome::FalsePositive, "rev-1", None)
        .unwrap();
    let record = resolved.recalculation.record().unwrap();
    assert_eq!(record.sub_scores.get(&Dimension::Kyb), Some(&70.0));
    assert_eq!(record.overall_score, 63);
}

/// ACTIVE → UNDER_REVIEW → RESOLVED, with illegal moves rejected and no extra passes.
#[test]
fn flag_state_machine_is_enforced() {
    let h = harness();
    let flag = h
        .engine
        .raise_flag("b-1", Severity::Low, "address", "PO box", "detector")
        .unwrap()
        .value;

    let reviewing = h.engine.begin_review(&flag.id, "rev-1").unwrap();
    assert_eq!(reviewing.status, FlagStatus::UnderReview);
    let err = h.engine.begin_review(&flag.id, "rev-2").unwrap_err();
    assert_eq!(err.code(), "INVALID_FLAG_TRANSITION");

    h.engine
        .resolve_flag(&flag.id, FlagOutcome::Resolved, "rev-1", Some("confirmed"))
        .unwrap();
    let history_before = h.engine.score_history("b-1").unwrap().len();

    let err = h
        .engine
        .resolve_flag(&flag.id, FlagOutcome::FalsePositive, "rev-2", None)
        .unwrap_err();
    assert_eq!(err.code(), "FLAG_ALREADY_RESOLVED");
    assert!(!err.is_retryable());
    let err = h.engine.begin_review(&flag.id, "rev-2").unwrap_err();
    assert_eq!(err.code(), "FLAG_ALREADY_RESOLVED");

    assert_eq!(h.engine.score_history("b-1").unwrap().len(), history_before);
    assert_eq!(h.engine.get_flag(&flag.id).unwrap().status, FlagStatus::Resolved);
}

#[test]
fn unknown_flag_is_not_found() {
    let h = harness();
    let err = h
        .engine
        .resolve_flag("missing", FlagOutcome::Resolved, "rev-1", None)
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
    assert_eq!(h.engine.get_flag("missing").unwrap_err().code(), "NOT_FOUND");
}

/// Resolution is recorded even when the subject is busy; the pass runs later.
#[test]
fn busy_subject_defers_recalculation_but_keeps_resolution() {
    let h = harness_with(contention_config());
    let flag = h
        .engine
        .raise_flag("b-1", Severity::Medium, "velocity", "order burst", "detector")
        .unwrap()
        .value;

    h.gate.arm();
    let engine = h.engine.clone();
    let holder = thread::spawn(move || engine.recalculate("b-1", TriggerReason::Manual));
    h.gate.wait_entered();

    let resolved = h
        .engine
        .resolve_flag(&flag.id, FlagOutcome::Resolved, "rev-1", None)
        .unwrap();
    assert_eq!(resolved.value.status, FlagStatus::Resolved);
    let Recalculation::Deferred { trigger_id, code } = resolved.recalculation else {
        panic!("expected a deferred recalculation, got {:?}", resolved.recalculation);
    };
    assert_eq!(code, "ENGINE_BUSY");
    assert_eq!(h.engine.get_flag(&flag.id).unwrap().status, FlagStatus::Resolved);

    let pending = h.engine.pending_triggers().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, trigger_id);
    assert_eq!(pending[0].reason, TriggerReason::FlagResolved);

    h.gate.open();
    holder.join().unwrap().unwrap();

    let report = h.engine.process_pending_triggers().unwrap();
    assert_eq!(report.processed, 1);
    assert!(h.engine.pending_triggers().unwrap().is_empty());
    assert_eq!(
        h.store
            .read(|db| db.history_count_for_reason("b-1", TriggerReason::FlagResolved))
            .unwrap(),
        1
    );
}

/// Listings keep closed flags; the summary counts open ones.
#[test]
fn listing_and_counting_flags() {
    let h = harness();
    let first = h
        .engine
        .raise_flag("b-1", Severity::Low, "address", "PO box", "detector")
        .unwrap()
        .value;
    h.clock.advance(chrono::Duration::minutes(5));
    let second = h
        .engine
        .raise_flag("b-1", Severity::High, "chargeback", "chargeback", "detector")
        .unwrap()
        .value;
    h.engine
        .resolve_flag(&first.id, FlagOutcome::FalsePositive, "rev-1", None)
        .unwrap();

    let flags = h.engine.list_flags("b-1").unwrap();
    assert_eq!(flags.len(), 2);
    assert_eq!(flags[0].id, first.id);
    assert_eq!(flags[0].status, FlagStatus::FalsePositive);
    assert_eq!(flags[1].id, second.id);
    assert_eq!(h.engine.get_summary("b-1").unwrap().active_flag_count, 1);
}
