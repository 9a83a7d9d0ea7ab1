//! The trust engine: coordinator behind every operation.
//!
//! RECALCULATION PASS (per subject, under that subject's lock):
//!   1. Load the live record, or the neutral default for a new subject.
//!   2. Query every provider once, sharing one deadline.
//!   3. Aggregate.
//!   4. Commit live record, history row, consumed trigger and outbox rows in one transaction.
//!   5. Hand the outbox events to the notification sink.
//!
//! RULES:
//!   - Only a full pass writes the live record. Nothing patches a field in place.
//!   - Every committed pass appends exactly one history row and one subject event,
//!     including passes whose score did not move.
//!   - A transition that obligates a recalculation (flag raised or resolved, appeal
//!     approved, manual lift, transaction) enqueues a pending trigger in the same commit.
//!     The engine then attempts the pass at once; if it cannot, the trigger stays
//!     queued for `process_pending_triggers`.
//!   - Events reach the sink only after their commit succeeds.

use crate::{
    aggregation::{aggregate, Aggregate},
    blacklist::{Appeal, AppealDecision, AppealStatus, BlacklistEntry, BlacklistStatus},
    clock::{Clock, SystemClock},
    config::EngineConfig,
    error::{TrustError, TrustResult},
    event::{Channel, EventLogEntry, TrustEvent},
    flag::{FlagOutcome, FlagStatus, RiskFlag, Severity},
    locks::SubjectLocks,
    model::{
        Capability, DenialReason, PendingTrigger, RiskLevel, ScoreHistoryEntry, SellerNote,
        SubjectKind, TransactionOutcome, TriggerReason, TrustRecord, TrustSummary,
    },
    notify::{LogSink, NotificationSink},
    providers::{FlagSignalProvider, ProviderSet, SubScoreProvider, TransactionHistoryProvider},
    store::{is_constraint_violation, Db, TrustStore},
    types::{new_id, Timestamp},
};
use std::sync::Arc;

type Outbox = Vec<(Channel, TrustEvent)>;

/// What happened to the recalculation a transition asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Recalculation {
    /// The pass committed; this is the new live record.
    Completed(TrustRecord),
    /// The pass could not run now. The trigger stays queued.
    Deferred { trigger_id: i64, code: &'static str },
    /// Another pass consumed the trigger first.
    Superseded { trigger_id: i64 },
    /// The transition does not affect the score.
    NotRequired,
}

impl Recalculation {
    pub fn record(&self) -> Option<&TrustRecord> {
        match self {
            Self::Completed(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// Result of a state transition plus the recalculation it cascaded into.
/// The transition itself is committed whatever the recalculation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Cascade<T> {
    pub value:         T,
    pub recalculation: Recalculation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub deferred:  usize,
    pub skipped:   usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceReport {
    pub expired: Vec<BlacklistEntry>,
    pub drained: DrainReport,
}

pub struct TrustEngine {
    store:     Arc<TrustStore>,
    config:    EngineConfig,
    providers: ProviderSet,
    sink:      Arc<dyn NotificationSink>,
    clock:     Arc<dyn Clock>,
    locks:     SubjectLocks,
}

impl TrustEngine {
    /// Bare engine: no providers, wall clock, log sink.
    pub fn new(store: Arc<TrustStore>, config: EngineConfig) -> TrustResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            providers: ProviderSet::new(),
            sink:      Arc::new(LogSink),
            clock:     Arc::new(SystemClock),
            locks:     SubjectLocks::new(),
        })
    }

    /// Engine wired with the built-in providers that read the engine's own registries.
    /// External evaluators are added with `with_provider`.
    pub fn build(store: Arc<TrustStore>, config: EngineConfig) -> TrustResult<Self> {
        let flags = FlagSignalProvider::new(Arc::clone(&store));
        let transactions = TransactionHistoryProvider::new(Arc::clone(&store));
        Ok(Self::new(store, config)?
            .with_provider(Arc::new(flags))
            .with_provider(Arc::new(transactions)))
    }

    /// In-memory migrated store, test config, built-in providers.
    pub fn build_test() -> TrustResult<Self> {
        let store = TrustStore::in_memory()?;
        store.migrate()?;
        Self::build(Arc::new(store), EngineConfig::default_test())
    }

    pub fn with_provider(mut self, provider: Arc<dyn SubScoreProvider>) -> Self {
        self.providers.register(provider);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn neutral_record(&self, subject_id: &str, kind: SubjectKind) -> TrustRecord {
        let scoring = &self.config.scoring;
        TrustRecord::neutral(subject_id, kind, scoring.neutral_overall(), scoring.neutral_level)
    }

    // ── Recalculation ──────────────────────────────────────────

    /// Full recalculation of one subject. Its kind is the stored kind, or the
    /// configured default for a subject never scored before.
    pub fn recalculate(&self, subject_id: &str, reason: TriggerReason) -> TrustResult<TrustRecord> {
        self.locks.with_lock(subject_id, self.config.lock_timeout(), || {
            self.recalculate_locked(subject_id, None, reason, None)
        })
    }

    /// As `recalculate`, fixing the subject's kind. Fails with SUBJECT_KIND_MISMATCH
    /// if the subject is already scored as the other kind.
    pub fn recalculate_as(
        &self,
        subject_id: &str,
        kind:       SubjectKind,
        reason:     TriggerReason,
    ) -> TrustResult<TrustRecord> {
        self.locks.with_lock(subject_id, self.config.lock_timeout(), || {
            self.recalculate_locked(subject_id, Some(kind), reason, None)
        })
    }

    fn recalculate_locked(
        &self,
        subject_id: &str,
        kind:       Option<SubjectKind>,
        reason:     TriggerReason,
        consumes:   Option<i64>,
    ) -> TrustResult<TrustRecord> {
        let current = self.store.read(|db| {
            if let Some(trigger_id) = consumes {
                if !db.trigger_pending(trigger_id)? {
                    return Err(TrustError::TriggerAlreadyConsumed { trigger_id });
                }
            }
            db.get_trust_record(subject_id)
        })?;

        let kind = match (&current, kind) {
            (Some(record), Some(requested)) if record.kind != requested => {
                return Err(TrustError::SubjectKindMismatch {
                    subject_id: subject_id.to_string(),
                    existing:   record.kind.as_str(),
                    requested:  requested.as_str(),
                });
            }
            (Some(record), _) => record.kind,
            (None, Some(requested)) => requested,
            (None, None) => self.config.default_subject_kind,
        };
        let scored_before = current.is_some();
        let previous = current.unwrap_or_else(|| self.neutral_record(subject_id, kind));

        // Providers may read the store, so no store lock is held while they run.
        let round = self.providers.query(subject_id, self.config.provider_timeout());
        let outcome = if round.total_failure() && scored_before {
            log::warn!(
                "subject={subject_id} all {} providers failed; keeping last known sub-scores",
                round.queried
            );
            Aggregate {
                overall_score: previous.overall_score,
                risk_level:    previous.risk_level,
                risk_category: previous.risk_category.clone(),
                effective:     previous.sub_scores.clone(),
                observed:      0,
            }
        } else {
            if round.total_failure() {
                log::warn!("subject={subject_id} all providers failed; scoring neutral");
            }
            aggregate(kind, &round.observed, &self.config.scoring)
        };

        let now = self.now();
        let (record, outbox) = self.store.write(|db| {
            if let Some(trigger_id) = consumes {
                if !db.delete_trigger(trigger_id)? {
                    return Err(TrustError::TriggerAlreadyConsumed { trigger_id });
                }
            }

            let next = TrustRecord {
                subject_id:            subject_id.to_string(),
                kind,
                overall_score:         outcome.overall_score,
                risk_level:            outcome.risk_level,
                risk_category:         outcome.risk_category.clone(),
                sub_scores:            outcome.effective.clone(),
                last_transaction_at:   db.last_transaction_at(subject_id)?,
                last_flag_at:          db.last_flag_raised_at(subject_id)?,
                score_last_updated_at: Some(now),
                version:               previous.version + 1,
            };
            db.save_trust_record(&next, previous.version)?;
            db.append_history(&ScoreHistoryEntry {
                id:                None,
                subject_id:        subject_id.to_string(),
                previous_score:    previous.overall_score,
                new_score:         next.overall_score,
                risk_level_before: previous.risk_level,
                risk_level_after:  next.risk_level,
                trigger_reason:    reason,
                sub_scores:        next.sub_scores.clone(),
                created_at:        now,
            })?;

            let mut outbox: Outbox = vec![(
                Channel::Subject,
                TrustEvent::ScoreRecalculated {
                    subject_id:        subject_id.to_string(),
                    previous_score:    previous.overall_score,
                    new_score:         next.overall_score,
                    risk_level_before: previous.risk_level,
                    risk_level_after:  next.risk_level,
                    trigger_reason:    reason,
                    at:                now,
                },
            )];
            if next.risk_level == RiskLevel::Critical && previous.risk_level != RiskLevel::Critical {
                outbox.push((
                    Channel::Admin,
                    TrustEvent::CriticalRiskAlert {
                        subject_id:     subject_id.to_string(),
                        new_score:      next.overall_score,
                        trigger_reason: reason,
                        at:             now,
                    },
                ));
            }
            write_outbox(db, &outbox, now)?;
            Ok((next, outbox))
        })?;

        log::info!(
            "subject={subject_id} recalculated reason={} score {} -> {} level {} -> {} observed={}",
            reason.as_str(),
            previous.overall_score,
            record.overall_score,
            previous.risk_level.as_str(),
            record.risk_level.as_str(),
            outcome.observed,
        );
        self.deliver(&outbox);
        Ok(record)
    }

    /// Attempt the pass a queued trigger asks for.
    fn run_trigger(&self, trigger: &PendingTrigger) -> Recalculation {
        let subject_id = trigger.subject_id.as_str();
        let result = self.locks.with_lock(subject_id, self.config.lock_timeout(), || {
            self.recalculate_locked(subject_id, None, trigger.reason, Some(trigger.id))
        });
        match result {
            Ok(record) => Recalculation::Completed(record),
            Err(TrustError::TriggerAlreadyConsumed { trigger_id }) => {
                log::debug!("subject={subject_id} trigger={trigger_id} already consumed");
                Recalculation::Superseded { trigger_id }
            }
            Err(e) => {
                if e.is_retryable() {
                    log::warn!("subject={subject_id} trigger={} deferred: {e}", trigger.id);
                } else {
                    log::error!("subject={subject_id} trigger={} failed: {e}", trigger.id);
                }
                Recalculation::Deferred { trigger_id: trigger.id, code: e.code() }
            }
        }
    }

    /// Run every queued trigger once, oldest first.
    pub fn process_pending_triggers(&self) -> TrustResult<DrainReport> {
        let pending = self.store.read(|db| db.pending_triggers())?;
        let mut report = DrainReport::default();
        for trigger in &pending {
            match self.run_trigger(trigger) {
                Recalculation::Completed(_) => report.processed += 1,
                Recalculation::Deferred { .. } => report.deferred += 1,
                Recalculation::Superseded { .. } | Recalculation::NotRequired => report.skipped += 1,
            }
        }
        if !pending.is_empty() {
            log::info!(
                "drained triggers processed={} deferred={} skipped={}",
                report.processed,
                report.deferred,
                report.skipped
            );
        }
        Ok(report)
    }

    pub fn pending_triggers(&self) -> TrustResult<Vec<PendingTrigger>> {
        self.store.read(|db| db.pending_triggers())
    }

    /// Expiry sweep followed by a drain of the trigger queue.
    pub fn run_maintenance(&self) -> TrustResult<MaintenanceReport> {
        let expired = self.expire_blacklists()?;
        let drained = self.process_pending_triggers()?;
        Ok(MaintenanceReport { expired, drained })
    }

    // ── Reads ──────────────────────────────────────────────────

    /// Summary without recalculating. An unknown subject reads as the neutral
    /// default and nothing is written.
    pub fn get_summary(&self, subject_id: &str) -> TrustResult<TrustSummary> {
        let now = self.now();
        self.store.read(|db| {
            let active_flag_count = db.open_flag_count(subject_id)?;
            let is_blacklisted = db
                .active_blacklist_entry(subject_id)?
                .is_some_and(|e| e.is_enforced_at(now));
            let summary = match db.get_trust_record(subject_id)? {
                Some(record) => TrustSummary {
                    subject_id:    subject_id.to_string(),
                    overall_score: record.overall_score,
                    risk_level:    record.risk_level,
                    last_activity: record.last_activity(),
                    risk_category: record.risk_category,
                    active_flag_count,
                    is_blacklisted,
                },
                None => {
                    let last_activity =
                        db.last_flag_raised_at(subject_id)?.max(db.last_transaction_at(subject_id)?);
                    TrustSummary {
                        subject_id:    subject_id.to_string(),
                        overall_score: self.config.scoring.neutral_overall(),
                        risk_level:    self.config.scoring.neutral_level,
                        risk_category: None,
                        active_flag_count,
                        is_blacklisted,
                        last_activity,
                    }
                }
            };
            Ok(summary)
        })
    }

    /// Whether the subject may transact now. An enforced blacklist entry always
    /// denies; otherwise the configured risk levels deny.
    pub fn can_transact(&self, subject_id: &str) -> TrustResult<Capability> {
        let now = self.now();
        let (entry, record) = self.store.read(|db| {
            Ok((db.active_blacklist_entry(subject_id)?, db.get_trust_record(subject_id)?))
        })?;
        let level = record.map_or(self.config.scoring.neutral_level, |r| r.risk_level);

        let reason = match entry {
            Some(entry) if entry.is_enforced_at(now) => {
                Some(DenialReason::Blacklisted { entry_id: entry.id })
            }
            _ if self.config.blocked_risk_levels.contains(&level) => {
                Some(DenialReason::RiskLevel { level })
            }
            _ => None,
        };
        Ok(Capability {
            subject_id: subject_id.to_string(),
            allowed:    reason.is_none(),
            reason,
        })
    }

    pub fn trust_record(&self, subject_id: &str) -> TrustResult<Option<TrustRecord>> {
        self.store.read(|db| db.get_trust_record(subject_id))
    }

    /// Audit trail, oldest first.
    pub fn score_history(&self, subject_id: &str) -> TrustResult<Vec<ScoreHistoryEntry>> {
        self.store.read(|db| db.score_history(subject_id))
    }

    /// Outbox rows for the subject, oldest first.
    pub fn events_for(&self, subject_id: &str) -> TrustResult<Vec<EventLogEntry>> {
        self.store.read(|db| db.events_for_subject(subject_id))
    }

    // ── Flags ──────────────────────────────────────────────────

    pub fn raise_flag(
        &self,
        subject_id:  &str,
        severity:    Severity,
        category:    &str,
        description: &str,
        raised_by:   &str,
    ) -> TrustResult<Cascade<RiskFlag>> {
        let now = self.now();
        let flag = RiskFlag {
            id:           new_id(),
            subject_id:   subject_id.to_string(),
            status:       FlagStatus::Active,
            severity,
            category:     category.to_string(),
            description:  description.to_string(),
            raised_by:    raised_by.to_string(),
            raised_at:    now,
            resolved_at:  None,
            review_notes: None,
            reviewer_id:  None,
        };
        let outbox: Outbox = vec![(
            Channel::Admin,
            TrustEvent::FlagRaised {
                subject_id: subject_id.to_string(),
                flag_id:    flag.id.clone(),
                severity,
                category:   flag.category.clone(),
                at:         now,
            },
        )];
        let trigger = self.store.write(|db| {
            db.insert_flag(&flag)?;
            write_outbox(db, &outbox, now)?;
            db.enqueue_trigger(subject_id, TriggerReason::FlagRaised, now)
        })?;
        log::info!(
            "subject={subject_id} flag={} raised severity={} category={category}",
            flag.id,
            severity.as_str()
        );
        self.deliver(&outbox);
        Ok(Cascade { recalculation: self.run_trigger(&trigger), value: flag })
    }

    /// ACTIVE → UNDER_REVIEW. Does not affect the score.
    pub fn begin_review(&self, flag_id: &str, reviewer_id: &str) -> TrustResult<RiskFlag> {
        let flag = self.store.write(|db| {
            let mut flag = db
                .get_flag(flag_id)?
                .ok_or_else(|| TrustError::FlagNotFound { flag_id: flag_id.to_string() })?;
            flag.begin_review(reviewer_id)?;
            db.update_flag(&flag)?;
            Ok(flag)
        })?;
        log::info!("subject={} flag={flag_id} under review by {reviewer_id}", flag.subject_id);
        Ok(flag)
    }

    /// Close a flag as RESOLVED or FALSE_POSITIVE and cascade a FLAG_RESOLVED pass.
    pub fn resolve_flag(
        &self,
        flag_id:     &str,
        outcome:     FlagOutcome,
        reviewer_id: &str,
        notes:       Option<&str>,
    ) -> TrustResult<Cascade<RiskFlag>> {
        let now = self.now();
        let (flag, trigger, outbox) = self.store.write(|db| {
            let mut flag = db
                .get_flag(flag_id)?
                .ok_or_else(|| TrustError::FlagNotFound { flag_id: flag_id.to_string() })?;
            flag.resolve(outcome, reviewer_id, notes, now)?;
            db.update_flag(&flag)?;
            let outbox: Outbox = vec![(
                Channel::Subject,
                TrustEvent::FlagResolved {
                    subject_id:  flag.subject_id.clone(),
                    flag_id:     flag.id.clone(),
                    status:      flag.status,
                    reviewer_id: reviewer_id.to_string(),
                    at:          now,
                },
            )];
            write_outbox(db, &outbox, now)?;
            let trigger = db.enqueue_trigger(&flag.subject_id, TriggerReason::FlagResolved, now)?;
            Ok((flag, trigger, outbox))
        })?;
        log::info!(
            "subject={} flag={flag_id} closed as {} by {reviewer_id}",
            flag.subject_id,
            flag.status.as_str()
        );
        self.deliver(&outbox);
        Ok(Cascade { recalculation: self.run_trigger(&trigger), value: flag })
    }

    pub fn get_flag(&self, flag_id: &str) -> TrustResult<RiskFlag> {
        self.store
            .read(|db| db.get_flag(flag_id))?
            .ok_or_else(|| TrustError::FlagNotFound { flag_id: flag_id.to_string() })
    }

    /// Every flag of the subject, oldest first.
    pub fn list_flags(&self, subject_id: &str) -> TrustResult<Vec<RiskFlag>> {
        self.store.read(|db| db.flags_for_subject(subject_id))
    }

    // ── Blacklist ──────────────────────────────────────────────

    /// Open an ACTIVE entry. An active entry whose expiry has passed is expired
    /// first; any other active entry is a DUPLICATE_BLACKLIST_ENTRY.
    pub fn blacklist_subject(
        &self,
        subject_id: &str,
        reason:     &str,
        severity:   Severity,
        expires_at: Option<Timestamp>,
        admin_id:   &str,
    ) -> TrustResult<BlacklistEntry> {
        let now = self.now();
        if matches!(expires_at, Some(at) if at <= now) {
            return Err(TrustError::InvalidRequest(format!(
                "blacklist expiry for '{subject_id}' is not in the future"
            )));
        }
        let entry = BlacklistEntry {
            id:             new_id(),
            subject_id:     subject_id.to_string(),
            status:         BlacklistStatus::Active,
            reason:         reason.to_string(),
            severity,
            blacklisted_by: admin_id.to_string(),
            blacklisted_at: now,
            expires_at,
            lifted_at:      None,
            lifted_by:      None,
        };

        let result = self.store.write(|db| {
            if let Some(mut existing) = db.active_blacklist_entry(subject_id)? {
                if !existing.is_due_to_expire(now) {
                    return Err(TrustError::DuplicateBlacklistEntry {
                        subject_id: subject_id.to_string(),
                        entry_id:   existing.id,
                    });
                }
                existing.expire(now)?;
                db.update_blacklist_entry(&existing)?;
            }
            db.insert_blacklist_entry(&entry)
        });
        match result {
            Ok(()) => {}
            // Lost a race to another writer; the partial unique index caught it.
            // No winner to name: return the raw rejection.
            Err(e) if is_constraint_violation(&e) => {
                return match self.store.read(|db| db.active_blacklist_entry(subject_id))? {
                    Some(winner) => Err(TrustError::DuplicateBlacklistEntry {
                        subject_id: subject_id.to_string(),
                        entry_id:   winner.id,
                    }),
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        }

        log::info!(
            "subject={subject_id} blacklisted entry={} severity={} by {admin_id}",
            entry.id,
            severity.as_str()
        );
        Ok(entry)
    }

    /// Amend severity and/or reason of an active entry.
    pub fn update_blacklist_entry(
        &self,
        entry_id: &str,
        severity: Option<Severity>,
        reason:   Option<&str>,
    ) -> TrustResult<BlacklistEntry> {
        self.store.write(|db| {
            let mut entry = load_entry(db, entry_id)?;
            entry.amend(severity, reason)?;
            db.update_blacklist_entry(&entry)?;
            Ok(entry)
        })
    }

    /// Manual override: ACTIVE → LIFTED, cascading a MANUAL pass.
    pub fn lift_blacklist(&self, entry_id: &str, admin_id: &str) -> TrustResult<Cascade<BlacklistEntry>> {
        let now = self.now();
        let (entry, trigger, outbox) = self.store.write(|db| {
            let mut entry = load_entry(db, entry_id)?;
            entry.lift(admin_id, now)?;
            db.update_blacklist_entry(&entry)?;
            let outbox: Outbox = vec![(
                Channel::Subject,
                TrustEvent::BlacklistLifted {
                    subject_id: entry.subject_id.clone(),
                    entry_id:   entry.id.clone(),
                    lifted_by:  admin_id.to_string(),
                    at:         now,
                },
            )];
            write_outbox(db, &outbox, now)?;
            let trigger = db.enqueue_trigger(&entry.subject_id, TriggerReason::Manual, now)?;
            Ok((entry, trigger, outbox))
        })?;
        log::info!("subject={} entry={entry_id} lifted by {admin_id}", entry.subject_id);
        self.deliver(&outbox);
        Ok(Cascade { recalculation: self.run_trigger(&trigger), value: entry })
    }

    /// Move every ACTIVE entry whose expiry has passed to EXPIRED.
    pub fn expire_blacklists(&self) -> TrustResult<Vec<BlacklistEntry>> {
        let now = self.now();
        let expired = self.store.write(|db| {
            let mut expired = Vec::new();
            for mut entry in db.blacklist_entries_due(now)? {
                entry.expire(now)?;
                db.update_blacklist_entry(&entry)?;
                expired.push(entry);
            }
            Ok(expired)
        })?;
        for entry in &expired {
            log::warn!("subject={} entry={} expired", entry.subject_id, entry.id);
        }
        Ok(expired)
    }

    /// The entry currently restricting the subject, if any.
    pub fn active_blacklist(&self, subject_id: &str) -> TrustResult<Option<BlacklistEntry>> {
        let now = self.now();
        let entry = self.store.read(|db| db.active_blacklist_entry(subject_id))?;
        Ok(entry.filter(|e| e.is_enforced_at(now)))
    }

    pub fn blacklist_entry(&self, entry_id: &str) -> TrustResult<BlacklistEntry> {
        self.store.read(|db| load_entry(db, entry_id))
    }

    /// Every entry of the subject, oldest first.
    pub fn blacklist_history(&self, subject_id: &str) -> TrustResult<Vec<BlacklistEntry>> {
        self.store.read(|db| db.blacklist_entries_for(subject_id))
    }

    // ── Appeals ────────────────────────────────────────────────

    /// File an appeal against an enforced entry. One pending appeal per entry.
    pub fn open_appeal(&self, entry_id: &str, statement: &str) -> TrustResult<Appeal> {
        let now = self.now();
        let result = self.store.write(|db| {
            let entry = load_entry(db, entry_id)?;
            if !entry.is_enforced_at(now) {
                return Err(TrustError::BlacklistNotActive { entry_id: entry_id.to_string() });
            }
            if let Some(pending) = db.pending_appeal_for_entry(entry_id)? {
                return Err(TrustError::AppealAlreadyPending {
                    entry_id:  entry_id.to_string(),
                    appeal_id: pending.id,
                });
            }
            let appeal = Appeal {
                id:          new_id(),
                entry_id:    entry_id.to_string(),
                subject_id:  entry.subject_id,
                status:      AppealStatus::Pending,
                statement:   statement.to_string(),
                filed_at:    now,
                decided_at:  None,
                decided_by:  None,
                admin_notes: None,
            };
            db.insert_appeal(&appeal)?;
            Ok(appeal)
        });
        let appeal = match result {
            Err(e) if is_constraint_violation(&e) => {
                return match self.store.read(|db| db.pending_appeal_for_entry(entry_id))? {
                    Some(winner) => Err(TrustError::AppealAlreadyPending {
                        entry_id:  entry_id.to_string(),
                        appeal_id: winner.id,
                    }),
                    None => Err(e),
                };
            }
            other => other?,
        };
        log::info!("subject={} appeal={} filed on entry={entry_id}", appeal.subject_id, appeal.id);
        Ok(appeal)
    }

    /// Decide a pending appeal. Approval lifts the entry and cascades exactly one
    /// APPEAL_DECISION pass; denial leaves the score alone.
    pub fn decide_appeal(
        &self,
        appeal_id: &str,
        decision:  AppealDecision,
        admin_id:  &str,
        notes:     Option<&str>,
    ) -> TrustResult<Cascade<Appeal>> {
        let now = self.now();
        let (appeal, trigger, outbox) = self.store.write(|db| {
            let mut appeal = db
                .get_appeal(appeal_id)?
                .ok_or_else(|| TrustError::AppealNotFound { appeal_id: appeal_id.to_string() })?;
            let mut entry = load_entry(db, &appeal.entry_id)?;
            let needs_recalculation = appeal.decide(&mut entry, decision, admin_id, notes, now)?;
            db.update_appeal(&appeal)?;

            let mut outbox: Outbox = vec![(
                Channel::Subject,
                TrustEvent::AppealDecided {
                    subject_id: appeal.subject_id.clone(),
                    appeal_id:  appeal.id.clone(),
                    entry_id:   entry.id.clone(),
                    status:     appeal.status,
                    at:         now,
                },
            )];
            let trigger = if needs_recalculation {
                db.update_blacklist_entry(&entry)?;
                outbox.push((
                    Channel::Subject,
                    TrustEvent::BlacklistLifted {
                        subject_id: entry.subject_id.clone(),
                        entry_id:   entry.id.clone(),
                        lifted_by:  admin_id.to_string(),
                        at:         now,
                    },
                ));
                Some(db.enqueue_trigger(&appeal.subject_id, TriggerReason::AppealDecision, now)?)
            } else {
                None
            };
            write_outbox(db, &outbox, now)?;
            Ok((appeal, trigger, outbox))
        })?;
        log::info!(
            "subject={} appeal={appeal_id} {} by {admin_id}",
            appeal.subject_id,
            appeal.status.as_str()
        );
        self.deliver(&outbox);
        let recalculation = match &trigger {
            Some(trigger) => self.run_trigger(trigger),
            None => Recalculation::NotRequired,
        };
        Ok(Cascade { value: appeal, recalculation })
    }

    pub fn appeal(&self, appeal_id: &str) -> TrustResult<Appeal> {
        self.store
            .read(|db| db.get_appeal(appeal_id))?
            .ok_or_else(|| TrustError::AppealNotFound { appeal_id: appeal_id.to_string() })
    }

    pub fn appeals_for_entry(&self, entry_id: &str) -> TrustResult<Vec<Appeal>> {
        self.store.read(|db| db.appeals_for_entry(entry_id))
    }

    // ── Activity and notes ─────────────────────────────────────

    /// Record a transaction outcome and cascade a TRANSACTION pass.
    pub fn record_transaction(
        &self,
        subject_id: &str,
        outcome:    TransactionOutcome,
    ) -> TrustResult<Recalculation> {
        let now = self.now();
        let trigger = self.store.write(|db| {
            db.insert_transaction_outcome(subject_id, outcome, now)?;
            db.enqueue_trigger(subject_id, TriggerReason::Transaction, now)
        })?;
        log::debug!("subject={subject_id} transaction {}", outcome.as_str());
        Ok(self.run_trigger(&trigger))
    }

    /// Advisory note. Never read by scoring.
    pub fn add_seller_note(&self, subject_id: &str, author_id: &str, body: &str) -> TrustResult<SellerNote> {
        let note = SellerNote {
            id:         new_id(),
            subject_id: subject_id.to_string(),
            author_id:  author_id.to_string(),
            body:       body.to_string(),
            created_at: self.now(),
        };
        self.store.write(|db| db.insert_seller_note(&note))?;
        Ok(note)
    }

    pub fn seller_notes(&self, subject_id: &str) -> TrustResult<Vec<SellerNote>> {
        self.store.read(|db| db.seller_notes(subject_id))
    }

    // ── Internals ──────────────────────────────────────────────

    fn deliver(&self, outbox: &[(Channel, TrustEvent)]) {
        for (channel, event) in outbox {
            match channel {
                Channel::Subject => self.sink.notify(event.subject_id(), event),
                Channel::Admin => self.sink.notify_admin(event),
            }
        }
    }
}

fn load_entry(db: &Db<'_>, entry_id: &str) -> TrustResult<BlacklistEntry> {
    db.get_blacklist_entry(entry_id)?
        .ok_or_else(|| TrustError::BlacklistEntryNotFound { entry_id: entry_id.to_string() })
}

fn write_outbox(db: &Db<'_>, outbox: &[(Channel, TrustEvent)], at: Timestamp) -> TrustResult<()> {
    for (channel, event) in outbox {
        db.append_event(&EventLogEntry::new(*channel, event, at)?)?;
    }
    Ok(())
}
