//! Sub-score providers and the bounded parallel query over them.
//!
//! RULES:
//!   - A provider answers for exactly one dimension.
//!   - `Ok(None)` means "no signal for this subject"; `Err` means the provider failed.
//!     Both become a missing value for the aggregation.
//!   - One query round never waits longer than its deadline. A provider that has not
//!     answered by then is recorded as timed out and its thread is left to finish alone.
//!   - A provider with `MAX_IN_FLIGHT` such stragglers still running is not queried
//!     again until one returns; the round records it as unavailable instead.

use crate::{
    aggregation::{Dimension, SubScores},
    error::ProviderError,
    flag::Severity,
    store::TrustStore,
    types::SubjectId,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

pub trait SubScoreProvider: Send + Sync {
    /// Unique stable name, used in logs and errors.
    fn name(&self) -> &str;

    fn dimension(&self) -> Dimension;

    /// Score in [0, 100], `Ok(None)` when there is no signal for the subject.
    fn score(&self, subject_id: &str) -> Result<Option<f64>, ProviderError>;
}

/// Outcome of querying every registered provider once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderRound {
    pub observed: SubScores,
    pub failures: Vec<ProviderError>,
    pub queried:  usize,
}

impl ProviderRound {
    /// Every provider failed or timed out. Providers that answered "no signal"
    /// do not count as failures.
    pub fn total_failure(&self) -> bool {
        self.queried > 0 && self.failures.len() == self.queried
    }
}

/// Outstanding queries a single provider may have before it is skipped.
pub const MAX_IN_FLIGHT: usize = 4;

#[derive(Clone)]
struct Registered {
    provider:  Arc<dyn SubScoreProvider>,
    in_flight: Arc<AtomicUsize>,
}

/// Holds one in-flight slot; released when the query thread finishes.
struct Slot(Arc<AtomicUsize>);

impl Slot {
    fn claim(counter: &Arc<AtomicUsize>) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < MAX_IN_FLIGHT).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default, Clone)]
pub struct ProviderSet {
    providers: Vec<Registered>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. When two providers share a dimension the one
    /// registered first wins if both answer.
    pub fn register(&mut self, provider: Arc<dyn SubScoreProvider>) {
        self.providers.push(Registered { provider, in_flight: Arc::new(AtomicUsize::new(0)) });
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Query all providers in parallel with a shared deadline.
    pub fn query(&self, subject_id: &str, timeout: Duration) -> ProviderRound {
        let n = self.providers.len();
        let mut answers: Vec<Option<Result<Option<f64>, ProviderError>>> = vec![None; n];
        let (tx, rx) = mpsc::channel();

        for (idx, registered) in self.providers.iter().enumerate() {
            let Some(slot) = Slot::claim(&registered.in_flight) else {
                answers[idx] = Some(Err(ProviderError::Unavailable {
                    provider: registered.provider.name().to_string(),
                    reason:   format!("{MAX_IN_FLIGHT} earlier queries still outstanding"),
                }));
                continue;
            };
            let tx = tx.clone();
            let provider = Arc::clone(&registered.provider);
            let subject: SubjectId = subject_id.to_string();
            let spawned = thread::Builder::new()
                .name(format!("provider-{}", provider.name()))
                .spawn(move || {
                    let _slot = slot;
                    let answer = provider.score(&subject);
                    // Receiver may be gone after the deadline.
                    let _ = tx.send((idx, answer));
                });
            if let Err(e) = spawned {
                answers[idx] = Some(Err(ProviderError::Unavailable {
                    provider: registered.provider.name().to_string(),
                    reason:   format!("cannot spawn query thread: {e}"),
                }));
            }
        }
        drop(tx);

        let deadline = Instant::now() + timeout;
        while answers.iter().any(Option::is_none) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((idx, answer)) => answers[idx] = Some(answer),
                Err(_) => break,
            }
        }

        let mut round = ProviderRound { queried: n, ..ProviderRound::default() };
        for (registered, answer) in self.providers.iter().zip(answers) {
            let provider = &registered.provider;
            let answer = answer.unwrap_or_else(|| {
                Err(ProviderError::TimedOut { provider: provider.name().to_string() })
            });
            match answer.and_then(|v| validate(provider.name(), v)) {
                Ok(Some(value)) => {
                    round.observed.entry(provider.dimension()).or_insert(value);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("subject={subject_id} {e}; treating as missing");
                    round.failures.push(e);
                }
            }
        }
        round
    }
}

fn validate(provider: &str, value: Option<f64>) -> Result<Option<f64>, ProviderError> {
    match value {
        Some(v) if !v.is_finite() || !(0.0..=100.0).contains(&v) => {
            Err(ProviderError::OutOfRange { provider: provider.to_string(), value: v })
        }
        other => Ok(other),
    }
}

// ── Built-in providers ───────────────────────────────────────────────────────

/// Penalty each open flag takes off the flag baseline.
fn open_penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Low      => 5.0,
        Severity::Medium   => 12.0,
        Severity::High     => 25.0,
        Severity::Critical => 40.0,
    }
}

/// Behavioral signal derived from the flag registry.
///
/// Flags are negative evidence only: a subject with no open flag has no signal,
/// and each open flag lowers the score below the neutral baseline. Closing a flag
/// (resolved or false positive) removes its contribution on the next pass.
pub struct FlagSignalProvider {
    store:    Arc<TrustStore>,
    baseline: f64,
}

impl FlagSignalProvider {
    pub fn new(store: Arc<TrustStore>) -> Self {
        Self { store, baseline: 50.0 }
    }
}

impl SubScoreProvider for FlagSignalProvider {
    fn name(&self) -> &str {
        "flag_signal"
    }

    fn dimension(&self) -> Dimension {
        Dimension::Behavioral
    }

    fn score(&self, subject_id: &str) -> Result<Option<f64>, ProviderError> {
        let severities = self
            .store
            .read(|db| db.open_flag_severities(subject_id))
            .map_err(|e| ProviderError::Unavailable {
                provider: self.name().to_string(),
                reason:   e.to_string(),
            })?;
        if severities.is_empty() {
            return Ok(None);
        }
        let penalty: f64 = severities.into_iter().map(open_penalty).sum();
        Ok(Some((self.baseline - penalty).max(0.0)))
    }
}

/// Transaction signal: Laplace-smoothed share of clean outcomes.
/// Refunds count half, disputes count against. No transactions, no signal.
pub struct TransactionHistoryProvider {
    store: Arc<TrustStore>,
}

impl TransactionHistoryProvider {
    pub fn new(store: Arc<TrustStore>) -> Self {
        Self { store }
    }
}

impl SubScoreProvider for TransactionHistoryProvider {
    fn name(&self) -> &str {
        "transaction_history"
    }

    fn dimension(&self) -> Dimension {
        Dimension::Transaction
    }

    fn score(&self, subject_id: &str) -> Result<Option<f64>, ProviderError> {
        let counts = self
            .store
            .read(|db| db.transaction_counts(subject_id))
            .map_err(|e| ProviderError::Unavailable {
                provider: self.name().to_string(),
                reason:   e.to_string(),
            })?;
        if counts.total() == 0 {
            return Ok(None);
        }
        let clean = counts.completed as f64 + 0.5 * counts.refunded as f64;
        Ok(Some(100.0 * (clean + 1.0) / (counts.total() as f64 + 2.0)))
    }
}

/// Fixed per-subject values, settable at runtime. Stands in for external
/// evaluators (KYB vendors, payment processors) in tests and the runner.
pub struct StaticProvider {
    name:      String,
    dimension: Dimension,
    values:    RwLock<HashMap<SubjectId, f64>>,
    delay:     RwLock<Option<Duration>>,
    failing:   RwLock<bool>,
}

impl StaticProvider {
    pub fn new(name: &str, dimension: Dimension) -> Self {
        Self {
            name:    name.to_string(),
            dimension,
            values:  RwLock::new(HashMap::new()),
            delay:   RwLock::new(None),
            failing: RwLock::new(false),
        }
    }

    pub fn set(&self, subject_id: &str, value: f64) {
        self.values.write().insert(subject_id.to_string(), value);
    }

    /// Sleep this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }

    /// Answer every query with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.write() = failing;
    }
}

impl SubScoreProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn score(&self, subject_id: &str) -> Result<Option<f64>, ProviderError> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        if *self.failing.read() {
            return Err(ProviderError::Unavailable {
                provider: self.name.clone(),
                reason:   "upstream offline".into(),
            });
        }
        Ok(self.values.read().get(subject_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, dimension: Dimension) -> Arc<StaticProvider> {
        Arc::new(StaticProvider::new(name, dimension))
    }

    #[test]
    fn collects_answers_and_no_signal() {
        let kyb = provider("kyb", Dimension::Kyb);
        let pay = provider("pay", Dimension::Payment);
        kyb.set("s", 90.0);
        let mut set = ProviderSet::new();
        set.register(kyb);
        set.register(pay);

        let round = set.query("s", Duration::from_millis(500));
        assert_eq!(round.queried, 2);
        assert_eq!(round.observed.get(&Dimension::Kyb), Some(&90.0));
        assert!(!round.observed.contains_key(&Dimension::Payment));
        assert!(round.failures.is_empty());
        assert!(!round.total_failure());
    }

    #[test]
    fn slow_provider_times_out_without_blocking_the_round() {
        let slow = provider("slow", Dimension::Kyb);
        slow.set("s", 10.0);
        slow.set_delay(Some(Duration::from_millis(800)));
        let fast = provider("fast", Dimension::Payment);
        fast.set("s", 70.0);
        let mut set = ProviderSet::new();
        set.register(slow);
        set.register(fast);

        let started = Instant::now();
        let round = set.query("s", Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_millis(600));
        assert_eq!(round.observed.get(&Dimension::Payment), Some(&70.0));
        assert_eq!(
            round.failures,
            vec![ProviderError::TimedOut { provider: "slow".into() }]
        );
        assert!(!round.total_failure());
    }

    #[test]
    fn stuck_provider_is_skipped_once_its_stragglers_pile_up() {
        let stuck = provider("stuck", Dimension::Kyb);
        stuck.set("s", 10.0);
        stuck.set_delay(Some(Duration::from_millis(400)));
        let mut set = ProviderSet::new();
        set.register(stuck.clone());

        for _ in 0..MAX_IN_FLIGHT {
            let round = set.query("s", Duration::from_millis(10));
            assert_eq!(round.failures, vec![ProviderError::TimedOut { provider: "stuck".into() }]);
        }
        let started = Instant::now();
        let round = set.query("s", Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(matches!(
            round.failures.as_slice(),
            [ProviderError::Unavailable { provider, .. }] if provider == "stuck"
        ));

        // Slots come back as the stragglers return.
        stuck.set_delay(None);
        thread::sleep(Duration::from_millis(600));
        let round = set.query("s", Duration::from_millis(200));
        assert_eq!(round.observed.get(&Dimension::Kyb), Some(&10.0));
        assert!(round.failures.is_empty());
    }

    #[test]
    fn every_provider_failing_is_total_failure() {
        let a = provider("a", Dimension::Kyb);
        let b = provider("b", Dimension::Payment);
        a.set_failing(true);
        b.set("s", 500.0); // out of range
        let mut set = ProviderSet::new();
        set.register(a);
        set.register(b);

        let round = set.query("s", Duration::from_millis(200));
        assert!(round.observed.is_empty());
        assert!(round.total_failure());
    }

    #[test]
    fn first_registered_provider_wins_a_shared_dimension() {
        let first = provider("first", Dimension::Kyb);
        let second = provider("second", Dimension::Kyb);
        first.set("s", 20.0);
        second.set("s", 80.0);
        let mut set = ProviderSet::new();
        set.register(first);
        set.register(second);

        let round = set.query("s", Duration::from_millis(200));
        assert_eq!(round.observed.get(&Dimension::Kyb), Some(&20.0));
    }

    #[test]
    fn empty_set_is_not_a_failure() {
        let round = ProviderSet::new().query("s", Duration::from_millis(10));
        assert_eq!(round.queried, 0);
        assert!(!round.total_failure());
    }
}
