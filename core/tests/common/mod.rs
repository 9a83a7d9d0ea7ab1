//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Barrier,
};
use trustdesk_core::{
    aggregation::Dimension,
    clock::ManualClock,
    config::EngineConfig,
    engine::TrustEngine,
    error::ProviderError,
    notify::MemorySink,
    providers::{FlagSignalProvider, StaticProvider, SubScoreProvider, TransactionHistoryProvider},
    store::TrustStore,
    types::Timestamp,
};

pub fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Engine plus handles on everything a test wants to steer or inspect.
///
/// Provider registration order: one static provider per dimension, then the
/// built-in flag and transaction providers. A static value, when set, wins.
pub struct Harness {
    pub engine:      Arc<TrustEngine>,
    pub store:       Arc<TrustStore>,
    pub clock:       Arc<ManualClock>,
    pub sink:        Arc<MemorySink>,
    pub kyb:         Arc<StaticProvider>,
    pub compliance:  Arc<StaticProvider>,
    pub transaction: Arc<StaticProvider>,
    pub payment:     Arc<StaticProvider>,
    pub behavioral:  Arc<StaticProvider>,
    pub gate:        Arc<GateProvider>,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default_test())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    init_logging();
    let store = Arc::new(TrustStore::in_memory().unwrap());
    store.migrate().unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let sink = Arc::new(MemorySink::new());

    let kyb = Arc::new(StaticProvider::new("kyb_vendor", Dimension::Kyb));
    let compliance = Arc::new(StaticProvider::new("compliance_vendor", Dimension::Compliance));
    let transaction = Arc::new(StaticProvider::new("txn_override", Dimension::Transaction));
    let payment = Arc::new(StaticProvider::new("payment_processor", Dimension::Payment));
    let behavioral = Arc::new(StaticProvider::new("behavior_override", Dimension::Behavioral));
    let gate = Arc::new(GateProvider::new());

    let engine = TrustEngine::new(Arc::clone(&store), config)
        .unwrap()
        .with_clock(clock.clone())
        .with_sink(sink.clone())
        .with_provider(gate.clone())
        .with_provider(kyb.clone())
        .with_provider(compliance.clone())
        .with_provider(transaction.clone())
        .with_provider(payment.clone())
        .with_provider(behavioral.clone())
        .with_provider(Arc::new(FlagSignalProvider::new(Arc::clone(&store))))
        .with_provider(Arc::new(TransactionHistoryProvider::new(Arc::clone(&store))));

    Harness {
        engine: Arc::new(engine),
        store,
        clock,
        sink,
        kyb,
        compliance,
        transaction,
        payment,
        behavioral,
        gate,
    }
}

/// Config for tests that hold a subject's lock on purpose: short lock waits,
/// provider rounds long enough to outlast them.
pub fn contention_config() -> EngineConfig {
    EngineConfig {
        lock_timeout_ms:     50,
        provider_timeout_ms: 5_000,
        ..EngineConfig::default_test()
    }
}

/// Provider that, once armed, parks the next query until released.
/// Lets a test hold a subject's recalculation lock for as long as it likes.
pub struct GateProvider {
    armed:   AtomicBool,
    entered: Barrier,
    release: Barrier,
}

impl GateProvider {
    pub fn new() -> Self {
        Self {
            armed:   AtomicBool::new(false),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Block until the armed query is parked inside the provider.
    pub fn wait_entered(&self) {
        self.entered.wait();
    }

    pub fn open(&self) {
        self.release.wait();
    }
}

impl SubScoreProvider for GateProvider {
    fn name(&self) -> &str {
        "gate"
    }

    fn dimension(&self) -> Dimension {
        Dimension::Compliance
    }

    fn score(&self, _subject_id: &str) -> Result<Option<f64>, ProviderError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        Ok(None)
    }
}
