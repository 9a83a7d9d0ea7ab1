//! trust-runner: headless driver for the Trust Desk engine.
//!
//! Usage:
//!   trust-runner --seed 12345 --events 5000 --subjects 200 --threads 4 --db run.db
//!   trust-runner --ipc-mode --db run.db --config data/engine_config.json

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use trustdesk_core::{
    aggregation::Dimension,
    blacklist::{AppealDecision, BlacklistStatus},
    config::EngineConfig,
    engine::{Recalculation, TrustEngine},
    error::TrustError,
    flag::{FlagOutcome, FlagStatus, Severity},
    model::{RiskLevel, TransactionOutcome, TriggerReason},
    providers::StaticProvider,
    store::TrustStore,
};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Summary { subject_id: String },
    CanTransact { subject_id: String },
    Recalculate { subject_id: String },
    RecordTransaction { subject_id: String, outcome: TransactionOutcome },
    RaiseFlag {
        subject_id:  String,
        severity:    Severity,
        category:    String,
        description: String,
        raised_by:   String,
    },
    ResolveFlag {
        flag_id:     String,
        outcome:     FlagOutcome,
        reviewer_id: String,
        notes:       Option<String>,
    },
    Blacklist {
        subject_id: String,
        reason:     String,
        severity:   Severity,
        admin_id:   String,
    },
    LiftBlacklist { entry_id: String, admin_id: String },
    OpenAppeal { entry_id: String, statement: String },
    DecideAppeal {
        appeal_id: String,
        decision:  AppealDecision,
        admin_id:  String,
        notes:     Option<String>,
    },
    Maintenance,
    Quit,
}

/// One scripted step of the simulation, generated up front from the seed.
#[derive(Debug, Clone)]
enum SimEvent {
    Transaction(TransactionOutcome),
    RaiseFlag(Severity),
    ReviewOldestFlag(FlagOutcome),
    KybUpdate(f64),
    PaymentUpdate(f64),
    Blacklist(Severity),
    Appeal(AppealDecision),
}

#[derive(Default)]
struct Counters {
    transitions: AtomicUsize,
    deferred:    AtomicUsize,
    rejected:    AtomicUsize,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let events = parse_arg(&args, "--events", 2_000usize);
    let subjects = parse_arg(&args, "--subjects", 100usize).max(1);
    let threads = parse_arg(&args, "--threads", 4usize).max(1);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let config_path = args.windows(2).find(|w| w[0] == "--config").map(|w| w[1].as_str());

    let config = match config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if !ipc_mode {
        println!("Trust Desk: trust-runner");
        println!("  seed:      {seed}");
        println!("  events:    {events}");
        println!("  subjects:  {subjects}");
        println!("  threads:   {threads}");
        println!("  db:        {db}");
        println!("  config:    {}", config_path.unwrap_or("(defaults)"));
        println!();
    }

    let store = if db == ":memory:" {
        TrustStore::in_memory()?
    } else {
        TrustStore::open(db)?
    };
    store.migrate()?;
    let store = Arc::new(store);

    let kyb = Arc::new(StaticProvider::new("kyb_vendor", Dimension::Kyb));
    let payment = Arc::new(StaticProvider::new("payment_vendor", Dimension::Payment));
    let engine = Arc::new(
        TrustEngine::build(Arc::clone(&store), config)?
            .with_provider(kyb.clone())
            .with_provider(payment.clone()),
    );

    if ipc_mode {
        run_ipc_loop(&engine)?;
    } else {
        let counters = run_simulation(&engine, &kyb, &payment, seed, events, subjects, threads)?;
        print_summary(&engine, &store, &counters)?;
    }

    Ok(())
}

fn subject_name(index: usize) -> String {
    format!("subj-{index:05}")
}

/// Deterministic event plan: the same seed always yields the same per-subject scripts.
fn plan_events(seed: u64, events: usize, subjects: usize) -> Vec<Vec<SimEvent>> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let mut scripts = vec![Vec::new(); subjects];
    for _ in 0..events {
        let subject = rng.gen_range(0..subjects);
        let roll: f64 = rng.gen();
        let event = if roll < 0.45 {
            let outcome = match rng.gen_range(0..20) {
                0 => TransactionOutcome::Disputed,
                1 | 2 => TransactionOutcome::Refunded,
                _ => TransactionOutcome::Completed,
            };
            SimEvent::Transaction(outcome)
        } else if roll < 0.60 {
            let severity = match rng.gen_range(0..10) {
                0 => Severity::Critical,
                1 | 2 => Severity::High,
                3..=5 => Severity::Medium,
                _ => Severity::Low,
            };
            SimEvent::RaiseFlag(severity)
        } else if roll < 0.72 {
            let outcome = if rng.gen_bool(0.4) { FlagOutcome::FalsePositive } else { FlagOutcome::Resolved };
            SimEvent::ReviewOldestFlag(outcome)
        } else if roll < 0.84 {
            SimEvent::KybUpdate(rng.gen_range(0.0..=100.0))
        } else if roll < 0.95 {
            SimEvent::PaymentUpdate(rng.gen_range(0.0..=100.0))
        } else if roll < 0.98 {
            let severity = if rng.gen_bool(0.3) { Severity::Critical } else { Severity::High };
            SimEvent::Blacklist(severity)
        } else {
            let decision = if rng.gen_bool(0.5) { AppealDecision::Approve } else { AppealDecision::Deny };
            SimEvent::Appeal(decision)
        };
        scripts[subject].push(event);
    }
    scripts
}

fn run_simulation(
    engine: &Arc<TrustEngine>,
    kyb: &Arc<StaticProvider>,
    payment: &Arc<StaticProvider>,
    seed: u64,
    events: usize,
    subjects: usize,
    threads: usize,
) -> Result<Counters> {
    let scripts = plan_events(seed, events, subjects);
    let counters = Arc::new(Counters::default());

    // Each worker owns a disjoint slice of subjects so per-subject order is fixed by the plan.
    let mut shards: Vec<Vec<(String, Vec<SimEvent>)>> = vec![Vec::new(); threads];
    for (index, script) in scripts.into_iter().enumerate() {
        shards[index % threads].push((subject_name(index), script));
    }

    let handles: Vec<_> = shards
        .into_iter()
        .map(|shard| {
            let (engine, kyb, payment, counters) =
                (Arc::clone(engine), Arc::clone(kyb), Arc::clone(payment), Arc::clone(&counters));
            thread::spawn(move || -> Result<()> {
                for (subject_id, script) in shard {
                    engine.recalculate(&subject_id, TriggerReason::Manual)?;
                    for event in script {
                        apply_event(&engine, &kyb, &payment, &counters, &subject_id, event)?;
                    }
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("simulation worker panicked"))??;
    }

    let report = engine.run_maintenance()?;
    log::info!(
        "maintenance: {} expired, {} triggers drained, {} still deferred",
        report.expired.len(),
        report.drained.processed,
        report.drained.deferred
    );

    Arc::try_unwrap(counters).map_err(|_| anyhow::anyhow!("counters still shared"))
}

fn apply_event(
    engine: &TrustEngine,
    kyb: &StaticProvider,
    payment: &StaticProvider,
    counters: &Counters,
    subject_id: &str,
    event: SimEvent,
) -> Result<()> {
    let recalculation = match event {
        SimEvent::Transaction(outcome) => Some(engine.record_transaction(subject_id, outcome)),
        SimEvent::RaiseFlag(severity) => Some(
            engine
                .raise_flag(subject_id, severity, "sim_signal", "simulated detector hit", "sim-detector")
                .map(|c| c.recalculation),
        ),
        SimEvent::ReviewOldestFlag(outcome) => {
            let open = engine
                .list_flags(subject_id)?
                .into_iter()
                .find(|f| matches!(f.status, FlagStatus::Active | FlagStatus::UnderReview));
            open.map(|flag| {
                engine
                    .resolve_flag(&flag.id, outcome, "sim-reviewer", None)
                    .map(|c| c.recalculation)
            })
        }
        SimEvent::KybUpdate(value) => {
            kyb.set(subject_id, value);
            Some(engine.recalculate(subject_id, TriggerReason::Manual).map(Recalculation::Completed))
        }
        SimEvent::PaymentUpdate(value) => {
            payment.set(subject_id, value);
            Some(engine.recalculate(subject_id, TriggerReason::Manual).map(Recalculation::Completed))
        }
        SimEvent::Blacklist(severity) => {
            match engine.blacklist_subject(subject_id, "simulated enforcement", severity, None, "sim-admin") {
                Ok(_) => counters.transitions.fetch_add(1, Ordering::Relaxed),
                Err(e) => note_rejection(counters, e)?,
            };
            None
        }
        SimEvent::Appeal(decision) => match engine.active_blacklist(subject_id)? {
            Some(entry) => {
                let decided = engine
                    .open_appeal(&entry.id, "simulated appeal")
                    .and_then(|appeal| engine.decide_appeal(&appeal.id, decision, "sim-admin", None));
                Some(decided.map(|c| c.recalculation))
            }
            None => None,
        },
    };

    match recalculation {
        Some(Ok(outcome)) => {
            counters.transitions.fetch_add(1, Ordering::Relaxed);
            if outcome.is_deferred() {
                counters.deferred.fetch_add(1, Ordering::Relaxed);
            }
        }
        Some(Err(e)) => {
            note_rejection(counters, e)?;
        }
        None => {}
    }
    Ok(())
}

/// Business-rule rejections are expected in a random walk; anything else aborts the run.
fn note_rejection(counters: &Counters, err: TrustError) -> Result<usize> {
    match err {
        TrustError::Persistence(_) | TrustError::InvalidConfig(_) => Err(err.into()),
        other => {
            log::debug!("rejected: {} ({})", other, other.code());
            Ok(counters.rejected.fetch_add(1, Ordering::Relaxed))
        }
    }
}

fn run_ipc_loop(engine: &TrustEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        let reply = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string(), "code": e.code() }),
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn recalculation_json(outcome: &Recalculation) -> serde_json::Value {
    match outcome {
        Recalculation::Completed(record) => serde_json::json!({
            "status": "completed",
            "overall_score": record.overall_score,
            "risk_level": record.risk_level,
        }),
        Recalculation::Deferred { trigger_id, code } => {
            serde_json::json!({ "status": "deferred", "trigger_id": trigger_id, "code": code })
        }
        Recalculation::Superseded { trigger_id } => {
            serde_json::json!({ "status": "superseded", "trigger_id": trigger_id })
        }
        Recalculation::NotRequired => serde_json::json!({ "status": "not_required" }),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

fn handle_command(engine: &TrustEngine, cmd: IpcCommand) -> Result<serde_json::Value, TrustError> {
    let reply = match cmd {
        IpcCommand::Summary { subject_id } => to_json(&engine.get_summary(&subject_id)?),
        IpcCommand::CanTransact { subject_id } => to_json(&engine.can_transact(&subject_id)?),
        IpcCommand::Recalculate { subject_id } => {
            to_json(&engine.recalculate(&subject_id, TriggerReason::Manual)?)
        }
        IpcCommand::RecordTransaction { subject_id, outcome } => {
            recalculation_json(&engine.record_transaction(&subject_id, outcome)?)
        }
        IpcCommand::RaiseFlag { subject_id, severity, category, description, raised_by } => {
            let cascade = engine.raise_flag(&subject_id, severity, &category, &description, &raised_by)?;
            serde_json::json!({
                "flag": to_json(&cascade.value),
                "recalculation": recalculation_json(&cascade.recalculation),
            })
        }
        IpcCommand::ResolveFlag { flag_id, outcome, reviewer_id, notes } => {
            let cascade = engine.resolve_flag(&flag_id, outcome, &reviewer_id, notes.as_deref())?;
            serde_json::json!({
                "flag": to_json(&cascade.value),
                "recalculation": recalculation_json(&cascade.recalculation),
            })
        }
        IpcCommand::Blacklist { subject_id, reason, severity, admin_id } => {
            to_json(&engine.blacklist_subject(&subject_id, &reason, severity, None, &admin_id)?)
        }
        IpcCommand::LiftBlacklist { entry_id, admin_id } => {
            let cascade = engine.lift_blacklist(&entry_id, &admin_id)?;
            serde_json::json!({
                "entry": to_json(&cascade.value),
                "recalculation": recalculation_json(&cascade.recalculation),
            })
        }
        IpcCommand::OpenAppeal { entry_id, statement } => {
            to_json(&engine.open_appeal(&entry_id, &statement)?)
        }
        IpcCommand::DecideAppeal { appeal_id, decision, admin_id, notes } => {
            let cascade = engine.decide_appeal(&appeal_id, decision, &admin_id, notes.as_deref())?;
            serde_json::json!({
                "appeal": to_json(&cascade.value),
                "recalculation": recalculation_json(&cascade.recalculation),
            })
        }
        IpcCommand::Maintenance => {
            let report = engine.run_maintenance()?;
            serde_json::json!({
                "expired": report.expired.len(),
                "processed": report.drained.processed,
                "deferred": report.drained.deferred,
                "skipped": report.drained.skipped,
            })
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(reply)
}

fn print_summary(engine: &TrustEngine, store: &TrustStore, counters: &Counters) -> Result<()> {
    let scored = store.read(|db| db.trust_record_count())?;
    let passes = store.read(|db| db.history_count_total())?;
    let active_entries = store.read(|db| db.blacklist_count_by_status(BlacklistStatus::Active))?;
    let open_flags = store.read(|db| {
        Ok(db.flag_count_by_status(FlagStatus::Active)? + db.flag_count_by_status(FlagStatus::UnderReview)?)
    })?;
    let pending = engine.pending_triggers()?.len();

    println!("=== RUN SUMMARY ===");
    println!("  subjects scored:    {scored}");
    println!("  recalc passes:      {passes}");
    println!("  transitions:        {}", counters.transitions.load(Ordering::Relaxed));
    println!("  rejected:           {}", counters.rejected.load(Ordering::Relaxed));
    println!("  deferred:           {}", counters.deferred.load(Ordering::Relaxed));
    println!("  still pending:      {pending}");
    println!("  open flags:         {open_flags}");
    println!("  active blacklists:  {active_entries}");

    println!();
    println!("=== RISK DISTRIBUTION ===");
    for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical] {
        let count = store.read(|db| db.trust_record_count_at(level))?;
        let share = if scored > 0 { count as f64 * 100.0 / scored as f64 } else { 0.0 };
        println!("  {:<9} {count:>6}  ({share:.1}%)", level.as_str());
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
