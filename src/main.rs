//! Process entry point: wires the Bar Store, Session Manager, Bar
//! Aggregator, Screening Pipeline, and Execution Gate together, then runs
//! until `ctrl_c` requests a graceful shutdown.

use anyhow::{Context, Result};
use reversal_engine::aggregator::BarAggregator;
use reversal_engine::bar::Timeframe;
use reversal_engine::config::Config;
use reversal_engine::error::EngineError;
use reversal_engine::execution::journal::TradeJournal;
use reversal_engine::execution::ExecutionGate;
use reversal_engine::screening::{run_pipeline, UniverseEntry};
use reversal_engine::session::gateway::{BrokerGateway, FakeGateway};
use reversal_engine::session::SessionManager;
use reversal_engine::store::BarStore;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Process exit codes (spec §6): 0 normal shutdown, 1 configuration error,
/// 2 unrecoverable session loss, 3 invariant violation at startup.
const EXIT_OK: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_SESSION_LOST: i32 = 2;
const EXIT_INVARIANT_VIOLATION: i32 = 3;

fn main() {
    init_tracing();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };
    match rt.block_on(run()) {
        Ok(()) => std::process::exit(EXIT_OK),
        Err(err) => {
            error!(error = %err, "reversal engine exiting with error");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::InvariantViolation(_)) => EXIT_INVARIANT_VIOLATION,
        Some(EngineError::ConnectionLost) | Some(EngineError::ConnectionRefused) | Some(EngineError::NotConnected) => EXIT_SESSION_LOST,
        Some(EngineError::ConfigError(_)) => EXIT_CONFIG_ERROR,
        _ => EXIT_CONFIG_ERROR,
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    info!(data_dir = %config.data_dir, "reversal engine starting");

    let store = Arc::new(BarStore::open(&config.data_dir).context("opening bar store")?);
    let journal = Arc::new(TradeJournal::open(&config.trade_journal_path).context("opening trade journal")?);
    let aggregator = Arc::new(BarAggregator::default());
    let gate = Arc::new(ExecutionGate::new(config.execution.clone(), journal.clone()));

    // The broker gateway process itself is out of scope (spec §1); absent
    // a real implementation wired in by the embedding application, this
    // runs against an in-memory fake so the engine is exercisable standalone.
    let gateway: Arc<dyn BrokerGateway> = Arc::new(FakeGateway::new(true));
    let session = SessionManager::new(gateway, &config.session);
    session.set_journal(journal.clone());
    session.connect().await.context("initial broker connect")?;

    {
        let gate = gate.clone();
        aggregator.on_complete(Timeframe::M1, move |symbol, bar| {
            gate.on_bar(symbol, bar);
        });
    }

    // Session (B) streams quotes to Aggregator (C) (spec §2): every
    // symbol already tracked in the bar store gets a live subscription
    // that feeds its 5-second prints straight into the aggregator.
    for key in store.list().context("listing bar store universe for live subscriptions")? {
        if key.timeframe != Timeframe::S5 {
            continue;
        }
        let aggregator = aggregator.clone();
        let symbol = key.symbol.clone();
        session.subscribe_live(&key.symbol, move |bar| {
            if let Err(err) = aggregator.add_fine_bar(&symbol, bar) {
                warn!(symbol, %err, "live bar rejected by aggregator");
            }
        });
    }

    let trailing_task = {
        let gate = gate.clone();
        let session = session.clone();
        let period = std::time::Duration::from_secs(config.execution.trailing_check_period_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                gate.run_trailing_scan(&session).await;
            }
        })
    };

    let screening_task = {
        let store = store.clone();
        let screening_config = config.screening.clone();
        tokio::spawn(async move {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(screening_config.worker_count)
                .build()
                .expect("screening worker pool");
            loop {
                let universe: Vec<UniverseEntry> = match store.list() {
                    Ok(keys) => keys
                        .into_iter()
                        .filter(|k| k.timeframe == Timeframe::D1)
                        .map(|k| UniverseEntry { symbol: k.symbol, price: 0.0, avg_daily_volume: 0.0, market_cap: 0.0 })
                        .collect(),
                    Err(err) => {
                        warn!(%err, "failed to list bar store universe");
                        Vec::new()
                    }
                };
                let watchlist = run_pipeline(&universe, &store, &screening_config, &pool);
                info!(size = watchlist.len(), "screening pipeline produced watchlist");
                tokio::time::sleep(std::time::Duration::from_secs(300)).await;
            }
        })
    };

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, disconnecting session");
    session.disconnect().ok();
    trailing_task.abort();
    screening_task.abort();

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "reversal_engine=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
