//! Cross-module integration tests: bar store durability, and the
//! aggregator-to-execution-gate wiring that `main` assembles at startup.

use reversal_engine::aggregator::BarAggregator;
use reversal_engine::bar::{Bar, Timeframe};
use reversal_engine::config::ExecutionConfig;
use reversal_engine::execution::journal::TradeJournal;
use reversal_engine::execution::{Admission, ExecutionGate, Side, Signal};
use reversal_engine::store::BarStore;
use std::sync::Arc;

fn minute_bar(ts: i64, close: f64) -> Bar {
    Bar { timestamp: ts, open: close, high: close + 0.1, low: close - 0.1, close, volume: 100 }
}

#[test]
fn bar_store_round_trips_a_saved_series_across_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = BarStore::open(dir.path()).unwrap();
        let bars = vec![minute_bar(0, 10.0), minute_bar(60, 10.5), minute_bar(120, 11.0)];
        store.save("AAPL", Timeframe::M1, bars).unwrap();
    }

    let reopened = BarStore::open(dir.path()).unwrap();
    let series = reopened.load("AAPL", Timeframe::M1, None, None).unwrap();
    assert_eq!(series.len(), 3);
    assert_eq!(series.bars[0].timestamp, 0);
    assert_eq!(series.bars[2].close, 11.0);
}

#[test]
fn bar_store_rejects_a_save_that_breaks_invariants_without_disturbing_prior_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = BarStore::open(dir.path()).unwrap();
    store.save("MSFT", Timeframe::M1, vec![minute_bar(0, 100.0)]).unwrap();

    let bad = Bar { timestamp: 60, open: 100.0, high: 90.0, low: 110.0, close: 100.0, volume: 1 };
    let result = store.save("MSFT", Timeframe::M1, vec![bad]);
    assert!(result.is_err());

    let series = store.load("MSFT", Timeframe::M1, None, None).unwrap();
    assert_eq!(series.len(), 1);
}

/// Wires the aggregator's on_complete callback directly into the Execution
/// Gate's position-tracking loop, the way `main` does, and checks that
/// completed 1-minute bars for a held symbol move unrealized P&L.
#[test]
fn completed_bars_flow_from_aggregator_into_position_tracking() {
    let aggregator = BarAggregator::default();
    let journal = Arc::new(TradeJournal::in_memory().unwrap());
    let gate = Arc::new(ExecutionGate::new(ExecutionConfig::default(), journal));

    let admission = gate.admit(Signal {
        symbol: "TEST".into(),
        side: Side::Long,
        entry_price: 100.0,
        stop_price: 98.0,
        target_price: None,
        account_equity: 100_000.0,
        is_live_account: false,
        entry_time: 0,
    });
    assert!(matches!(admission, Admission::Accept { .. }));

    {
        let gate = gate.clone();
        aggregator.on_complete(Timeframe::M1, move |symbol, bar| gate.on_bar(symbol, bar));
    }

    // Five-second bars straddling a 1-minute boundary; the completed 1m
    // bar should carry close = 103.0 and drive the position's P&L.
    for (i, close) in [100.0, 101.0, 102.0, 101.5, 102.5, 103.0, 103.0, 103.0, 103.0, 103.0, 103.0, 103.0]
        .into_iter()
        .enumerate()
    {
        aggregator.add_fine_bar("TEST", minute_bar((i as i64) * 5, close)).unwrap();
    }
    aggregator.add_fine_bar("TEST", minute_bar(60, 104.0)).unwrap();

    let position = gate.open_positions().into_iter().find(|p| p.symbol == "TEST").unwrap();
    assert!((position.current_price - 103.0).abs() < 1e-9);
    assert!(position.unrealized_pnl > 0.0);
}
