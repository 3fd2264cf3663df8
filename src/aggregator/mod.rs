//! Real-time Bar Aggregator (spec §4.C) — folds incoming 5-second bars into
//! aligned coarser bars with boundary detection and subscriber callbacks.

use crate::bar::{Bar, Timeframe};
use crate::error::EngineError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::warn;

const DEFAULT_RING_CAPACITY: usize = 2048;

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    n_fine_bars: u32,
}

impl Accumulator {
    fn init(tf_start: i64, bar: Bar) -> Self {
        Self { start: tf_start, open: bar.open, high: bar.high, low: bar.low, close: bar.close, volume: bar.volume, n_fine_bars: 1 }
    }

    fn fold(&mut self, bar: Bar) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
        self.n_fine_bars += 1;
    }

    fn complete(&self) -> Bar {
        Bar { timestamp: self.start, open: self.open, high: self.high, low: self.low, close: self.close, volume: self.volume }
    }
}

type CompleteCallback = Box<dyn Fn(&str, Bar) + Send + Sync>;

#[derive(Default)]
struct PairState {
    active: HashMap<Timeframe, Accumulator>,
    completed: HashMap<Timeframe, VecDeque<Bar>>,
    last_fine_timestamp: Option<i64>,
}

/// Per-symbol state is guarded by a per-symbol lock so concurrent symbols
/// do not serialize (spec §4.C). On process restart the aggregator begins
/// empty; it never reconstructs partial bars from the Bar Store.
pub struct BarAggregator {
    ring_capacity: usize,
    symbols: Mutex<HashMap<String, Arc<Mutex<PairState>>>>,
    subscribers: Mutex<HashMap<Timeframe, Vec<Arc<CompleteCallback>>>>,
}

impl Default for BarAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl BarAggregator {
    pub fn new(ring_capacity: usize) -> Self {
        Self { ring_capacity, symbols: Mutex::new(HashMap::new()), subscribers: Mutex::new(HashMap::new()) }
    }

    /// Registers a callback invoked synchronously, in the calling thread of
    /// `add_fine_bar`, whenever a bar for `tf` completes. Subscribers must
    /// be non-blocking (spec §4.C/§5).
    pub fn on_complete(&self, tf: Timeframe, callback: impl Fn(&str, Bar) + Send + Sync + 'static) {
        self.subscribers.lock().entry(tf).or_default().push(Arc::new(Box::new(callback)));
    }

    fn pair_state(&self, symbol: &str) -> Arc<Mutex<PairState>> {
        self.symbols.lock().entry(symbol.to_string()).or_insert_with(|| Arc::new(Mutex::new(PairState::default()))).clone()
    }

    /// Folds one 5-second bar into every coarser timeframe for `symbol`.
    /// Rejects out-of-order or OHLC-invalid fine bars without mutating
    /// state (spec §4.C).
    pub fn add_fine_bar(&self, symbol: &str, bar: Bar) -> Result<(), EngineError> {
        if let Err(reason) = bar.validate() {
            warn!(symbol, reason, "rejected invalid fine bar");
            return Err(EngineError::InvalidBar { symbol: symbol.to_string(), timeframe: Timeframe::S5.to_string(), reason });
        }

        let state = self.pair_state(symbol);
        {
            let mut guard = state.lock();
            if let Some(last) = guard.last_fine_timestamp {
                if bar.timestamp <= last {
                    warn!(symbol, got = bar.timestamp, last, "rejected out-of-order fine bar");
                    return Err(EngineError::OutOfOrder {
                        symbol: symbol.to_string(),
                        timeframe: Timeframe::S5.to_string(),
                        got: bar.timestamp,
                        last,
                    });
                }
            }
            guard.last_fine_timestamp = Some(bar.timestamp);
        }

        for &tf in Timeframe::COARSE.iter() {
            self.fold_one(symbol, &state, tf, bar);
        }
        Ok(())
    }

    fn fold_one(&self, symbol: &str, state: &Arc<Mutex<PairState>>, tf: Timeframe, bar: Bar) {
        let tf_start = tf.floor(bar.timestamp);

        let completed = {
            let mut guard = state.lock();
            match guard.active.get(&tf).copied() {
                None => {
                    guard.active.insert(tf, Accumulator::init(tf_start, bar));
                    None
                }
                Some(acc) if acc.start == tf_start => {
                    let entry = guard.active.get_mut(&tf).expect("active entry checked above");
                    entry.fold(bar);
                    None
                }
                Some(acc) => {
                    guard.active.insert(tf, Accumulator::init(tf_start, bar));
                    Some(acc.complete())
                }
            }
        };

        if let Some(completed_bar) = completed {
            {
                let mut guard = state.lock();
                let ring = guard.completed.entry(tf).or_default();
                ring.push_back(completed_bar);
                while ring.len() > self.ring_capacity {
                    ring.pop_front();
                }
            }
            let callbacks: Vec<Arc<CompleteCallback>> =
                self.subscribers.lock().get(&tf).cloned().unwrap_or_default();
            for cb in callbacks {
                cb(symbol, completed_bar);
            }
        }
    }

    /// Completed-bar ring buffer for (symbol, tf), most recent last.
    pub fn completed_bars(&self, symbol: &str, tf: Timeframe) -> Vec<Bar> {
        let state = self.pair_state(symbol);
        let guard = state.lock();
        guard.completed.get(&tf).map(|r| r.iter().copied().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, c: f64, v: u64) -> Bar {
        Bar { timestamp: ts, open: c, high: c + 0.2, low: c - 0.2, close: c, volume: v }
    }

    #[test]
    fn s1_emits_one_1m_bar_on_boundary_crossing() {
        let agg = BarAggregator::default();
        let emitted = Arc::new(Mutex::new(Vec::<(String, Bar)>::new()));
        let emitted2 = emitted.clone();
        agg.on_complete(Timeframe::M1, move |sym, bar| emitted2.lock().push((sym.to_string(), bar)));

        let closes = [100.0, 101.0, 99.0, 102.0, 103.0, 98.0, 104.0, 100.5, 101.5, 102.5, 99.5, 105.0, 106.0];
        for (i, c) in closes.iter().enumerate() {
            let ts = 9 * 3600 + 30 * 60 + (i as i64) * 5;
            agg.add_fine_bar("TEST", bar(ts, *c, 10)).unwrap();
        }

        let events = emitted.lock();
        assert_eq!(events.len(), 1);
        let (sym, b) = &events[0];
        assert_eq!(sym, "TEST");
        assert_eq!(b.timestamp, 9 * 3600 + 30 * 60);
        assert_eq!(b.open, 100.0);
        assert_eq!(b.close, 105.0);
        assert_eq!(b.volume, 120);
        assert!((b.high - 105.2).abs() < 1e-9);
        assert!((b.low - 97.8).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_fine_bar_is_rejected() {
        let agg = BarAggregator::default();
        agg.add_fine_bar("X", bar(120, 10.0, 1)).unwrap();
        let err = agg.add_fine_bar("X", bar(60, 10.0, 1));
        assert!(matches!(err, Err(EngineError::OutOfOrder { .. })));
    }

    #[test]
    fn invalid_fine_bar_is_rejected() {
        let agg = BarAggregator::default();
        let bad = Bar { timestamp: 60, open: 10.0, high: 9.0, low: 11.0, close: 10.0, volume: 1 };
        let err = agg.add_fine_bar("X", bad);
        assert!(matches!(err, Err(EngineError::InvalidBar { .. })));
    }

    #[test]
    fn idle_period_does_not_emit_synthetic_bars() {
        let agg = BarAggregator::default();
        let emitted = Arc::new(Mutex::new(0usize));
        let emitted2 = emitted.clone();
        agg.on_complete(Timeframe::M1, move |_, _| *emitted2.lock() += 1);

        agg.add_fine_bar("X", bar(0, 10.0, 1)).unwrap();
        // Jump three minutes ahead with no intervening bars.
        agg.add_fine_bar("X", bar(180, 10.0, 1)).unwrap();

        // Only the one boundary crossing actually observed emits.
        assert_eq!(*emitted.lock(), 1);
    }
}
