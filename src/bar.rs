//! Core data model (spec §3): `Bar`, `Timeframe`, `Series`.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tagged timeframe enum (spec §3). Each carries a period length in seconds
/// and a boundary predicate derived from it — never from wall-clock "now"
/// (spec §9's boundary-detection design note).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Timeframe {
    S5,
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    /// Period length in seconds.
    pub const fn period_secs(self) -> i64 {
        match self {
            Timeframe::S5 => 5,
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    /// Coarser timeframes the aggregator folds 5s bars into.
    pub const COARSE: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// `true` iff `ts` (exchange-time unix seconds) sits on a period boundary.
    pub const fn is_boundary(self, ts: i64) -> bool {
        ts.rem_euclid(self.period_secs()) == 0
    }

    /// Floor `ts` to the start of the period it belongs to.
    pub const fn floor(self, ts: i64) -> i64 {
        let p = self.period_secs();
        ts - ts.rem_euclid(p)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Timeframe::S5 => "5s",
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable OHLCV record. `timestamp` is the period-start, UTC, aligned to
/// the owning timeframe (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Validate the OHLC invariant `low <= {open, close} <= high` and that
    /// all prices are positive and finite.
    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("{name} must be positive and finite, got {v}"));
            }
        }
        if self.low > self.open || self.open > self.high {
            return Err(format!(
                "open {} out of [low {}, high {}]",
                self.open, self.low, self.high
            ));
        }
        if self.low > self.close || self.close > self.high {
            return Err(format!(
                "close {} out of [low {}, high {}]",
                self.close, self.low, self.high
            ));
        }
        Ok(())
    }

    /// Validate alignment to `tf`'s boundary, in addition to OHLC invariants.
    pub fn validate_aligned(&self, tf: Timeframe) -> Result<(), String> {
        self.validate()?;
        if !tf.is_boundary(self.timestamp) {
            return Err(format!(
                "timestamp {} is not aligned to {} boundary",
                self.timestamp, tf
            ));
        }
        Ok(())
    }
}

/// Ordered sequence of bars for one (symbol, timeframe). Invariants:
/// strictly increasing timestamps, every timestamp a boundary for `tf`, no
/// duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Series {
    pub bars: Vec<Bar>,
}

impl Series {
    pub fn new() -> Self {
        Self { bars: Vec::new() }
    }

    pub fn validate(&self, symbol: &str, tf: Timeframe) -> EngineResult<()> {
        let mut last: Option<i64> = None;
        for bar in &self.bars {
            bar.validate_aligned(tf).map_err(|reason| EngineError::DataIntegrity {
                symbol: symbol.to_string(),
                timeframe: tf.to_string(),
                reason,
            })?;
            if let Some(prev) = last {
                if bar.timestamp <= prev {
                    return Err(EngineError::DataIntegrity {
                        symbol: symbol.to_string(),
                        timeframe: tf.to_string(),
                        reason: format!(
                            "timestamps not strictly increasing: {prev} then {}",
                            bar.timestamp
                        ),
                    });
                }
            }
            last = Some(bar.timestamp);
        }
        Ok(())
    }

    /// Merge `incoming` into this series. Duplicates (same timestamp) are
    /// resolved last-writer-wins on identical content; mismatched
    /// duplicates fail with `DataIntegrity` (spec §4.A).
    pub fn merge(
        &mut self,
        symbol: &str,
        tf: Timeframe,
        incoming: Vec<Bar>,
    ) -> EngineResult<()> {
        use std::collections::BTreeMap;
        let mut by_ts: BTreeMap<i64, Bar> =
            self.bars.iter().map(|b| (b.timestamp, *b)).collect();

        for bar in incoming {
            bar.validate_aligned(tf).map_err(|reason| EngineError::DataIntegrity {
                symbol: symbol.to_string(),
                timeframe: tf.to_string(),
                reason,
            })?;
            match by_ts.get(&bar.timestamp) {
                Some(existing) if *existing != bar => {
                    return Err(EngineError::DataIntegrity {
                        symbol: symbol.to_string(),
                        timeframe: tf.to_string(),
                        reason: format!(
                            "conflicting duplicate bar at timestamp {}",
                            bar.timestamp
                        ),
                    });
                }
                _ => {
                    by_ts.insert(bar.timestamp, bar);
                }
            }
        }

        let merged: Vec<Bar> = by_ts.into_values().collect();
        self.bars = merged;
        self.validate(symbol, tf)
    }

    /// Subsequence intersecting `[start, end]` (inclusive), or the whole
    /// series when bounds are `None`.
    pub fn slice(&self, start: Option<i64>, end: Option<i64>) -> Series {
        let bars = self
            .bars
            .iter()
            .copied()
            .filter(|b| start.is_none_or(|s| b.timestamp >= s) && end.is_none_or(|e| b.timestamp <= e))
            .collect();
        Series { bars }
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64, v: u64) -> Bar {
        Bar { timestamp: ts, open: o, high: h, low: l, close: c, volume: v }
    }

    #[test]
    fn boundary_floor_is_idempotent() {
        assert_eq!(Timeframe::M1.floor(125), 120);
        assert!(Timeframe::M1.is_boundary(Timeframe::M1.floor(125)));
    }

    #[test]
    fn merge_rejects_conflicting_duplicate() {
        let mut s = Series::new();
        s.merge("BTC", Timeframe::M1, vec![bar(60, 1.0, 2.0, 1.0, 1.5, 10)]).unwrap();
        let err = s.merge("BTC", Timeframe::M1, vec![bar(60, 1.0, 2.0, 1.0, 1.9, 10)]);
        assert!(matches!(err, Err(EngineError::DataIntegrity { .. })));
    }

    #[test]
    fn merge_is_last_writer_wins_on_identical_content() {
        let mut s = Series::new();
        let b = bar(60, 1.0, 2.0, 1.0, 1.5, 10);
        s.merge("BTC", Timeframe::M1, vec![b]).unwrap();
        s.merge("BTC", Timeframe::M1, vec![b]).unwrap();
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn ohlc_invariant_rejects_open_outside_range() {
        let b = bar(60, 3.0, 2.0, 1.0, 1.5, 10);
        assert!(b.validate().is_err());
    }
}
