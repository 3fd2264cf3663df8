//! Screening Pipeline (spec §4.E) — stateless transformations: Universe →
//! Liquidity Filter → Coarse Filter → Score → Top-N Watchlist. Scoring is
//! embarrassingly parallel across symbols and runs on a `rayon` worker pool
//! (spec §5); any per-symbol failure is logged and elided, never aborting
//! the run.

use crate::bar::{Series, Timeframe};
use crate::config::ScreeningConfig;
use crate::indicators;
use crate::store::BarStore;
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct UniverseEntry {
    pub symbol: String,
    pub price: f64,
    pub avg_daily_volume: f64,
    pub market_cap: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredSymbol {
    pub symbol: String,
    pub score: f64,
    pub volume_ratio: f64,
    pub components: ScoreComponents,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreComponents {
    pub bb_position: f64,
    pub stoch_rsi_alignment: f64,
    pub accumulation_intensity: f64,
    pub trend_strength: f64,
    pub macd_divergence: f64,
    pub volume_profile: f64,
}

impl ScoreComponents {
    pub fn total(&self) -> f64 {
        self.bb_position
            + self.stoch_rsi_alignment
            + self.accumulation_intensity
            + self.trend_strength
            + self.macd_divergence
            + self.volume_profile
    }
}

/// Liquidity filter (spec §4.E): price band, minimum average daily volume,
/// minimum market cap.
pub fn passes_liquidity_filter(entry: &UniverseEntry, cfg: &ScreeningConfig) -> bool {
    entry.price >= cfg.price_min
        && entry.price <= cfg.price_max
        && entry.avg_daily_volume >= cfg.avg_daily_volume_min
        && entry.market_cap >= cfg.market_cap_min
}

pub struct Hourly1hSnapshot {
    bb_position: Option<f64>,
    trend_strength: Option<f64>,
    volume_ratio: Option<f64>,
    atr_pct: Option<f64>,
}

fn hourly_snapshot(series: &Series) -> Option<Hourly1hSnapshot> {
    let closes = series.closes();
    if closes.len() < 51 {
        return None;
    }
    let bands = indicators::bollinger_bands(&closes, 20, 2.0);
    let last = closes.len() - 1;
    let bb_position = bands[last].and_then(|b| indicators::bb_position(closes[last], b));

    let sma50 = indicators::sma(&closes, 50);
    let trend_strength = sma50[last].map(|s| (closes[last] - s) / s);

    let volumes: Vec<f64> = series.bars.iter().map(|b| b.volume as f64).collect();
    let avg_vol20 = indicators::sma(&volumes, 20);
    let volume_ratio = avg_vol20[last].filter(|v| *v > 0.0).map(|avg| volumes[last] / avg);

    let highs: Vec<f64> = series.bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = series.bars.iter().map(|b| b.low).collect();
    let atr14 = indicators::atr(&highs, &lows, &closes, 14);
    let atr_pct = atr14[last].map(|a| a / closes[last]);

    Some(Hourly1hSnapshot { bb_position, trend_strength, volume_ratio, atr_pct })
}

/// Coarse filter (spec §4.E), evaluated on the 1h series.
pub fn passes_coarse_filter(snapshot: &Hourly1hSnapshot, cfg: &ScreeningConfig) -> bool {
    let bb_ok = snapshot.bb_position.is_some_and(|p| p >= cfg.bb_position_lo && p <= cfg.bb_position_hi);
    let trend_ok = snapshot.trend_strength.is_some_and(|t| t >= cfg.trend_strength_min);
    let volume_ok = snapshot.volume_ratio.is_some_and(|v| v >= cfg.volume_ratio_min);
    let atr_ok = snapshot.atr_pct.is_some_and(|a| a >= cfg.atr_pct_lo && a <= cfg.atr_pct_hi);
    bb_ok && trend_ok && volume_ok && atr_ok
}

/// Six-component, 0-100 multi-timeframe score (spec §4.E table). Each
/// component is independently capped as specified.
pub fn score_symbol(series_15m: &Series, series_1h: &Series, series_4h: &Series) -> Option<ScoreComponents> {
    let mut comp = ScoreComponents::default();

    // Component 1: BB position on 15m, cap 15.
    let closes_15m = series_15m.closes();
    if closes_15m.len() >= 20 {
        let bands = indicators::bollinger_bands(&closes_15m, 20, 2.0);
        let last = closes_15m.len() - 1;
        if let Some(pos) = bands[last].and_then(|b| indicators::bb_position(closes_15m[last], b)) {
            comp.bb_position = ((1.0 - pos) * 15.0).clamp(0.0, 15.0);
        }
    }

    // Component 2 & 3: Stoch/RSI alignment and accumulation intensity on 15m, caps 20 / 18.
    if closes_15m.len() >= 65 {
        let (stoch_k, _) = indicators::stoch_rsi(&closes_15m, 14, 3, 3);
        let rsi_values = indicators::rsi(&closes_15m, 14);
        let last = closes_15m.len() - 1;
        let k_oversold = stoch_k[last].is_some_and(|k| k < 20.0);
        let rsi_oversold = rsi_values[last].is_some_and(|r| r < 30.0);
        comp.stoch_rsi_alignment = match (k_oversold, rsi_oversold) {
            (true, true) => 20.0,
            (true, false) | (false, true) => 10.0,
            (false, false) => 0.0,
        };

        let window_start = closes_15m.len().saturating_sub(50);
        let k_window = &stoch_k[window_start..];
        let rsi_window = &rsi_values[window_start..];

        let k_events = k_window.iter().filter(|v| v.is_some_and(|x| x < 20.0)).count();
        let mut recoveries = 0usize;
        for i in 1..rsi_window.len() {
            if let (Some(prev), Some(cur)) = (rsi_window[i - 1], rsi_window[i]) {
                if prev < 30.0 && cur >= 30.0 {
                    recoveries += 1;
                }
            }
        }
        // Denominator uses max(1, recoveries) per spec §4.E; this biases
        // the score upward for symbols with zero recoveries (spec §9 Open
        // Question 3) — kept as specified, not altered.
        let ratio = k_events as f64 / recoveries.max(1) as f64;
        comp.accumulation_intensity = if ratio >= 3.0 {
            18.0
        } else if ratio >= 2.0 {
            14.0
        } else if ratio >= 1.5 {
            10.0
        } else if ratio >= 1.2 {
            6.0
        } else {
            0.0
        };
    }

    // Component 4: trend strength on 4h, cap 17.
    let closes_4h = series_4h.closes();
    if closes_4h.len() >= 50 {
        let sma50 = indicators::sma(&closes_4h, 50);
        let last = closes_4h.len() - 1;
        if let Some(s) = sma50[last] {
            let trend_strength = (closes_4h[last] - s) / s;
            comp.trend_strength = (trend_strength * 100.0).clamp(0.0, 17.0);
        }
    }

    // Component 5: MACD divergence on 1h, cap 15.
    let closes_1h = series_1h.closes();
    if closes_1h.len() >= 40 {
        let macd_values = indicators::macd(&closes_1h, 12, 26, 9);
        let last = closes_1h.len() - 1;
        if last >= 5 {
            let price_declining = closes_1h[last] < closes_1h[last - 5];
            let macd_rising = match (macd_values[last], macd_values[last - 5]) {
                (Some(now), Some(prev)) => now.macd > prev.macd,
                _ => false,
            };
            comp.macd_divergence = if price_declining && macd_rising { 15.0 } else { 0.0 };
        }
    }

    // Component 6: volume profile, cap 15, from the 1h series.
    if closes_1h.len() >= 21 {
        let volumes: Vec<f64> = series_1h.bars.iter().map(|b| b.volume as f64).collect();
        let avg20 = indicators::sma(&volumes, 20);
        let last = volumes.len() - 1;
        if let Some(avg) = avg20[last].filter(|v| *v > 0.0) {
            let ratio = volumes[last] / avg;
            comp.volume_profile = ((ratio - 1.0) * 30.0).clamp(0.0, 15.0);
        }
    }

    Some(comp)
}

/// Runs the full pipeline for `universe`, reading series from `store`.
/// Returns the top-N watchlist (spec §4.E): qualifying score ≥ `score_min`,
/// ranked by score descending, ties broken by volume_ratio descending then
/// symbol ascending (spec §9 Open Question 4 — this is the tie-break this
/// implementation commits to).
pub fn run_pipeline(universe: &[UniverseEntry], store: &BarStore, cfg: &ScreeningConfig, pool: &ThreadPool) -> Vec<ScoredSymbol> {
    let candidates: Vec<&UniverseEntry> = universe.iter().filter(|e| passes_liquidity_filter(e, cfg)).collect();

    let scored: Vec<ScoredSymbol> = pool.install(|| {
        candidates
            .par_iter()
            .filter_map(|entry| score_one(entry, store, cfg))
            .collect()
    });

    let mut qualifying: Vec<ScoredSymbol> = scored.into_iter().filter(|s| s.score >= cfg.score_min).collect();
    qualifying.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.volume_ratio.partial_cmp(&a.volume_ratio).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    qualifying.truncate(cfg.watchlist_size);
    qualifying
}

fn score_one(entry: &UniverseEntry, store: &BarStore, cfg: &ScreeningConfig) -> Option<ScoredSymbol> {
    let series_1h = match store.load(&entry.symbol, Timeframe::H1, None, None) {
        Ok(s) => s,
        Err(e) => {
            warn!(symbol = %entry.symbol, error = %e, "screening: 1h load failed, skipping symbol");
            return None;
        }
    };

    let snapshot = hourly_snapshot(&series_1h)?;
    if !passes_coarse_filter(&snapshot, cfg) {
        return None;
    }

    let series_15m = store.load(&entry.symbol, Timeframe::M15, None, None).ok()?;
    let series_4h = store.load(&entry.symbol, Timeframe::H4, None, None).ok()?;
    let components = score_symbol(&series_15m, &series_1h, &series_4h)?;

    Some(ScoredSymbol {
        symbol: entry.symbol.clone(),
        score: components.total(),
        volume_ratio: snapshot.volume_ratio.unwrap_or(0.0),
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_filter_rejects_below_min_price() {
        let cfg = ScreeningConfig::default();
        let entry = UniverseEntry { symbol: "X".into(), price: 0.5, avg_daily_volume: 1_000_000.0, market_cap: 1_000_000.0 };
        assert!(!passes_liquidity_filter(&entry, &cfg));
    }

    #[test]
    fn score_components_are_each_capped() {
        let closes: Vec<f64> = (0..100).map(|i| 100.0 - i as f64 * 0.2 + (i as f64 * 0.3).sin()).collect();
        let bars: Vec<crate::bar::Bar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| crate::bar::Bar { timestamp: (i as i64) * 900, open: c, high: c + 0.3, low: c - 0.3, close: c, volume: 1000 + i as u64 })
            .collect();
        let series = Series { bars };
        let comp = score_symbol(&series, &series, &series).unwrap();
        assert!(comp.bb_position <= 15.0);
        assert!(comp.stoch_rsi_alignment <= 20.0);
        assert!(comp.accumulation_intensity <= 18.0);
        assert!(comp.trend_strength <= 17.0);
        assert!(comp.macd_divergence <= 15.0);
        assert!(comp.volume_profile <= 15.0);
    }

    #[test]
    fn watchlist_is_deterministic_given_identical_inputs() {
        let cfg = ScreeningConfig::default();
        let universe = vec![
            UniverseEntry { symbol: "A".into(), price: 10.0, avg_daily_volume: 5_000_000.0, market_cap: 1_000_000_000.0 },
        ];
        let dir = tempfile::tempdir().unwrap();
        let store = BarStore::open(dir.path()).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let r1 = run_pipeline(&universe, &store, &cfg, &pool);
        let r2 = run_pipeline(&universe, &store, &cfg, &pool);
        assert_eq!(r1.len(), r2.len());
    }
}
