//! Indicator Engine (spec §4.D) — pure, reentrant functions over a closes
//! series. Undefined regions (insufficient history) yield `None` rather
//! than polluting downstream math with NaN.

/// Simple moving average of the last `n` closes ending at each index.
pub fn sma(closes: &[f64], n: usize) -> Vec<Option<f64>> {
    if n == 0 {
        return vec![None; closes.len()];
    }
    let mut out = Vec::with_capacity(closes.len());
    let mut sum = 0.0;
    for (i, &c) in closes.iter().enumerate() {
        sum += c;
        if i >= n {
            sum -= closes[i - n];
        }
        out.push(if i + 1 >= n { Some(sum / n as f64) } else { None });
    }
    out
}

/// Exponential moving average, seeded by `SMA(n)` at index `n - 1`
/// (spec §4.D).
pub fn ema(closes: &[f64], n: usize) -> Vec<Option<f64>> {
    if n == 0 || closes.len() < n {
        return vec![None; closes.len()];
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let mut out = vec![None; closes.len()];
    let seed = closes[..n].iter().sum::<f64>() / n as f64;
    out[n - 1] = Some(seed);
    let mut prev = seed;
    for i in n..closes.len() {
        let v = alpha * closes[i] + (1.0 - alpha) * prev;
        out[i] = Some(v);
        prev = v;
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct Bands {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Bollinger Bands: middle = SMA(n), upper/lower = middle ± k·stddev.
pub fn bollinger_bands(closes: &[f64], n: usize, k: f64) -> Vec<Option<Bands>> {
    use statrs::statistics::Statistics;
    let middles = sma(closes, n);
    let mut out = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        match middles[i] {
            Some(mid) if i + 1 >= n => {
                let window = &closes[i + 1 - n..=i];
                let stddev = window.to_vec().population_std_dev();
                out.push(Some(Bands { middle: mid, upper: mid + k * stddev, lower: mid - k * stddev }));
            }
            _ => out.push(None),
        }
    }
    out
}

/// Bollinger-band position of `close` within `[lower, upper]`, i.e.
/// `(close - lower) / (upper - lower)`. `None` when the band has zero
/// width (flat series).
pub fn bb_position(close: f64, bands: Bands) -> Option<f64> {
    let width = bands.upper - bands.lower;
    if width.abs() < f64::EPSILON {
        None
    } else {
        Some((close - bands.lower) / width)
    }
}

/// Wilder-smoothed RSI(n), clamped to [0, 100].
pub fn rsi(closes: &[f64], n: usize) -> Vec<Option<f64>> {
    if closes.len() <= n || n == 0 {
        return vec![None; closes.len()];
    }
    let mut out = vec![None; closes.len()];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=n {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / n as f64;
    let mut avg_loss = losses / n as f64;
    out[n] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in (n + 1)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (n - 1) as f64 + gain) / n as f64;
        avg_loss = (avg_loss * (n - 1) as f64 + loss) / n as f64;
        out[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss.abs() < f64::EPSILON {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    (100.0 - (100.0 / (1.0 + rs))).clamp(0.0, 100.0)
}

/// Stochastic RSI: `%K` is the smoothed min-max position of RSI within the
/// last `n` RSI values scaled to [0, 100] (clamped); `%D = SMA(%K, d)`.
pub fn stoch_rsi(closes: &[f64], n: usize, k_smoothing: usize, d: usize) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let rsi_values = rsi(closes, n);
    let mut raw_k = vec![None; closes.len()];
    for i in 0..closes.len() {
        if i + 1 < n {
            continue;
        }
        let window: Vec<f64> = (i + 1 - n..=i).filter_map(|j| rsi_values[j]).collect();
        if window.len() < n {
            continue;
        }
        let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        let current = match rsi_values[i] {
            Some(v) => v,
            None => continue,
        };
        let k = if range.abs() < f64::EPSILON { 0.0 } else { (current - min) / range * 100.0 };
        raw_k[i] = Some(k.clamp(0.0, 100.0));
    }

    let smoothed_k = sma_option(&raw_k, k_smoothing);
    let d_values = sma_option(&smoothed_k, d);
    (smoothed_k, d_values)
}

fn sma_option(values: &[Option<f64>], n: usize) -> Vec<Option<f64>> {
    if n == 0 {
        return values.to_vec();
    }
    let mut out = vec![None; values.len()];
    for i in 0..values.len() {
        if i + 1 < n {
            continue;
        }
        let window: Vec<f64> = (i + 1 - n..=i).filter_map(|j| values[j]).collect();
        if window.len() == n {
            out[i] = Some(window.iter().sum::<f64>() / n as f64);
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(f, s, sig) = EMA(f) − EMA(s); signal = EMA(sig) of MACD; histogram
/// = MACD − signal.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_n: usize) -> Vec<Option<Macd>> {
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);
    let macd_line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let first_valid = macd_line.iter().position(Option::is_some);
    let mut signal_line = vec![None; closes.len()];
    if let Some(start) = first_valid {
        // Once both EMAs are defined they stay defined for every later
        // index, so macd_line is Some for the whole [start..] tail.
        let compact: Vec<f64> = macd_line[start..].iter().map(|v| v.expect("macd_line defined past first_valid")).collect();
        let compact_signal = ema(&compact, signal_n);
        for (i, v) in compact_signal.into_iter().enumerate() {
            signal_line[start + i] = v;
        }
    }

    macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| match (m, s) {
            (Some(m), Some(s)) => Some(Macd { macd: *m, signal: *s, histogram: m - s }),
            _ => None,
        })
        .collect()
}

/// Wilder-smoothed ATR(n) over true range, requiring `high`/`low`/`close`
/// series aligned with `closes`.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], n: usize) -> Vec<Option<f64>> {
    let len = closes.len();
    if len == 0 || n == 0 || len <= n {
        return vec![None; len];
    }
    let mut tr = vec![0.0; len];
    tr[0] = highs[0] - lows[0];
    for i in 1..len {
        let a = highs[i] - lows[i];
        let b = (highs[i] - closes[i - 1]).abs();
        let c = (lows[i] - closes[i - 1]).abs();
        tr[i] = a.max(b).max(c);
    }

    let mut out = vec![None; len];
    let mut avg = tr[1..=n].iter().sum::<f64>() / n as f64;
    out[n] = Some(avg);
    for i in (n + 1)..len {
        avg = (avg * (n - 1) as f64 + tr[i]) / n as f64;
        out[i] = Some(avg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_undefined_until_window_full() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0];
        let out = sma(&closes, 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!((out[2].unwrap() - 2.0).abs() < 1e-9);
        assert!((out[4].unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn ema_seeds_from_sma_at_index_n_minus_1() {
        let closes = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = ema(&closes, 3);
        assert_eq!(out[0], None);
        assert!((out[2].unwrap() - 2.0).abs() < 1e-9);
        assert!(out[3].is_some());
    }

    #[test]
    fn rsi_is_bounded() {
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.37).sin() * 5.0).collect();
        let out = rsi(&closes, 14);
        for v in out.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn stoch_rsi_k_and_d_bounded() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.2).cos() * 3.0).collect();
        let (k, d) = stoch_rsi(&closes, 14, 3, 3);
        for v in k.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
        for v in d.into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn atr_non_negative() {
        let highs = [10.0, 11.0, 10.5, 12.0, 11.5, 13.0, 12.5, 14.0, 13.5, 15.0, 14.5, 16.0, 15.5, 17.0, 16.5];
        let lows: Vec<f64> = highs.iter().map(|h| h - 1.0).collect();
        let closes: Vec<f64> = highs.iter().map(|h| h - 0.5).collect();
        let out = atr(&highs, &lows, &closes, 5);
        for v in out.into_iter().flatten() {
            assert!(v >= 0.0);
        }
    }
}
