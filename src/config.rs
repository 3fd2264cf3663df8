//! Configuration surface (spec §6), loaded once at process start the way
//! the teacher's `models::Config::from_env` does: `dotenv().ok()` then
//! `env::var(..).unwrap_or_else(..).parse().unwrap_or(default)` per field.
//! Session-level settings require a process restart to take effect;
//! screening thresholds are re-read between pipeline runs (`ScreeningConfig`
//! is reconstructed fresh each run rather than cached).

use std::env;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_period_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub throttle_spacing_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_secs: 30,
            reconnect_attempts: 5,
            reconnect_delay_ms: 2_000,
            throttle_spacing_ms: 500,
            request_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = env::var("SESSION_HEARTBEAT_PERIOD_SECS") {
            c.heartbeat_period_secs = v.parse().unwrap_or(c.heartbeat_period_secs);
        }
        if let Ok(v) = env::var("SESSION_RECONNECT_ATTEMPTS") {
            c.reconnect_attempts = v.parse().unwrap_or(c.reconnect_attempts);
        }
        if let Ok(v) = env::var("SESSION_RECONNECT_DELAY_MS") {
            c.reconnect_delay_ms = v.parse().unwrap_or(c.reconnect_delay_ms);
        }
        if let Ok(v) = env::var("SESSION_THROTTLE_SPACING_MS") {
            c.throttle_spacing_ms = v.parse().unwrap_or(c.throttle_spacing_ms);
        }
        if let Ok(v) = env::var("SESSION_REQUEST_TIMEOUT_MS") {
            c.request_timeout_ms = v.parse().unwrap_or(c.request_timeout_ms);
        }
        c
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub max_risk_per_trade: f64,
    pub max_portfolio_risk: f64,
    pub max_open_positions: usize,
    pub min_stop_distance_pct: f64,
    pub max_stop_distance_pct: f64,
    pub trailing_distance_pct: f64,
    pub trailing_check_period_secs: u64,
    pub allow_execution: bool,
    pub require_paper_mode: bool,
    pub symbol_whitelist: Option<Vec<String>>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 0.01,
            max_portfolio_risk: 0.03,
            max_open_positions: 10,
            min_stop_distance_pct: 0.005,
            max_stop_distance_pct: 0.10,
            trailing_distance_pct: 0.02,
            trailing_check_period_secs: 60,
            allow_execution: true,
            require_paper_mode: false,
            symbol_whitelist: None,
        }
    }
}

impl ExecutionConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = env::var("EXEC_MAX_RISK_PER_TRADE") {
            c.max_risk_per_trade = v.parse().unwrap_or(c.max_risk_per_trade);
        }
        if let Ok(v) = env::var("EXEC_MAX_PORTFOLIO_RISK") {
            c.max_portfolio_risk = v.parse().unwrap_or(c.max_portfolio_risk);
        }
        if let Ok(v) = env::var("EXEC_MAX_OPEN_POSITIONS") {
            c.max_open_positions = v.parse().unwrap_or(c.max_open_positions);
        }
        if let Ok(v) = env::var("EXEC_MIN_STOP_DISTANCE_PCT") {
            c.min_stop_distance_pct = v.parse().unwrap_or(c.min_stop_distance_pct);
        }
        if let Ok(v) = env::var("EXEC_MAX_STOP_DISTANCE_PCT") {
            c.max_stop_distance_pct = v.parse().unwrap_or(c.max_stop_distance_pct);
        }
        if let Ok(v) = env::var("EXEC_TRAILING_DISTANCE_PCT") {
            c.trailing_distance_pct = v.parse().unwrap_or(c.trailing_distance_pct);
        }
        if let Ok(v) = env::var("EXEC_TRAILING_CHECK_PERIOD_SECS") {
            c.trailing_check_period_secs = v.parse().unwrap_or(c.trailing_check_period_secs);
        }
        if let Ok(v) = env::var("EXEC_ALLOW_EXECUTION") {
            c.allow_execution = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
        if let Ok(v) = env::var("EXEC_REQUIRE_PAPER_MODE") {
            c.require_paper_mode = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
        if let Ok(v) = env::var("EXEC_SYMBOL_WHITELIST") {
            let list: Vec<String> = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            if !list.is_empty() {
                c.symbol_whitelist = Some(list);
            }
        }
        c
    }
}

#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    pub price_min: f64,
    pub price_max: f64,
    pub avg_daily_volume_min: f64,
    pub market_cap_min: f64,
    pub bb_position_lo: f64,
    pub bb_position_hi: f64,
    pub trend_strength_min: f64,
    pub volume_ratio_min: f64,
    pub atr_pct_lo: f64,
    pub atr_pct_hi: f64,
    pub score_min: f64,
    pub watchlist_size: usize,
    pub worker_count: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            price_min: 1.0,
            price_max: 10_000.0,
            avg_daily_volume_min: 0.0,
            market_cap_min: 0.0,
            bb_position_lo: 0.0,
            bb_position_hi: 0.3,
            trend_strength_min: 0.02,
            volume_ratio_min: 1.2,
            atr_pct_lo: 0.01,
            atr_pct_hi: 0.10,
            score_min: 60.0,
            watchlist_size: 20,
            worker_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
        }
    }
}

impl ScreeningConfig {
    /// Re-read from the environment. Intended to be called fresh between
    /// pipeline runs (spec §6: "screening thresholds may be re-read between
    /// runs"), unlike `SessionConfig`/`ExecutionConfig` which are loaded
    /// once at startup.
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = env::var("SCREEN_PRICE_MIN") {
            c.price_min = v.parse().unwrap_or(c.price_min);
        }
        if let Ok(v) = env::var("SCREEN_PRICE_MAX") {
            c.price_max = v.parse().unwrap_or(c.price_max);
        }
        if let Ok(v) = env::var("SCREEN_AVG_DAILY_VOLUME_MIN") {
            c.avg_daily_volume_min = v.parse().unwrap_or(c.avg_daily_volume_min);
        }
        if let Ok(v) = env::var("SCREEN_MARKET_CAP_MIN") {
            c.market_cap_min = v.parse().unwrap_or(c.market_cap_min);
        }
        if let Ok(v) = env::var("SCREEN_BB_POSITION_LO") {
            c.bb_position_lo = v.parse().unwrap_or(c.bb_position_lo);
        }
        if let Ok(v) = env::var("SCREEN_BB_POSITION_HI") {
            c.bb_position_hi = v.parse().unwrap_or(c.bb_position_hi);
        }
        if let Ok(v) = env::var("SCREEN_TREND_STRENGTH_MIN") {
            c.trend_strength_min = v.parse().unwrap_or(c.trend_strength_min);
        }
        if let Ok(v) = env::var("SCREEN_VOLUME_RATIO_MIN") {
            c.volume_ratio_min = v.parse().unwrap_or(c.volume_ratio_min);
        }
        if let Ok(v) = env::var("SCREEN_ATR_PCT_LO") {
            c.atr_pct_lo = v.parse().unwrap_or(c.atr_pct_lo);
        }
        if let Ok(v) = env::var("SCREEN_ATR_PCT_HI") {
            c.atr_pct_hi = v.parse().unwrap_or(c.atr_pct_hi);
        }
        if let Ok(v) = env::var("SCREEN_SCORE_MIN") {
            c.score_min = v.parse().unwrap_or(c.score_min);
        }
        if let Ok(v) = env::var("SCREEN_WATCHLIST_SIZE") {
            c.watchlist_size = v.parse().unwrap_or(c.watchlist_size);
        }
        if let Ok(v) = env::var("SCREEN_WORKER_COUNT") {
            c.worker_count = v.parse().unwrap_or(c.worker_count);
        }
        c
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    pub trade_journal_path: String,
    pub session: SessionConfig,
    pub execution: ExecutionConfig,
    pub screening: ScreeningConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let trade_journal_path =
            env::var("TRADE_JOURNAL_PATH").unwrap_or_else(|_| "./data/trade_journal.db".to_string());

        Ok(Self {
            data_dir,
            trade_journal_path,
            session: SessionConfig::from_env(),
            execution: ExecutionConfig::from_env(),
            screening: ScreeningConfig::from_env(),
        })
    }
}
