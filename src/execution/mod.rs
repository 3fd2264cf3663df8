//! Risk-Validating Execution Gate (spec §4.F) — the sole authority for
//! opening, tracking, and closing positions. All order flow passes through
//! `admit`; the position-tracking and trailing-stop loops subscribe to the
//! Aggregator and a timer respectively.
//!
//! Grounded in the teacher's `risk.rs` guardrail style (hard-capped
//! fractions of equity, explicit rejection reasons returned as values
//! rather than thrown) and `vault/trade_executor.rs`'s placement/rollback
//! flow.

pub mod journal;

use crate::bar::Bar;
use crate::config::ExecutionConfig;
use crate::error::{EngineError, EngineResult};
use crate::session::gateway::{BracketOrder, OrderSide};
use crate::session::SessionManager;
use journal::{JournalEvent, TradeJournal};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stop,
    Target,
    Manual,
    TrailingStop,
}

/// Owned exclusively by the Execution Gate; exposed read-only elsewhere
/// (spec §3).
#[derive(Debug, Clone)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub entry_price: f64,
    pub entry_time: i64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub mae: f64,
    pub mfe: f64,
    pub status: PositionStatus,
    pub risk_dollars: f64,
    /// Broker stop-order id, attached once `place_order` acknowledges
    /// (admission itself never touches the broker). `None` until then;
    /// the trailing loop skips positions whose order is not yet placed.
    pub stop_order_id: Option<String>,
}

impl Position {
    fn mark(&mut self, price: f64) {
        self.current_price = price;
        let signed = match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        };
        self.unrealized_pnl = signed * self.quantity as f64;
        self.mae = self.mae.min(self.unrealized_pnl);
        self.mfe = self.mfe.max(self.unrealized_pnl);
    }
}

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub entry_price: f64,
    pub entry_time: i64,
    pub exit_price: f64,
    pub exit_time: i64,
    pub exit_reason: ExitReason,
    pub realized_pnl: f64,
    pub commission: f64,
    pub hold_time_secs: i64,
    pub mae: f64,
    pub mfe: f64,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    Disabled,
    LiveNotAllowed,
    NotWhitelisted,
    StopDirection,
    StopDistance,
    SizeZero,
    PortfolioRisk,
    PositionCountLimit,
}

#[derive(Debug, Clone)]
pub enum Admission {
    Accept { position_id: u64, size: u64, risk_dollars: f64 },
    Reject { reason: RejectKind },
}

/// The parameters of a single admission request (spec §4.F).
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
    pub account_equity: f64,
    pub is_live_account: bool,
    pub entry_time: i64,
}

struct GateState {
    positions: HashMap<u64, Position>,
    next_id: u64,
    portfolio_risk_dollars: f64,
}

impl GateState {
    fn new() -> Self {
        Self { positions: HashMap::new(), next_id: 1, portfolio_risk_dollars: 0.0 }
    }
}

/// Admission, position tracking, and trailing-stop adjustment behind a
/// single mutual-exclusion region (spec §5): writers take the write lock,
/// read-only snapshots (`open_positions`) take the reader lock.
pub struct ExecutionGate {
    config: ExecutionConfig,
    state: RwLock<GateState>,
    journal: Arc<TradeJournal>,
}

impl ExecutionGate {
    pub fn new(config: ExecutionConfig, journal: Arc<TradeJournal>) -> Self {
        Self { config, state: RwLock::new(GateState::new()), journal }
    }

    /// Journals a rejection with its reason (spec §7: "each rejected
    /// admission is recorded with reason") and returns it as the
    /// `Admission` value callers see.
    fn reject(&self, symbol: &str, reason: RejectKind) -> Admission {
        if let Err(err) = self.journal.record_event(
            chrono::Utc::now().timestamp(),
            JournalEvent::AdmissionRejected { symbol: symbol.to_string(), reason },
        ) {
            warn!(%err, "failed to journal admission rejection");
        }
        Admission::Reject { reason }
    }

    /// The admission algorithm, spec §4.F steps 1-7. Never throws; the first
    /// applicable rejection reason is returned as a value.
    pub fn admit(&self, signal: Signal) -> Admission {
        if !self.config.allow_execution {
            return self.reject(&signal.symbol, RejectKind::Disabled);
        }
        if self.config.require_paper_mode && signal.is_live_account {
            return self.reject(&signal.symbol, RejectKind::LiveNotAllowed);
        }
        if let Some(whitelist) = &self.config.symbol_whitelist {
            if !whitelist.iter().any(|s| s == &signal.symbol) {
                return self.reject(&signal.symbol, RejectKind::NotWhitelisted);
            }
        }

        let stop_direction_ok = match signal.side {
            Side::Long => signal.stop_price < signal.entry_price,
            Side::Short => signal.stop_price > signal.entry_price,
        };
        if !stop_direction_ok {
            return self.reject(&signal.symbol, RejectKind::StopDirection);
        }

        let distance_pct = (signal.entry_price - signal.stop_price).abs() / signal.entry_price;
        if distance_pct < self.config.min_stop_distance_pct || distance_pct > self.config.max_stop_distance_pct {
            return self.reject(&signal.symbol, RejectKind::StopDistance);
        }

        let risk_per_share = (signal.entry_price - signal.stop_price).abs();
        let risk_budget = signal.account_equity * self.config.max_risk_per_trade;
        let size = (risk_budget / risk_per_share).floor() as i64;
        if size < 1 {
            return self.reject(&signal.symbol, RejectKind::SizeZero);
        }
        let size = size as u64;
        let risk_dollars = size as f64 * risk_per_share;

        let mut state = self.state.write();

        let portfolio_cap = signal.account_equity * self.config.max_portfolio_risk;
        if state.portfolio_risk_dollars + risk_dollars > portfolio_cap {
            drop(state);
            return self.reject(&signal.symbol, RejectKind::PortfolioRisk);
        }

        if state.positions.len() >= self.config.max_open_positions {
            drop(state);
            return self.reject(&signal.symbol, RejectKind::PositionCountLimit);
        }

        let id = state.next_id;
        state.next_id += 1;
        let position = Position {
            id,
            symbol: signal.symbol.clone(),
            side: signal.side,
            quantity: size,
            entry_price: signal.entry_price,
            entry_time: signal.entry_time,
            stop_price: signal.stop_price,
            target_price: signal.target_price,
            current_price: signal.entry_price,
            unrealized_pnl: 0.0,
            mae: 0.0,
            mfe: 0.0,
            status: PositionStatus::Open,
            risk_dollars,
            stop_order_id: None,
        };
        state.positions.insert(id, position);
        state.portfolio_risk_dollars += risk_dollars;

        info!(symbol = %signal.symbol, size, risk_dollars, "position admitted");
        Admission::Accept { position_id: id, size, risk_dollars }
    }

    /// Attaches the broker's stop-order id once placement is acknowledged,
    /// so the trailing loop has something to call `modify_stop` against.
    pub fn attach_order_id(&self, position_id: u64, order_id: String) {
        let mut state = self.state.write();
        if let Some(position) = state.positions.get_mut(&position_id) {
            position.stop_order_id = Some(order_id);
        }
    }

    /// Rolls back a Position whose placement the broker rejected (spec
    /// §4.F failure semantics: `OrderRejected` at placement time rolls back
    /// the Position and surfaces `PlacementFailed`).
    pub fn rollback_placement(&self, position_id: u64, reason: &str) -> EngineResult<()> {
        let mut state = self.state.write();
        match state.positions.remove(&position_id) {
            Some(position) => {
                state.portfolio_risk_dollars -= position.risk_dollars;
                warn!(position_id, reason, "rolled back position on placement failure");
                Err(EngineError::PlacementFailed { reason: reason.to_string() })
            }
            None => Err(EngineError::InvariantViolation(format!("rollback of unknown position {position_id}"))),
        }
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.state.read().positions.values().cloned().collect()
    }

    pub fn portfolio_risk_dollars(&self) -> f64 {
        self.state.read().portfolio_risk_dollars
    }

    /// Position-tracking loop: called on every completed bar for a held
    /// symbol (spec §4.F). Updates `current_price`, `unrealized_pnl`, MAE,
    /// MFE; signed by side.
    pub fn on_bar(&self, symbol: &str, bar: Bar) {
        let mut state = self.state.write();
        for position in state.positions.values_mut() {
            if position.symbol == symbol {
                position.mark(bar.close);
            }
        }
    }

    /// Trailing-stop loop: runs every `trailing_check_period` (spec §4.F).
    /// Stops are monotone — they only ever tighten toward the current
    /// price, never widen. A candidate must clear a dead-band of one basis
    /// point of entry to be applied, avoiding a chatter of broker calls for
    /// economically negligible adjustments.
    pub async fn run_trailing_scan(&self, session: &SessionManager) {
        let candidates: Vec<(u64, String, String, f64)> = {
            let state = self.state.read();
            state
                .positions
                .values()
                .filter_map(|p| {
                    let order_id = p.stop_order_id.clone()?;
                    self.trailing_candidate(p).map(|new_stop| (p.id, p.symbol.clone(), order_id, new_stop))
                })
                .collect()
        };

        for (id, symbol, order_id, new_stop) in candidates {
            match session.modify_stop(&order_id, new_stop).await {
                Ok(()) => {
                    let prior = {
                        let mut state = self.state.write();
                        let prior = state.positions.get(&id).map(|p| p.stop_price).unwrap_or(new_stop);
                        if let Some(position) = state.positions.get_mut(&id) {
                            position.stop_price = new_stop;
                        }
                        prior
                    };
                    let _ = self.journal.record_event(
                        chrono::Utc::now().timestamp(),
                        JournalEvent::StopModified { symbol: symbol.clone(), prior, new: new_stop },
                    );
                    info!(symbol, prior, new = new_stop, "trailing stop adjusted");
                }
                Err(err) => {
                    // Stop-modification failures are logged and retried on
                    // the next scan; the position's risk accounting does
                    // not change until a modification actually succeeds.
                    warn!(symbol, %err, "trailing stop modification failed, will retry next scan");
                }
            }
        }
    }

    fn trailing_candidate(&self, position: &Position) -> Option<f64> {
        if position.status != PositionStatus::Open {
            return None;
        }
        let dead_band = position.entry_price * 0.0001;
        match position.side {
            Side::Long => {
                let candidate = position.current_price * (1.0 - self.config.trailing_distance_pct);
                if candidate > position.stop_price + dead_band {
                    Some(candidate)
                } else {
                    None
                }
            }
            Side::Short => {
                let candidate = position.current_price * (1.0 + self.config.trailing_distance_pct);
                if candidate < position.stop_price - dead_band {
                    Some(candidate)
                } else {
                    None
                }
            }
        }
    }

    /// Close flow (spec §4.F): converts a Position into a Trade Record.
    /// Decrements the open set and portfolio risk atomically with the
    /// append of the record.
    pub fn close_position(
        &self,
        position_id: u64,
        exit_price: f64,
        exit_time: i64,
        exit_reason: ExitReason,
        commission: f64,
    ) -> EngineResult<TradeRecord> {
        let mut state = self.state.write();
        let position = state
            .positions
            .remove(&position_id)
            .ok_or_else(|| EngineError::InvariantViolation(format!("close of unknown position {position_id}")))?;
        state.portfolio_risk_dollars -= position.risk_dollars;

        let signed = match position.side {
            Side::Long => exit_price - position.entry_price,
            Side::Short => position.entry_price - exit_price,
        };
        let realized_pnl = signed * position.quantity as f64 - commission;

        let record = TradeRecord {
            symbol: position.symbol,
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            exit_price,
            exit_time,
            exit_reason,
            realized_pnl,
            commission,
            hold_time_secs: exit_time - position.entry_time,
            mae: position.mae,
            mfe: position.mfe.max(position.unrealized_pnl),
            notes: String::new(),
        };

        if let Err(err) = self.journal.record_trade(&record) {
            warn!(%err, "failed to persist closed trade to journal");
        }

        Ok(record)
    }
}

pub fn order_side_for(side: Side) -> OrderSide {
    match side {
        Side::Long => OrderSide::Long,
        Side::Short => OrderSide::Short,
    }
}

pub fn bracket_order_for(signal: &Signal, size: u64) -> BracketOrder {
    BracketOrder {
        symbol: signal.symbol.clone(),
        side: order_side_for(signal.side),
        quantity: size,
        entry_price: signal.entry_price,
        stop_price: signal.stop_price,
        target_price: signal.target_price,
    }
}

impl ExecutionGate {
    /// Admits `signal` and, on acceptance, dispatches the corresponding
    /// bracket order through `session` (spec §2: "admitted signals become
    /// orders dispatched via (B)"). A broker-side rejection rolls the
    /// Position back and surfaces `PlacementFailed`, matching spec §4.F's
    /// failure semantics.
    pub async fn open(&self, signal: Signal, session: &SessionManager) -> EngineResult<Admission> {
        let bracket = bracket_order_for(&signal, 0);
        let admission = self.admit(signal);
        let (position_id, size) = match admission {
            Admission::Accept { position_id, size, .. } => (position_id, size),
            Admission::Reject { .. } => return Ok(admission),
        };

        let order = BracketOrder { quantity: size, ..bracket };
        match session.place_order(order).await {
            Ok(ack) => {
                self.attach_order_id(position_id, ack.order_id);
                Ok(admission)
            }
            Err(err) => match self.rollback_placement(position_id, &err.to_string()) {
                Ok(()) => Err(EngineError::InvariantViolation("rollback reported success".into())),
                Err(rollback_err) => Err(rollback_err),
            },
        }
    }
}
