//! Trade journal persistence (spec §6): a relational store with tables
//! `trades`, `journal_entries`, `positions_snapshot`, `performance_metrics`.
//! Follows the teacher's `signals/db_storage.rs` idiom: WAL mode, a
//! `parking_lot::Mutex<Connection>` rather than a connection pool (single
//! writer, the Execution Gate, per spec §5), covering indexes on the
//! columns spec §6 names.

use super::{ExitReason, Position, RejectKind, Side, TradeRecord};
use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::info;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    entry_price REAL NOT NULL,
    entry_time INTEGER NOT NULL,
    exit_price REAL NOT NULL,
    exit_time INTEGER NOT NULL,
    exit_reason TEXT NOT NULL,
    realized_pnl REAL NOT NULL,
    commission REAL NOT NULL,
    hold_time_secs INTEGER NOT NULL,
    mae REAL NOT NULL,
    mfe REAL NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'closed'
);

CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol);
CREATE INDEX IF NOT EXISTS idx_trades_entry_time ON trades(entry_time);
CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);

CREATE TABLE IF NOT EXISTS journal_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    kind TEXT NOT NULL,
    detail TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS positions_snapshot (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    symbol TEXT NOT NULL,
    side TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    entry_price REAL NOT NULL,
    stop_price REAL NOT NULL,
    current_price REAL NOT NULL,
    unrealized_pnl REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS performance_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    equity REAL NOT NULL,
    open_positions INTEGER NOT NULL,
    portfolio_risk_dollars REAL NOT NULL
);
"#;

#[derive(Debug, Clone)]
pub enum JournalEvent {
    SessionTransition { prior: String, new: String, cause: String },
    StopModified { symbol: String, prior: f64, new: f64 },
    AdmissionRejected { symbol: String, reason: RejectKind },
}

impl JournalEvent {
    fn kind(&self) -> &'static str {
        match self {
            JournalEvent::SessionTransition { .. } => "session_transition",
            JournalEvent::StopModified { .. } => "stop_modified",
            JournalEvent::AdmissionRejected { .. } => "admission_rejected",
        }
    }

    fn detail(&self) -> String {
        match self {
            JournalEvent::SessionTransition { prior, new, cause } => {
                serde_json::json!({"prior": prior, "new": new, "cause": cause}).to_string()
            }
            JournalEvent::StopModified { symbol, prior, new } => {
                serde_json::json!({"symbol": symbol, "prior": prior, "new": new}).to_string()
            }
            JournalEvent::AdmissionRejected { symbol, reason } => {
                serde_json::json!({"symbol": symbol, "reason": format!("{reason:?}")}).to_string()
            }
        }
    }
}

pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path).map_err(|e| EngineError::StorageError(format!("opening trade journal: {e}")))?;
        conn.execute_batch(SCHEMA_SQL).map_err(|e| EngineError::StorageError(format!("initializing schema: {e}")))?;
        info!(path, "trade journal initialized");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| EngineError::StorageError(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL).map_err(|e| EngineError::StorageError(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn record_trade(&self, trade: &TradeRecord) -> EngineResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (symbol, side, quantity, entry_price, entry_time, exit_price, exit_time, exit_reason, realized_pnl, commission, hold_time_secs, mae, mfe, notes, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'closed')",
            params![
                trade.symbol,
                side_str(trade.side),
                trade.quantity as i64,
                trade.entry_price,
                trade.entry_time,
                trade.exit_price,
                trade.exit_time,
                exit_reason_str(trade.exit_reason),
                trade.realized_pnl,
                trade.commission,
                trade.hold_time_secs,
                trade.mae,
                trade.mfe,
                trade.notes,
            ],
        )
        .map_err(|e| EngineError::StorageError(format!("inserting trade: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn append_note(&self, trade_id: i64, note: &str) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE trades SET notes = notes || ?1 WHERE id = ?2",
            params![format!("\n{note}"), trade_id],
        )
        .map_err(|e| EngineError::StorageError(format!("appending note: {e}")))?;
        Ok(())
    }

    pub fn record_event(&self, ts: i64, event: JournalEvent) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO journal_entries (ts, kind, detail) VALUES (?1, ?2, ?3)",
            params![ts, event.kind(), event.detail()],
        )
        .map_err(|e| EngineError::StorageError(format!("recording journal event: {e}")))?;
        Ok(())
    }

    pub fn snapshot_position(&self, ts: i64, position: &Position) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO positions_snapshot (ts, symbol, side, quantity, entry_price, stop_price, current_price, unrealized_pnl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ts,
                position.symbol,
                side_str(position.side),
                position.quantity as i64,
                position.entry_price,
                position.stop_price,
                position.current_price,
                position.unrealized_pnl,
            ],
        )
        .map_err(|e| EngineError::StorageError(format!("snapshotting position: {e}")))?;
        Ok(())
    }

    pub fn record_performance(&self, ts: i64, equity: f64, open_positions: usize, portfolio_risk_dollars: f64) -> EngineResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO performance_metrics (ts, equity, open_positions, portfolio_risk_dollars) VALUES (?1, ?2, ?3, ?4)",
            params![ts, equity, open_positions as i64, portfolio_risk_dollars],
        )
        .map_err(|e| EngineError::StorageError(format!("recording performance: {e}")))?;
        Ok(())
    }

    pub fn trade_count(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))
            .map_err(|e| EngineError::StorageError(e.to_string()))
    }

    pub fn journal_entry_count(&self, kind: &str) -> EngineResult<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM journal_entries WHERE kind = ?1", params![kind], |row| row.get(0))
            .map_err(|e| EngineError::StorageError(e.to_string()))
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Long => "long",
        Side::Short => "short",
    }
}

fn exit_reason_str(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::Stop => "stop",
        ExitReason::Target => "target",
        ExitReason::Manual => "manual",
        ExitReason::TrailingStop => "trailing_stop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_trade_record() {
        let journal = TradeJournal::in_memory().unwrap();
        let trade = TradeRecord {
            symbol: "AAPL".into(),
            side: Side::Long,
            quantity: 100,
            entry_price: 50.0,
            entry_time: 1_000,
            exit_price: 52.0,
            exit_time: 2_000,
            exit_reason: ExitReason::Target,
            realized_pnl: 200.0,
            commission: 1.0,
            hold_time_secs: 1_000,
            mae: -10.0,
            mfe: 210.0,
            notes: String::new(),
        };
        let id = journal.record_trade(&trade).unwrap();
        assert!(id > 0);
        assert_eq!(journal.trade_count().unwrap(), 1);
    }

    #[test]
    fn records_session_transition_event() {
        let journal = TradeJournal::in_memory().unwrap();
        journal
            .record_event(1, JournalEvent::SessionTransition { prior: "disconnected".into(), new: "connecting".into(), cause: "connect()".into() })
            .unwrap();
        assert_eq!(journal.journal_entry_count("session_transition").unwrap(), 1);
        assert_eq!(journal.journal_entry_count("stop_modified").unwrap(), 0);
    }
}
