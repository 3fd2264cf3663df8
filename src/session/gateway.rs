//! Broker gateway abstraction (spec §6, design note in spec §9: "Dynamic
//! method patching / duck-typed managers" is replaced by an explicit
//! trait + dependency-injected implementation; tests inject a fake).

use crate::bar::{Bar, Timeframe};
use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Long,
    Short,
}

#[derive(Debug, Clone)]
pub struct BracketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub contract_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
    pub is_paper: bool,
}

/// Required broker-gateway capabilities (spec §6), expressed abstractly so
/// the Session Manager and Execution Gate are testable against a fake
/// without a live TCP connection to the broker process.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn authenticate(&self) -> EngineResult<()>;
    async fn qualify_symbol(&self, symbol: &str) -> EngineResult<String>;
    async fn fetch_history(
        &self,
        contract_id: &str,
        tf: Timeframe,
        duration_secs: i64,
    ) -> EngineResult<Vec<Bar>>;
    async fn place_order(&self, order: BracketOrder) -> EngineResult<OrderAck>;
    async fn modify_stop(&self, order_id: &str, new_stop: f64) -> EngineResult<()>;
    async fn cancel_order(&self, order_id: &str) -> EngineResult<()>;
    async fn account_snapshot(&self) -> EngineResult<AccountSnapshot>;
    /// Broker-reported current time, used as the heartbeat liveness probe.
    async fn heartbeat(&self) -> EngineResult<i64>;
}

/// In-memory fake used by tests and, when no real broker is configured, by
/// local dry-run processes. Never used for the broker gateway's own
/// production deployment, which is out of scope (spec §1).
pub struct FakeGateway {
    pub paper: bool,
    pub fail_heartbeat: std::sync::atomic::AtomicBool,
    pub latency: Duration,
}

impl FakeGateway {
    pub fn new(paper: bool) -> Self {
        Self { paper, fail_heartbeat: std::sync::atomic::AtomicBool::new(false), latency: Duration::ZERO }
    }
}

#[async_trait]
impl BrokerGateway for FakeGateway {
    async fn authenticate(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn qualify_symbol(&self, symbol: &str) -> EngineResult<String> {
        Ok(format!("CONTRACT-{symbol}"))
    }

    async fn fetch_history(
        &self,
        _contract_id: &str,
        _tf: Timeframe,
        _duration_secs: i64,
    ) -> EngineResult<Vec<Bar>> {
        Ok(Vec::new())
    }

    async fn place_order(&self, order: BracketOrder) -> EngineResult<OrderAck> {
        Ok(OrderAck { order_id: format!("ORD-{}", order.symbol), contract_id: format!("CONTRACT-{}", order.symbol) })
    }

    async fn modify_stop(&self, _order_id: &str, _new_stop: f64) -> EngineResult<()> {
        Ok(())
    }

    async fn cancel_order(&self, _order_id: &str) -> EngineResult<()> {
        Ok(())
    }

    async fn account_snapshot(&self) -> EngineResult<AccountSnapshot> {
        Ok(AccountSnapshot { equity: 100_000.0, cash: 100_000.0, buying_power: 100_000.0, is_paper: self.paper })
    }

    async fn heartbeat(&self) -> EngineResult<i64> {
        use std::sync::atomic::Ordering;
        if self.fail_heartbeat.load(Ordering::Relaxed) {
            return Err(crate::error::EngineError::Timeout);
        }
        Ok(chrono::Utc::now().timestamp())
    }
}
