//! Brokerage Session Manager (spec §4.B) — a single logical session per
//! process: connection state machine, heartbeat liveness, automatic
//! reconnection with subscription replay, and request throttling.

pub mod gateway;
mod throttle;

use crate::bar::{Bar, Timeframe};
use crate::error::{EngineError, EngineResult};
use crate::execution::journal::{JournalEvent, TradeJournal};
use crate::symbol::SymbolRegistry;
use gateway::{AccountSnapshot, BracketOrder, BrokerGateway, OrderAck};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use throttle::RequestThrottle;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Connection state machine (spec §4.B). Initial state `Disconnected`;
/// `Error` is terminal until an explicit `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A legal edge in the state graph (spec §4.B). Checked by every
/// transition so no state is ever reached via a non-listed edge
/// (spec §8 property 6).
fn is_legal_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Error)
            | (Connected, Disconnected)
            | (Connected, Reconnecting)
            | (Reconnecting, Connected)
            | (Reconnecting, Error)
            | (Error, Connecting)
            | (Disconnected, Disconnected)
    )
}

type LiveCallback = Box<dyn Fn(Bar) + Send + Sync>;

struct Subscription {
    symbol: String,
    callback: Arc<LiveCallback>,
}

struct SessionInner {
    state: SessionState,
    last_heartbeat: i64,
    subscriptions: Vec<Subscription>,
    last_error: Option<String>,
    connected_since: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionMetrics {
    pub state: SessionState,
    pub uptime_secs: i64,
    pub reconnect_count: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub last_error: Option<String>,
    pub last_heartbeat: i64,
}

/// Session manager. All public operations are safe under concurrent
/// access (spec §5): mutation of session state is guarded by `inner`;
/// the throttle gate cooperatively suspends concurrent callers.
pub struct SessionManager {
    gateway: Arc<dyn BrokerGateway>,
    inner: RwLock<SessionInner>,
    throttle: RequestThrottle,
    heartbeat_period: Duration,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    request_timeout: Duration,

    reconnect_count: AtomicU64,
    error_count: AtomicU64,
    request_count: AtomicU64,
    first_connect_at: AtomicI64,

    symbols: Arc<SymbolRegistry>,
    journal: RwLock<Option<Arc<TradeJournal>>>,
    shutdown: Notify,
}

impl SessionManager {
    pub fn new(gateway: Arc<dyn BrokerGateway>, config: &crate::config::SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            inner: RwLock::new(SessionInner {
                state: SessionState::Disconnected,
                last_heartbeat: 0,
                subscriptions: Vec::new(),
                last_error: None,
                connected_since: None,
            }),
            throttle: RequestThrottle::new(Duration::from_millis(config.throttle_spacing_ms)),
            heartbeat_period: Duration::from_secs(config.heartbeat_period_secs),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            reconnect_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            request_count: AtomicU64::new(0),
            first_connect_at: AtomicI64::new(0),
            symbols: Arc::new(SymbolRegistry::new()),
            journal: RwLock::new(None),
            shutdown: Notify::new(),
        })
    }

    /// Symbol metadata registry (spec §3), updated as symbols are qualified
    /// to broker contract ids and as live quotes arrive.
    pub fn symbols(&self) -> Arc<SymbolRegistry> {
        self.symbols.clone()
    }

    /// Attaches the trade journal so session transitions are recorded
    /// (spec §7: "each session transition is recorded with prior state and
    /// cause"). Optional: a session without a journal still runs, it just
    /// logs transitions instead of persisting them.
    pub fn set_journal(&self, journal: Arc<TradeJournal>) {
        *self.journal.write() = Some(journal);
    }

    fn transition(&self, to: SessionState, cause: &str) -> EngineResult<()> {
        let mut inner = self.inner.write();
        if !is_legal_transition(inner.state, to) {
            return Err(EngineError::InvariantViolation(format!(
                "illegal session transition {} -> {to} ({cause})",
                inner.state
            )));
        }
        info!(from = %inner.state, to = %to, cause, "session state transition");
        if to == SessionState::Connected && inner.connected_since.is_none() {
            inner.connected_since = Some(chrono::Utc::now().timestamp());
            if self.first_connect_at.load(Ordering::Relaxed) == 0 {
                self.first_connect_at.store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
            }
        }
        let prior = inner.state;
        inner.state = to;
        if let Some(journal) = self.journal.read().as_ref() {
            let event = JournalEvent::SessionTransition { prior: prior.to_string(), new: to.to_string(), cause: cause.to_string() };
            if let Err(e) = journal.record_event(chrono::Utc::now().timestamp(), event) {
                warn!(error = %e, "failed to journal session transition");
            }
        }
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// `Disconnected|Error --connect()--> Connecting --ok--> Connected`.
    pub async fn connect(self: &Arc<Self>) -> EngineResult<()> {
        {
            let state = self.state();
            if state == SessionState::Error {
                self.transition(SessionState::Connecting, "connect() from error")?;
            } else if state == SessionState::Disconnected {
                self.transition(SessionState::Connecting, "connect()")?;
            } else {
                return Ok(()); // already connecting/connected; idempotent
            }
        }

        match self.gateway.authenticate().await {
            Ok(()) => {
                self.transition(SessionState::Connected, "authenticate ok")?;
                self.inner.write().last_heartbeat = chrono::Utc::now().timestamp();
                self.spawn_heartbeat_loop();
                Ok(())
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                self.inner.write().last_error = Some(e.to_string());
                self.transition(SessionState::Error, "authenticate failed")?;
                Err(e)
            }
        }
    }

    pub fn disconnect(&self) -> EngineResult<()> {
        if self.state() == SessionState::Connected {
            self.transition(SessionState::Disconnected, "disconnect()")?;
        }
        self.shutdown.notify_waiters();
        Ok(())
    }

    fn spawn_heartbeat_loop(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut consecutive_misses = 0u32;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(this.heartbeat_period) => {}
                    _ = this.shutdown.notified() => break,
                }
                if this.state() != SessionState::Connected {
                    break;
                }
                match tokio::time::timeout(this.request_timeout, this.gateway.heartbeat()).await {
                    Ok(Ok(ts)) => {
                        consecutive_misses = 0;
                        this.inner.write().last_heartbeat = ts;
                    }
                    Ok(Err(_)) => {
                        warn!("heartbeat probe failed");
                        if let Err(e) = this.begin_reconnect().await {
                            error!(error = %e, "reconnect loop exhausted");
                        }
                        break;
                    }
                    Err(_) => {
                        consecutive_misses += 1;
                        if consecutive_misses >= 2 {
                            warn!("two consecutive heartbeat misses");
                            if let Err(e) = this.begin_reconnect().await {
                                error!(error = %e, "reconnect loop exhausted");
                            }
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn begin_reconnect(self: &Arc<Self>) -> EngineResult<()> {
        self.transition(SessionState::Reconnecting, "heartbeat miss")?;

        for attempt in 1..=self.reconnect_attempts {
            tokio::time::sleep(self.jittered_reconnect_delay()).await;
            match self.gateway.authenticate().await {
                Ok(()) => {
                    self.reconnect_count.fetch_add(1, Ordering::Relaxed);
                    self.transition(SessionState::Connected, "reconnect ok")?;
                    self.inner.write().last_heartbeat = chrono::Utc::now().timestamp();
                    self.resubscribe_all().await;
                    self.spawn_heartbeat_loop();
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts = self.reconnect_attempts, error = %e, "reconnect attempt failed");
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.inner.write().last_error = Some("reconnect attempts exhausted".to_string());
        self.transition(SessionState::Error, "reconnect exhausted")?;
        Err(EngineError::ConnectionLost)
    }

    /// Reconnect delay with ±30% jitter, so a broker-wide disconnect does
    /// not thunder-herd reconnect attempts back in at the same instant.
    fn jittered_reconnect_delay(&self) -> Duration {
        use rand::Rng;
        let base_ms = self.reconnect_delay.as_millis() as f64;
        let jitter = rand::thread_rng().gen_range(-0.3..=0.3);
        Duration::from_millis((base_ms * (1.0 + jitter)).max(0.0) as u64)
    }

    /// "Resubscribes" live feeds after a successful reconnect (spec §4.B:
    /// "all live subscriptions are automatically re-established"). Against
    /// the fake/abstracted gateway there is no wire-level subscribe call to
    /// reissue: `subscriptions` is never cleared across a reconnect, so the
    /// existing callbacks are retained rather than replayed, and this just
    /// logs the count for visibility. A real `BrokerGateway` that tears down
    /// its transport on disconnect would reissue a subscribe call per entry
    /// here.
    async fn resubscribe_all(&self) {
        let count = self.inner.read().subscriptions.len();
        if count > 0 {
            info!(count, "live feed subscriptions retained across reconnect");
        }
    }

    async fn guarded<T, F>(&self, op: F) -> EngineResult<T>
    where
        F: std::future::Future<Output = EngineResult<T>>,
    {
        if self.state() != SessionState::Connected {
            return Err(EngineError::NotConnected);
        }
        self.throttle.acquire().await;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(self.request_timeout, op).await {
            Ok(result) => {
                if result.is_err() {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                }
                result
            }
            Err(_) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                Err(EngineError::Timeout)
            }
        }
    }

    pub async fn fetch_history(&self, symbol: &str, tf: Timeframe, duration_secs: i64) -> EngineResult<Vec<Bar>> {
        let gateway = self.gateway.clone();
        let symbols = self.symbols.clone();
        let symbol = symbol.to_string();
        self.guarded(async move {
            let contract_id = gateway.qualify_symbol(&symbol).await?;
            symbols.get_or_insert(&symbol, "UNKNOWN", 0.0, 0.0);
            symbols.set_contract_id(&symbol, contract_id.clone());
            gateway.fetch_history(&contract_id, tf, duration_secs).await
        })
        .await
    }

    /// Registers a callback receiving live fine-grained bars for `symbol`.
    /// Callbacks are invoked synchronously on the dispatching thread
    /// (spec §4.C/§5) via `dispatch_live_bar`; they must not block.
    pub fn subscribe_live(&self, symbol: &str, callback: impl Fn(Bar) + Send + Sync + 'static) {
        self.inner.write().subscriptions.push(Subscription {
            symbol: symbol.to_string(),
            callback: Arc::new(Box::new(callback)),
        });
    }

    /// Dispatches a bar pushed by the broker's I/O loop to every subscriber
    /// registered for `symbol`. Not part of the public spec surface, but
    /// the mechanism through which an actual broker transport (out of
    /// scope here) would feed the session.
    pub fn dispatch_live_bar(&self, symbol: &str, bar: Bar) {
        self.symbols.update_quote(symbol, bar.close);
        let callbacks: Vec<Arc<LiveCallback>> = self
            .inner
            .read()
            .subscriptions
            .iter()
            .filter(|s| s.symbol == symbol)
            .map(|s| s.callback.clone())
            .collect();
        for cb in callbacks {
            cb(bar);
        }
    }

    pub async fn place_order(&self, order: BracketOrder) -> EngineResult<OrderAck> {
        let gateway = self.gateway.clone();
        self.guarded(async move { gateway.place_order(order).await }).await
    }

    pub async fn modify_stop(&self, order_id: &str, new_price: f64) -> EngineResult<()> {
        let gateway = self.gateway.clone();
        let order_id = order_id.to_string();
        self.guarded(async move { gateway.modify_stop(&order_id, new_price).await }).await
    }

    pub async fn account_snapshot(&self) -> EngineResult<AccountSnapshot> {
        let gateway = self.gateway.clone();
        self.guarded(async move { gateway.account_snapshot().await }).await
    }

    pub fn metrics(&self) -> SessionMetrics {
        let inner = self.inner.read();
        let first_connect = self.first_connect_at.load(Ordering::Relaxed);
        let uptime_secs = if first_connect > 0 { chrono::Utc::now().timestamp() - first_connect } else { 0 };
        SessionMetrics {
            state: inner.state,
            uptime_secs,
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            request_count: self.request_count.load(Ordering::Relaxed),
            last_error: inner.last_error.clone(),
            last_heartbeat: inner.last_heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway::FakeGateway;

    fn config() -> crate::config::SessionConfig {
        crate::config::SessionConfig {
            heartbeat_period_secs: 30,
            reconnect_attempts: 5,
            reconnect_delay_ms: 10,
            throttle_spacing_ms: 0,
            request_timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn initial_state_is_disconnected() {
        let gw = Arc::new(FakeGateway::new(true));
        let session = SessionManager::new(gw, &config());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_transitions_to_connected() {
        let gw = Arc::new(FakeGateway::new(true));
        let session = SessionManager::new(gw, &config());
        session.connect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.is_healthy());
    }

    #[tokio::test]
    async fn operations_before_connect_fail_not_connected() {
        let gw = Arc::new(FakeGateway::new(true));
        let session = SessionManager::new(gw, &config());
        let err = session.fetch_history("AAPL", Timeframe::M1, 3600).await;
        assert!(matches!(err, Err(EngineError::NotConnected)));
    }

    #[tokio::test]
    async fn reconnect_restores_connected_and_counts_one(/* S6 */) {
        let gw = Arc::new(FakeGateway::new(true));
        let session = SessionManager::new(gw.clone(), &config());
        session.connect().await.unwrap();

        session.begin_reconnect().await.unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.metrics().reconnect_count, 1);
    }

    #[test]
    fn illegal_transition_rejected() {
        assert!(!is_legal_transition(SessionState::Disconnected, SessionState::Connected));
        assert!(is_legal_transition(SessionState::Disconnected, SessionState::Connecting));
    }

    #[tokio::test]
    async fn connect_records_session_transition_when_journal_attached() {
        let gw = Arc::new(FakeGateway::new(true));
        let session = SessionManager::new(gw, &config());
        let journal = Arc::new(crate::execution::journal::TradeJournal::in_memory().unwrap());
        session.set_journal(journal.clone());

        session.connect().await.unwrap();

        // Disconnected -> Connecting -> Connected: two recorded transitions.
        assert_eq!(journal.journal_entry_count("session_transition").unwrap(), 2);
    }
}
