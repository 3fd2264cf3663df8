//! Symbol Metadata (spec §3): the identifying and sanity-bound information
//! shared about a traded instrument — symbol text, exchange, the contract id
//! assigned by the broker on qualification, the last-known quote, and sanity
//! bounds (minimum price, minimum daily volume) used to reject obviously bad
//! live prints before they reach the Aggregator or Execution Gate.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMetadata {
    pub symbol: String,
    pub exchange: String,
    pub contract_id: Option<String>,
    pub last_quote: Option<f64>,
    pub min_price: f64,
    pub min_daily_volume: f64,
}

impl SymbolMetadata {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            contract_id: None,
            last_quote: None,
            min_price: 0.0,
            min_daily_volume: 0.0,
        }
    }

    /// `true` iff `price`/`daily_volume` sit within this symbol's configured
    /// sanity bounds. A quote outside bounds is a broker data anomaly, not a
    /// liquidity-filter rejection (spec §4.E's liquidity filter is a
    /// separate, screening-level concern).
    pub fn within_sanity_bounds(&self, price: f64, daily_volume: f64) -> bool {
        price.is_finite() && price >= self.min_price && daily_volume >= self.min_daily_volume
    }
}

/// Shared registry of `SymbolMetadata`, keyed by symbol text. Updated by the
/// Session Manager as symbols are qualified to contract ids and as live
/// quotes arrive; read by any collaborator (screening, execution) that needs
/// the broker-assigned contract id or the last-known quote.
#[derive(Default)]
pub struct SymbolRegistry {
    entries: RwLock<HashMap<String, SymbolMetadata>>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Registers `symbol` with sanity bounds if not already present, and
    /// returns a clone of its current metadata.
    pub fn get_or_insert(&self, symbol: &str, exchange: &str, min_price: f64, min_daily_volume: f64) -> SymbolMetadata {
        let mut entries = self.entries.write();
        entries
            .entry(symbol.to_string())
            .or_insert_with(|| {
                let mut m = SymbolMetadata::new(symbol, exchange);
                m.min_price = min_price;
                m.min_daily_volume = min_daily_volume;
                m
            })
            .clone()
    }

    pub fn set_contract_id(&self, symbol: &str, contract_id: String) {
        if let Some(entry) = self.entries.write().get_mut(symbol) {
            entry.contract_id = Some(contract_id);
        }
    }

    pub fn update_quote(&self, symbol: &str, price: f64) {
        if let Some(entry) = self.entries.write().get_mut(symbol) {
            entry.last_quote = Some(price);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<SymbolMetadata> {
        self.entries.read().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_is_idempotent_on_bounds() {
        let registry = SymbolRegistry::new();
        registry.get_or_insert("AAPL", "NASDAQ", 1.0, 1_000_000.0);
        registry.get_or_insert("AAPL", "NASDAQ", 5.0, 5_000_000.0);
        let meta = registry.get("AAPL").unwrap();
        assert_eq!(meta.min_price, 1.0);
    }

    #[test]
    fn contract_id_and_quote_update_in_place() {
        let registry = SymbolRegistry::new();
        registry.get_or_insert("AAPL", "NASDAQ", 1.0, 0.0);
        registry.set_contract_id("AAPL", "12345".to_string());
        registry.update_quote("AAPL", 182.5);
        let meta = registry.get("AAPL").unwrap();
        assert_eq!(meta.contract_id.as_deref(), Some("12345"));
        assert_eq!(meta.last_quote, Some(182.5));
    }

    #[test]
    fn sanity_bounds_reject_below_minimum_price() {
        let mut meta = SymbolMetadata::new("PENNY", "OTC");
        meta.min_price = 1.0;
        assert!(!meta.within_sanity_bounds(0.01, 1_000_000.0));
        assert!(meta.within_sanity_bounds(5.0, 1_000_000.0));
    }
}
