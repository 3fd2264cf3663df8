//! Historical Bar Store (spec §4.A) — a content-addressed, columnar store
//! of OHLCV bars keyed by (symbol, timeframe), one file per pair plus a
//! JSON side-car carrying source identifier, first/last timestamp, bar
//! count and schema version (spec §6).
//!
//! Writes use write-then-rename: the new file is written to a `.tmp`
//! sibling and atomically renamed over the target only after validation
//! succeeds, so a rejected save never disturbs the prior file (spec §4.A).

mod columnar;

use crate::bar::{Bar, Series, Timeframe};
use crate::error::{EngineError, EngineResult};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// On-disk schema version. Readers reject files stamped with a newer
/// version with `SchemaMismatch` (spec §6).
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub source: String,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub bar_count: usize,
    pub schema_version: u32,
}

impl SeriesMetadata {
    fn for_series(source: &str, series: &Series) -> Self {
        Self {
            source: source.to_string(),
            first_timestamp: series.bars.first().map(|b| b.timestamp),
            last_timestamp: series.bars.last().map(|b| b.timestamp),
            bar_count: series.len(),
            schema_version: SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

/// Columnar, file-backed store. Multiple readers and one writer per
/// (symbol, timeframe) are safe; a per-pair lock serializes writers
/// without serializing unrelated pairs (spec §5).
pub struct BarStore {
    root: PathBuf,
    locks: RwLock<HashMap<SeriesKey, Arc<Mutex<()>>>>,
}

impl BarStore {
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| EngineError::StorageError(format!("creating data dir: {e}")))?;
        Ok(Self { root, locks: RwLock::new(HashMap::new()) })
    }

    fn paths(&self, symbol: &str, tf: Timeframe) -> (PathBuf, PathBuf) {
        let base = self.root.join(format!("{symbol}.{}", tf.as_str()));
        (base.with_extension("bars"), base.with_extension("meta.json"))
    }

    /// Merge `bars` into the existing Series for (symbol, tf). See
    /// `Series::merge` for duplicate-resolution semantics.
    pub fn save(&self, symbol: &str, tf: Timeframe, bars: Vec<Bar>) -> EngineResult<()> {
        let _guard = self.acquire_pair_lock(symbol, tf);

        let mut series = self.load(symbol, tf, None, None)?;
        series.merge(symbol, tf, bars)?;

        let (data_path, meta_path) = self.paths(symbol, tf);
        let tmp_data = data_path.with_extension("bars.tmp");
        let tmp_meta = meta_path.with_extension("meta.json.tmp");

        columnar::write_series(&tmp_data, &series)
            .map_err(|e| EngineError::StorageError(format!("writing {symbol} {tf}: {e}")))?;
        let metadata = SeriesMetadata::for_series("engine", &series);
        let meta_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| EngineError::StorageError(format!("serializing metadata: {e}")))?;
        std::fs::write(&tmp_meta, meta_json)
            .map_err(|e| EngineError::StorageError(format!("writing metadata: {e}")))?;

        std::fs::rename(&tmp_data, &data_path)
            .map_err(|e| EngineError::StorageError(format!("renaming {symbol} {tf}: {e}")))?;
        std::fs::rename(&tmp_meta, &meta_path)
            .map_err(|e| EngineError::StorageError(format!("renaming metadata: {e}")))?;

        debug!(symbol, timeframe = %tf, bars = series.len(), "bar store save complete");
        Ok(())
    }

    /// Returns the subsequence intersecting `[start, end]`. A missing pair
    /// yields an empty series, not an error (spec §4.A).
    pub fn load(
        &self,
        symbol: &str,
        tf: Timeframe,
        start: Option<i64>,
        end: Option<i64>,
    ) -> EngineResult<Series> {
        let (data_path, meta_path) = self.paths(symbol, tf);
        if !data_path.exists() {
            return Ok(Series::new());
        }

        if meta_path.exists() {
            let raw = std::fs::read(&meta_path)
                .map_err(|e| EngineError::StorageError(format!("reading metadata: {e}")))?;
            let meta: SeriesMetadata = serde_json::from_slice(&raw)
                .map_err(|e| EngineError::StorageError(format!("parsing metadata: {e}")))?;
            if meta.schema_version > SCHEMA_VERSION {
                return Err(EngineError::SchemaMismatch {
                    found: meta.schema_version,
                    supported: SCHEMA_VERSION,
                });
            }
        }

        let series = columnar::read_series(&data_path)
            .map_err(|e| EngineError::StorageError(format!("reading {symbol} {tf}: {e}")))?;
        series.validate(symbol, tf)?;
        Ok(series.slice(start, end))
    }

    /// Parallelisable batch save. Atomicity is per-pair, not across pairs:
    /// a failure on one pair does not roll back others already written.
    pub fn batch_save(
        &self,
        entries: HashMap<SeriesKey, Vec<Bar>>,
    ) -> HashMap<SeriesKey, EngineResult<()>> {
        entries
            .into_par_iter()
            .map(|(key, bars)| {
                let result = self.save(&key.symbol, key.timeframe, bars);
                if let Err(ref e) = result {
                    warn!(symbol = %key.symbol, timeframe = %key.timeframe, error = %e, "batch_save pair failed");
                }
                (key, result)
            })
            .collect()
    }

    pub fn batch_load(
        &self,
        symbols: &[String],
        tf: Timeframe,
    ) -> HashMap<String, EngineResult<Series>> {
        symbols
            .par_iter()
            .map(|symbol| (symbol.clone(), self.load(symbol, tf, None, None)))
            .collect()
    }

    /// Every (symbol, timeframe) pair with data on disk.
    pub fn list(&self) -> EngineResult<Vec<SeriesKey>> {
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| EngineError::StorageError(format!("listing data dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::StorageError(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stripped) = name.strip_suffix(".bars") {
                if let Some((symbol, tf_str)) = stripped.rsplit_once('.') {
                    if let Some(tf) = parse_timeframe(tf_str) {
                        out.push(SeriesKey { symbol: symbol.to_string(), timeframe: tf });
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    pub fn metadata(&self, symbol: &str, tf: Timeframe) -> EngineResult<Option<SeriesMetadata>> {
        let (_, meta_path) = self.paths(symbol, tf);
        if !meta_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&meta_path)
            .map_err(|e| EngineError::StorageError(format!("reading metadata: {e}")))?;
        let meta: SeriesMetadata = serde_json::from_slice(&raw)
            .map_err(|e| EngineError::StorageError(format!("parsing metadata: {e}")))?;
        Ok(Some(meta))
    }

    pub fn delete(&self, symbol: &str, tf: Timeframe) -> EngineResult<()> {
        let _guard = self.acquire_pair_lock(symbol, tf);
        let (data_path, meta_path) = self.paths(symbol, tf);
        if data_path.exists() {
            std::fs::remove_file(&data_path)
                .map_err(|e| EngineError::StorageError(format!("deleting {symbol} {tf}: {e}")))?;
        }
        if meta_path.exists() {
            std::fs::remove_file(&meta_path)
                .map_err(|e| EngineError::StorageError(format!("deleting metadata: {e}")))?;
        }
        info!(symbol, timeframe = %tf, "bar store pair deleted");
        Ok(())
    }

    /// Acquire the mutex guarding writers for (symbol, tf) without
    /// serializing unrelated pairs (spec §5).
    fn acquire_pair_lock(&self, symbol: &str, tf: Timeframe) -> parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()> {
        let key = SeriesKey { symbol: symbol.to_string(), timeframe: tf };
        let mutex = self
            .locks
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_arc()
    }
}

fn parse_timeframe(s: &str) -> Option<Timeframe> {
    match s {
        "5s" => Some(Timeframe::S5),
        "1m" => Some(Timeframe::M1),
        "5m" => Some(Timeframe::M5),
        "15m" => Some(Timeframe::M15),
        "1h" => Some(Timeframe::H1),
        "4h" => Some(Timeframe::H4),
        "1d" => Some(Timeframe::D1),
        _ => None,
    }
}
