//! Columnar on-disk bar format.
//!
//! Layout: a little-endian `u64` bar count, followed by five columns in
//! sequence — timestamps (`i64`), opens/highs/lows/closes (`f64`) and
//! volumes (`u64`) — rather than row-major OHLCV structs. Column-major
//! storage compresses well (each column is a near-monotonic or
//! narrow-range numeric series) and is the natural layout for a "columnar
//! store" (spec §4.A). Compression is lossless gzip (spec §6).

use crate::bar::{Bar, Series};
use flate2::write::GzEncoder;
use flate2::read::GzDecoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use std::path::Path;

fn write_u64(w: &mut impl Write, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn write_i64(w: &mut impl Write, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}
fn write_f64(w: &mut impl Write, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
fn read_i64(r: &mut impl Read) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}
fn read_f64(r: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub fn write_series(path: &Path, series: &Series) -> io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());

    write_u64(&mut encoder, series.bars.len() as u64)?;
    for b in &series.bars {
        write_i64(&mut encoder, b.timestamp)?;
    }
    for b in &series.bars {
        write_f64(&mut encoder, b.open)?;
    }
    for b in &series.bars {
        write_f64(&mut encoder, b.high)?;
    }
    for b in &series.bars {
        write_f64(&mut encoder, b.low)?;
    }
    for b in &series.bars {
        write_f64(&mut encoder, b.close)?;
    }
    for b in &series.bars {
        write_u64(&mut encoder, b.volume)?;
    }

    encoder.finish()?.flush()
}

pub fn read_series(path: &Path) -> io::Result<Series> {
    let file = std::fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);

    let n = read_u64(&mut decoder)? as usize;
    let mut timestamps = Vec::with_capacity(n);
    for _ in 0..n {
        timestamps.push(read_i64(&mut decoder)?);
    }
    let mut opens = Vec::with_capacity(n);
    for _ in 0..n {
        opens.push(read_f64(&mut decoder)?);
    }
    let mut highs = Vec::with_capacity(n);
    for _ in 0..n {
        highs.push(read_f64(&mut decoder)?);
    }
    let mut lows = Vec::with_capacity(n);
    for _ in 0..n {
        lows.push(read_f64(&mut decoder)?);
    }
    let mut closes = Vec::with_capacity(n);
    for _ in 0..n {
        closes.push(read_f64(&mut decoder)?);
    }
    let mut volumes = Vec::with_capacity(n);
    for _ in 0..n {
        volumes.push(read_u64(&mut decoder)?);
    }

    let bars = (0..n)
        .map(|i| Bar {
            timestamp: timestamps[i],
            open: opens[i],
            high: highs[i],
            low: lows[i],
            close: closes[i],
            volume: volumes[i],
        })
        .collect();

    Ok(Series { bars })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_gzip_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.bars");
        let series = Series {
            bars: vec![
                Bar { timestamp: 60, open: 1.0, high: 1.5, low: 0.9, close: 1.2, volume: 10 },
                Bar { timestamp: 120, open: 1.2, high: 1.6, low: 1.1, close: 1.4, volume: 20 },
            ],
        };
        write_series(&path, &series).unwrap();
        let back = read_series(&path).unwrap();
        assert_eq!(back.bars, series.bars);
    }
}
