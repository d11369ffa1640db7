use crate::error::{EngineError, EngineResult};
use crate::models::Bar;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const PRICE_SERIES_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PriceSeriesSnapshot {
    version: u32,
    symbol: String,
    bars: Vec<Bar>,
}

/// Immutable, validated OHLCV series for a single instrument.
///
/// Dates are strictly ascending and every price is finite. Every stage of the
/// pipeline reads from this type and none of them mutate it, so it can be
/// shared across optimizer workers behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    symbol: String,
    bars: Vec<Bar>,
    bar_interval: Duration,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> EngineResult<Self> {
        for (index, bar) in bars.iter().enumerate() {
            let prices = [bar.open, bar.high, bar.low, bar.close];
            if prices.iter().any(|price| !price.is_finite()) {
                return Err(EngineError::InvalidSeries(format!(
                    "non-finite price at bar {} ({})",
                    index,
                    bar.date.to_rfc3339()
                )));
            }
        }

        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].date == pair[0].date {
                return Err(EngineError::InvalidSeries(format!(
                    "duplicate date {} at bar {}",
                    pair[1].date.to_rfc3339(),
                    index + 1
                )));
            }
            if pair[1].date < pair[0].date {
                return Err(EngineError::InvalidSeries(format!(
                    "dates out of order at bar {} ({} after {})",
                    index + 1,
                    pair[1].date.to_rfc3339(),
                    pair[0].date.to_rfc3339()
                )));
            }
        }

        let mut gaps: Vec<Duration> = bars
            .windows(2)
            .map(|pair| pair[1].date - pair[0].date)
            .collect();
        gaps.sort_unstable();
        let bar_interval = gaps
            .get(gaps.len().saturating_sub(1) / 2)
            .copied()
            .unwrap_or_else(|| Duration::days(1));

        Ok(Self {
            symbol: symbol.into(),
            bars,
            bar_interval,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|bar| bar.close).collect()
    }

    /// Median spacing between consecutive bars; one day for series shorter than two bars.
    pub fn bar_interval(&self) -> Duration {
        self.bar_interval
    }

    pub fn index_of(&self, date: DateTime<Utc>) -> Option<usize> {
        self.bars
            .binary_search_by(|bar| bar.date.cmp(&date))
            .ok()
    }

    /// Loads a series snapshot. Files ending in `.json` are read as JSON,
    /// everything else as the versioned bincode format.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open price series at {}", path.display()))?;
        let reader = BufReader::new(file);

        let snapshot: PriceSeriesSnapshot = if is_json_path(path) {
            serde_json::from_reader(reader).with_context(|| {
                format!("Failed to parse JSON price series {}", path.display())
            })?
        } else {
            bincode::deserialize_from(reader).context("Price series snapshot decode failed")?
        };

        if snapshot.version != PRICE_SERIES_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Price series snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                PRICE_SERIES_SNAPSHOT_VERSION
            ));
        }

        let series = Self::new(snapshot.symbol, snapshot.bars)
            .with_context(|| format!("Invalid price series in {}", path.display()))?;
        info!(
            "Loaded {} bars for {} from {}",
            series.len(),
            series.symbol(),
            path.display()
        );
        Ok(series)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path)
            .with_context(|| format!("Unable to create price series at {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let snapshot = PriceSeriesSnapshot {
            version: PRICE_SERIES_SNAPSHOT_VERSION,
            symbol: self.symbol.clone(),
            bars: self.bars.clone(),
        };

        if is_json_path(path) {
            serde_json::to_writer_pretty(&mut writer, &snapshot)
                .context("Failed to serialize price series as JSON")?;
        } else {
            bincode::serialize_into(&mut writer, &snapshot)
                .context("Failed to serialize price series snapshot")?;
        }
        writer
            .flush()
            .context("Failed to flush price series snapshot to disk")?;
        Ok(())
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
