//! CSV directory price adapter.
//!
//! One file per symbol, `{base_path}/{SYMBOL}.csv`, with the header
//! `timestamp,open,high,low,close,volume`.

use crate::domain::error::SignalError;
use crate::domain::price_bar::{normalize_series, PriceBar};
use crate::ports::price_port::PricePort;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, warn};
use std::fs;
use std::path::PathBuf;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub struct CsvPriceAdapter {
    base_path: PathBuf,
}

impl CsvPriceAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }
}

/// Bar timestamp in any supported layout; a bare date means midnight.
pub fn parse_bar_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_record(record: &csv::StringRecord) -> Result<PriceBar, String> {
    let field = |idx: usize, name: &str| {
        record
            .get(idx)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing {} column", name))
    };
    let price = |idx: usize, name: &str| -> Result<f64, String> {
        field(idx, name)?
            .parse::<f64>()
            .map_err(|e| format!("invalid {} value: {}", name, e))
    };

    let timestamp = parse_bar_timestamp(field(0, "timestamp")?)
        .ok_or_else(|| "invalid timestamp format".to_string())?;
    let volume = match record.get(5).map(str::trim) {
        None | Some("") => 0,
        Some(v) => v
            .parse::<f64>()
            .map_err(|e| format!("invalid volume value: {}", e))? as i64,
    };

    Ok(PriceBar {
        timestamp,
        open: price(1, "open")?,
        high: price(2, "high")?,
        low: price(3, "low")?,
        close: price(4, "close")?,
        volume,
    })
}

impl PricePort for CsvPriceAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, SignalError> {
        let path = self.csv_path(symbol);
        if !path.exists() {
            debug!("no price file for {} at {}", symbol, path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).map_err(|e| SignalError::Provider {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (line, result) in rdr.records().enumerate() {
            let record = match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("{}: skipping row {}: {}", path.display(), line + 2, e);
                    continue;
                }
            };

            let bar = match parse_record(&record) {
                Ok(bar) => bar,
                Err(reason) => {
                    warn!("{}: skipping row {}: {}", path.display(), line + 2, reason);
                    continue;
                }
            };

            let date = bar.timestamp.date();
            if date < from || date > to {
                continue;
            }
            if !bar.is_valid() {
                warn!(
                    "{}: skipping row {}: invalid prices",
                    path.display(),
                    line + 2
                );
                continue;
            }
            bars.push(bar);
        }

        Ok(normalize_series(bars))
    }
}
