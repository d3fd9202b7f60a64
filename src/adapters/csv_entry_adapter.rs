//! CSV trade-entry loader.
//!
//! Maps arbitrary signal exports onto `TradeEntry`: columns are matched by
//! header keywords first, then by position (datetime, symbol, market cap,
//! sector). A required field without a keyword match takes its positional
//! column even when another keyword claimed it. Rows with an unreadable datetime or an empty symbol are reported
//! together so the whole file can be fixed in one pass.

use crate::domain::error::SignalError;
use crate::domain::trade::TradeEntry;
use chrono::NaiveDateTime;
use log::info;
use std::fs;
use std::path::Path;

/// Tried in order; the first format that parses wins, so month-first beats
/// day-first for ambiguous dates.
pub const ENTRY_DATETIME_FORMATS: [&str; 7] = [
    "%m-%d-%Y %I:%M %p",
    "%d-%m-%Y %I:%M %p",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    EntryDatetime,
    Symbol,
    MarketCap,
    Sector,
}

impl Field {
    fn is_required(self) -> bool {
        matches!(self, Field::EntryDatetime | Field::Symbol)
    }
}

const POSITIONAL: [Field; 4] = [
    Field::EntryDatetime,
    Field::Symbol,
    Field::MarketCap,
    Field::Sector,
];

fn classify_header(header: &str) -> Option<Field> {
    let lower = header.trim().to_lowercase();
    let has = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if has(&["date", "time", "datetime", "entry"]) {
        Some(Field::EntryDatetime)
    } else if has(&["symbol", "stock", "scrip", "ticker"]) {
        Some(Field::Symbol)
    } else if has(&["market", "cap", "mcap"]) {
        Some(Field::MarketCap)
    } else if has(&["sector", "industry"]) {
        Some(Field::Sector)
    } else {
        None
    }
}

#[derive(Debug, Default, PartialEq)]
struct ColumnMap {
    entry_datetime: Option<usize>,
    symbol: Option<usize>,
    market_cap: Option<usize>,
    sector: Option<usize>,
}

impl ColumnMap {
    fn slot(&mut self, field: Field) -> &mut Option<usize> {
        match field {
            Field::EntryDatetime => &mut self.entry_datetime,
            Field::Symbol => &mut self.symbol,
            Field::MarketCap => &mut self.market_cap,
            Field::Sector => &mut self.sector,
        }
    }

    fn from_headers(headers: &csv::StringRecord) -> Self {
        let mut map = ColumnMap::default();
        let mut owner: Vec<Option<Field>> = vec![None; headers.len()];

        for (idx, header) in headers.iter().enumerate() {
            if let Some(field) = classify_header(header) {
                let slot = map.slot(field);
                if slot.is_none() {
                    *slot = Some(idx);
                    owner[idx] = Some(field);
                }
            }
        }

        for (idx, &field) in POSITIONAL.iter().enumerate() {
            if idx >= headers.len() || map.slot(field).is_some() {
                continue;
            }
            match owner[idx] {
                None => {}
                Some(previous) if field.is_required() => *map.slot(previous) = None,
                Some(_) => continue,
            }
            *map.slot(field) = Some(idx);
            owner[idx] = Some(field);
        }

        map
    }
}

pub fn parse_entry_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    ENTRY_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

pub fn parse_entries(content: &str) -> Result<Vec<TradeEntry>, SignalError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| SignalError::Ingest {
            reason: format!("cannot read header: {}", e),
        })?
        .clone();
    if headers.len() < 2 {
        return Err(SignalError::Ingest {
            reason: "CSV must have at least 2 columns: date/time and symbol".to_string(),
        });
    }

    let columns = ColumnMap::from_headers(&headers);
    let (Some(dt_col), Some(symbol_col)) = (columns.entry_datetime, columns.symbol) else {
        return Err(SignalError::Ingest {
            reason: "CSV must have date/time and symbol columns".to_string(),
        });
    };

    let optional = |record: &csv::StringRecord, col: Option<usize>| {
        col.and_then(|c| record.get(c))
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut entries = Vec::new();
    let mut bad_rows = Vec::new();

    for (idx, result) in rdr.records().enumerate() {
        let row = idx + 1;
        let record = result.map_err(|e| SignalError::Ingest {
            reason: format!("row {}: {}", row, e),
        })?;

        let symbol = record.get(symbol_col).unwrap_or("").to_uppercase();
        let entry_datetime = record.get(dt_col).and_then(parse_entry_datetime);

        match entry_datetime {
            Some(entry_datetime) if !symbol.is_empty() => entries.push(TradeEntry {
                symbol,
                entry_datetime,
                market_cap: optional(&record, columns.market_cap),
                sector: optional(&record, columns.sector),
            }),
            _ => bad_rows.push(row),
        }
    }

    if !bad_rows.is_empty() {
        let rows: Vec<String> = bad_rows.iter().map(|r| r.to_string()).collect();
        return Err(SignalError::Ingest {
            reason: format!(
                "invalid date or symbol in rows: {}. Use MM-DD-YYYY HH:MM AM/PM or DD-MM-YYYY HH:MM AM/PM",
                rows.join(", ")
            ),
        });
    }

    Ok(entries)
}

pub struct CsvEntryAdapter;

impl CsvEntryAdapter {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<TradeEntry>, SignalError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let entries = parse_entries(&content)?;
        info!("Loaded {} trade entries from {}", entries.len(), path.display());
        Ok(entries)
    }
}
