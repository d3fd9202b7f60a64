#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use signalbt::domain::backtest::BacktestConfig;
use signalbt::domain::error::SignalError;
pub use signalbt::domain::price_bar::PriceBar;
use signalbt::domain::trade::TradeEntry;
use signalbt::ports::price_port::PricePort;
use std::cell::RefCell;
use std::collections::HashMap;

pub enum MockFailure {
    Auth(String),
    Provider(String),
    UnknownSymbol,
}

pub struct MockPricePort {
    pub data: HashMap<String, Vec<PriceBar>>,
    pub failures: HashMap<String, MockFailure>,
    pub calls: RefCell<Vec<(String, NaiveDate, NaiveDate)>>,
}

impl MockPricePort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            failures: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_provider_error(mut self, symbol: &str, reason: &str) -> Self {
        self.failures
            .insert(symbol.to_string(), MockFailure::Provider(reason.to_string()));
        self
    }

    pub fn with_auth_error(mut self, symbol: &str, reason: &str) -> Self {
        self.failures
            .insert(symbol.to_string(), MockFailure::Auth(reason.to_string()));
        self
    }

    pub fn with_unknown_symbol(mut self, symbol: &str) -> Self {
        self.failures
            .insert(symbol.to_string(), MockFailure::UnknownSymbol);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl PricePort for MockPricePort {
    fn fetch_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, SignalError> {
        self.calls.borrow_mut().push((symbol.to_string(), from, to));
        match self.failures.get(symbol) {
            Some(MockFailure::Auth(reason)) => {
                return Err(SignalError::Auth {
                    reason: reason.clone(),
                })
            }
            Some(MockFailure::Provider(reason)) => {
                return Err(SignalError::Provider {
                    reason: reason.clone(),
                })
            }
            Some(MockFailure::UnknownSymbol) => {
                return Err(SignalError::UnknownSymbol {
                    symbol: symbol.to_string(),
                })
            }
            None => {}
        }
        Ok(self
            .data
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.timestamp.date() >= from && b.timestamp.date() <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn dt(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

pub fn bar(ts: &str, low: f64, high: f64, close: f64) -> PriceBar {
    PriceBar {
        timestamp: dt(ts),
        open: close,
        high,
        low,
        close,
        volume: 1_000,
    }
}

/// Bar whose open, high, low and close are all `price`.
pub fn flat_bar(ts: &str, price: f64) -> PriceBar {
    bar(ts, price, price, price)
}

/// Flat daily bars at 09:15 starting on `start`, one per price.
pub fn daily_bars(start: &str, prices: &[f64]) -> Vec<PriceBar> {
    let first = dt(start);
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| PriceBar {
            timestamp: first + Duration::days(i as i64),
            open: p,
            high: p,
            low: p,
            close: p,
            volume: 1_000,
        })
        .collect()
}

pub fn entry(symbol: &str, at: &str) -> TradeEntry {
    TradeEntry::new(symbol, dt(at))
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        stop_loss_pct: 5.0,
        target_pct: 10.0,
        exit_days: 2,
        ..BacktestConfig::default()
    }
}
