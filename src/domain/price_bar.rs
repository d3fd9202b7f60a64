//! OHLCV price bar representation.

use chrono::NaiveDateTime;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl PriceBar {
    fn prices(&self) -> [f64; 4] {
        [self.open, self.high, self.low, self.close]
    }

    /// Finite, non-negative OHLC that are not all zero.
    pub fn is_valid(&self) -> bool {
        let prices = self.prices();
        prices.iter().all(|p| p.is_finite() && *p >= 0.0) && prices.iter().any(|p| *p != 0.0)
    }

    /// Every OHLC field finite and strictly positive. Exit scanning only
    /// considers tradable bars.
    pub fn is_tradable(&self) -> bool {
        self.prices().iter().all(|p| p.is_finite() && *p > 0.0)
    }

    pub fn has_valid_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

/// Drop invalid bars and order the rest by timestamp. The sort is stable, so
/// bars sharing a timestamp keep provider order.
pub fn normalize_series(bars: Vec<PriceBar>) -> Vec<PriceBar> {
    let mut bars: Vec<PriceBar> = bars.into_iter().filter(PriceBar::is_valid).collect();
    bars.sort_by_key(|b| b.timestamp);
    bars
}
