//! Price series provider port.

use crate::domain::error::SignalError;
use crate::domain::price_bar::PriceBar;
use chrono::NaiveDate;

pub trait PricePort {
    /// Bars for `symbol` covering `from..=to`, sorted by timestamp, malformed
    /// bars already removed. An empty vector means no data.
    fn fetch_bars(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PriceBar>, SignalError>;
}
