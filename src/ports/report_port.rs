//! Report generation port trait.

use crate::domain::error::SignalError;
use crate::domain::metrics::MetricsSummary;
use crate::domain::trade::TradeResult;

/// Port for writing backtest results.
pub trait ReportPort {
    fn write(
        &self,
        results: &[TradeResult],
        summary: &MetricsSummary,
        output_path: &str,
    ) -> Result<(), SignalError>;
}
