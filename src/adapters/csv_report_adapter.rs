//! CSV export adapter implementing ReportPort.
//!
//! Writes the trade log to the requested path, the rounded summary to a
//! sibling `<stem>_summary.csv` and the cumulative P&L series to
//! `<stem>_equity.csv`.

use crate::domain::error::SignalError;
use crate::domain::metrics::{round2, EquityPoint, MetricsSummary};
use crate::domain::trade::TradeResult;
use crate::ports::report_port::ReportPort;
use std::path::{Path, PathBuf};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const RESULT_HEADERS: [&str; 12] = [
    "symbol",
    "entry_datetime",
    "entry_price",
    "exit_datetime",
    "exit_price",
    "exit_reason",
    "pnl_pct",
    "pnl_amount",
    "stop_loss",
    "target",
    "market_cap",
    "sector",
];

pub const EQUITY_HEADERS: [&str; 5] = [
    "exit_datetime",
    "symbol",
    "pnl_pct",
    "cumulative_pnl",
    "drawdown",
];

pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn summary_path(output_path: &Path) -> PathBuf {
        sibling_path(output_path, "summary")
    }

    pub fn equity_path(output_path: &Path) -> PathBuf {
        sibling_path(output_path, "equity")
    }
}

impl Default for CsvReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn sibling_path(output_path: &Path, suffix: &str) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    output_path.with_file_name(format!("{}_{}.csv", stem, suffix))
}

fn csv_error(e: csv::Error) -> SignalError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => SignalError::Io(io),
        other => SignalError::Io(std::io::Error::other(format!("{:?}", other))),
    }
}

fn price(value: f64) -> String {
    format!("{:.2}", round2(value))
}

pub fn result_row(result: &TradeResult) -> Vec<String> {
    vec![
        result.symbol.clone(),
        result.entry_datetime.format(DATETIME_FORMAT).to_string(),
        price(result.entry_price),
        result.exit_datetime.format(DATETIME_FORMAT).to_string(),
        price(result.exit_price),
        result.exit_reason.to_string(),
        price(result.pnl_pct),
        price(result.pnl_amount),
        price(result.stop_loss_price),
        price(result.target_price),
        result.market_cap.clone().unwrap_or_default(),
        result.sector.clone().unwrap_or_default(),
    ]
}

pub fn equity_row(point: &EquityPoint) -> Vec<String> {
    vec![
        point.exit_datetime.format(DATETIME_FORMAT).to_string(),
        point.symbol.clone(),
        price(point.pnl_pct),
        price(point.cumulative_pnl),
        price(point.drawdown),
    ]
}

pub fn summary_rows(summary: &MetricsSummary) -> Vec<(&'static str, String)> {
    let s = summary.rounded();
    vec![
        ("total_trades", s.total_trades.to_string()),
        ("winning_trades", s.winning_trades.to_string()),
        ("losing_trades", s.losing_trades.to_string()),
        ("breakeven_trades", s.breakeven_trades.to_string()),
        ("win_rate", format!("{:.2}", s.win_rate)),
        ("avg_gain", format!("{:.2}", s.avg_gain)),
        ("avg_loss", format!("{:.2}", s.avg_loss)),
        ("largest_gain", format!("{:.2}", s.largest_gain)),
        ("largest_loss", format!("{:.2}", s.largest_loss)),
        ("max_drawdown", format!("{:.2}", s.max_drawdown)),
        ("risk_reward", format!("{:.2}", s.risk_reward)),
        ("total_pnl", format!("{:.2}", s.total_pnl)),
        ("stop_loss_exits", s.exit_breakdown.stop_loss.to_string()),
        ("target_exits", s.exit_breakdown.target.to_string()),
        ("time_exits", s.exit_breakdown.time_exit.to_string()),
    ]
}

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        results: &[TradeResult],
        summary: &MetricsSummary,
        output_path: &str,
    ) -> Result<(), SignalError> {
        let output = Path::new(output_path);

        let mut wtr = csv::Writer::from_path(output).map_err(csv_error)?;
        wtr.write_record(RESULT_HEADERS).map_err(csv_error)?;
        for result in results {
            wtr.write_record(result_row(result)).map_err(csv_error)?;
        }
        wtr.flush()?;

        let mut wtr = csv::Writer::from_path(Self::summary_path(output)).map_err(csv_error)?;
        wtr.write_record(["metric", "value"]).map_err(csv_error)?;
        for (metric, value) in summary_rows(summary) {
            wtr.write_record([metric, value.as_str()]).map_err(csv_error)?;
        }
        wtr.flush()?;

        let mut wtr = csv::Writer::from_path(Self::equity_path(output)).map_err(csv_error)?;
        wtr.write_record(EQUITY_HEADERS).map_err(csv_error)?;
        for point in &summary.equity_curve {
            wtr.write_record(equity_row(point)).map_err(csv_error)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
