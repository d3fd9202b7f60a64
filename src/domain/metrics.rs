//! Performance metrics over simulated trade results.
//!
//! All values are percentage points of entry price and kept at full
//! precision; `round2` / `MetricsSummary::rounded` are for presentation.

use crate::domain::trade::{ExitReason, TradeResult};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

pub const DEFAULT_HISTOGRAM_BINS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub exit_datetime: NaiveDateTime,
    pub symbol: String,
    pub pnl_pct: f64,
    pub cumulative_pnl: f64,
    pub drawdown: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitBreakdown {
    pub stop_loss: usize,
    pub target: usize,
    pub time_exit: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub breakeven_trades: usize,
    pub win_rate: f64,
    pub avg_gain: f64,
    pub avg_loss: f64,
    pub largest_gain: f64,
    pub largest_loss: f64,
    pub max_drawdown: f64,
    pub risk_reward: f64,
    pub total_pnl: f64,
    pub exit_breakdown: ExitBreakdown,
    pub equity_curve: Vec<EquityPoint>,
}

impl MetricsSummary {
    pub fn compute(results: &[TradeResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut breakeven_trades = 0usize;
        let mut total_gains = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_gain = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut exit_breakdown = ExitBreakdown::default();

        for result in results {
            let pnl = result.pnl_pct;
            if pnl > 0.0 {
                winning_trades += 1;
                total_gains += pnl;
                largest_gain = largest_gain.max(pnl);
            } else if pnl < 0.0 {
                losing_trades += 1;
                total_losses += pnl;
                largest_loss = largest_loss.min(pnl);
            } else {
                breakeven_trades += 1;
            }

            match result.exit_reason {
                ExitReason::StopLoss => exit_breakdown.stop_loss += 1,
                ExitReason::Target => exit_breakdown.target += 1,
                ExitReason::TimeExit { .. } => exit_breakdown.time_exit += 1,
            }
        }

        let total_trades = results.len();
        let win_rate = winning_trades as f64 / total_trades as f64 * 100.0;

        let avg_gain = if winning_trades > 0 {
            total_gains / winning_trades as f64
        } else {
            0.0
        };

        let avg_loss = if losing_trades > 0 {
            total_losses / losing_trades as f64
        } else {
            0.0
        };

        let risk_reward = if avg_loss != 0.0 {
            (avg_gain / avg_loss).abs()
        } else {
            0.0
        };

        let equity_curve = build_equity_curve(results);
        let max_drawdown = equity_curve
            .iter()
            .map(|p| p.drawdown)
            .fold(0.0_f64, f64::min);

        MetricsSummary {
            total_trades,
            winning_trades,
            losing_trades,
            breakeven_trades,
            win_rate,
            avg_gain,
            avg_loss,
            largest_gain,
            largest_loss,
            max_drawdown,
            risk_reward,
            total_pnl: results.iter().map(|r| r.pnl_pct).sum(),
            exit_breakdown,
            equity_curve,
        }
    }

    /// Copy with every ratio and percentage rounded to two decimals.
    pub fn rounded(&self) -> Self {
        MetricsSummary {
            win_rate: round2(self.win_rate),
            avg_gain: round2(self.avg_gain),
            avg_loss: round2(self.avg_loss),
            largest_gain: round2(self.largest_gain),
            largest_loss: round2(self.largest_loss),
            max_drawdown: round2(self.max_drawdown),
            risk_reward: round2(self.risk_reward),
            total_pnl: round2(self.total_pnl),
            equity_curve: self
                .equity_curve
                .iter()
                .map(|p| EquityPoint {
                    pnl_pct: round2(p.pnl_pct),
                    cumulative_pnl: round2(p.cumulative_pnl),
                    drawdown: round2(p.drawdown),
                    ..p.clone()
                })
                .collect(),
            ..self.clone()
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Cumulative pnl_pct ordered by exit time. Results sharing an exit time
/// keep their input order.
fn build_equity_curve(results: &[TradeResult]) -> Vec<EquityPoint> {
    let mut ordered: Vec<&TradeResult> = results.iter().collect();
    ordered.sort_by_key(|r| r.exit_datetime);

    let mut cumulative = 0.0_f64;
    let mut peak = f64::NEG_INFINITY;
    ordered
        .into_iter()
        .map(|r| {
            cumulative += r.pnl_pct;
            peak = peak.max(cumulative);
            EquityPoint {
                exit_datetime: r.exit_datetime,
                symbol: r.symbol.clone(),
                pnl_pct: r.pnl_pct,
                cumulative_pnl: cumulative,
                drawdown: cumulative - peak,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSummary {
    pub symbol: String,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

impl SymbolSummary {
    /// One row per symbol, sorted by symbol.
    pub fn compute_per_symbol(results: &[TradeResult]) -> Vec<SymbolSummary> {
        let mut grouped: BTreeMap<&str, Vec<&TradeResult>> = BTreeMap::new();
        for result in results {
            grouped.entry(result.symbol.as_str()).or_default().push(result);
        }

        grouped
            .into_iter()
            .map(|(symbol, trades)| {
                let winning_trades = trades.iter().filter(|t| t.is_win()).count();
                let losing_trades = trades.iter().filter(|t| t.is_loss()).count();
                SymbolSummary {
                    symbol: symbol.to_string(),
                    total_trades: trades.len(),
                    winning_trades,
                    losing_trades,
                    win_rate: winning_trades as f64 / trades.len() as f64 * 100.0,
                    total_pnl: trades.iter().map(|t| t.pnl_pct).sum(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width bins over `[min, max]` of pnl_pct. The last bin is closed on
/// the right. A degenerate range yields a single bin.
pub fn returns_histogram(results: &[TradeResult], bins: usize) -> Vec<HistogramBin> {
    if results.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = results.iter().map(|r| r.pnl_pct).fold(f64::INFINITY, f64::min);
    let max = results
        .iter()
        .map(|r| r.pnl_pct)
        .fold(f64::NEG_INFINITY, f64::max);

    if max <= min {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: results.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for result in results {
        let idx = ((result.pnl_pct - min) / width) as usize;
        counts[idx.min(bins - 1)] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count,
        })
        .collect()
}
