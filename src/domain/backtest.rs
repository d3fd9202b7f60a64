//! Backtest engine.
//!
//! For every trade entry the engine fetches a padded price series, resolves
//! the entry price from the bar closest to the signal time, then walks
//! forward applying stop-loss, target and time exits in that order.
//!
//! BacktestConfig defines the risk rules shared by the whole batch.

use crate::domain::error::{SignalError, SkipReason, SkippedEntry};
use crate::domain::price_bar::{normalize_series, PriceBar};
use crate::domain::trade::{ExitReason, TradeEntry, TradeResult};
use crate::ports::price_port::PricePort;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use log::{debug, info, warn};

pub const DEFAULT_EXIT_DAYS: u32 = 10;
pub const DEFAULT_ENTRY_WINDOW_MINUTES: i64 = 120;
pub const DEFAULT_FETCH_PADDING_DAYS: i64 = 5;

/// How `exit_days` is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayConvention {
    Calendar,
    /// Monday to Friday. Exchange holidays are not modeled.
    Trading,
}

impl DayConvention {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "calendar" => Some(DayConvention::Calendar),
            "trading" | "business" => Some(DayConvention::Trading),
            _ => None,
        }
    }

    /// `start` moved forward by `days`, or `None` past the last representable date.
    pub fn add_days(self, start: NaiveDateTime, days: u32) -> Option<NaiveDateTime> {
        match self {
            DayConvention::Calendar => {
                start.checked_add_signed(Duration::try_days(i64::from(days))?)
            }
            DayConvention::Trading => {
                // Any 7 consecutive days hold exactly 5 weekdays.
                let weeks = days.saturating_sub(1) / 5;
                let mut current =
                    start.checked_add_signed(Duration::try_weeks(i64::from(weeks))?)?;
                let mut remaining = days - weeks * 5;
                while remaining > 0 {
                    current = current.checked_add_signed(Duration::days(1))?;
                    if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
                        remaining -= 1;
                    }
                }
                Some(current)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub stop_loss_pct: f64,
    pub target_pct: f64,
    pub exit_days: u32,
    pub day_convention: DayConvention,
    pub entry_window: Duration,
    pub fetch_padding_days: i64,
    pub bounded_scan: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 5.0,
            target_pct: 10.0,
            exit_days: DEFAULT_EXIT_DAYS,
            day_convention: DayConvention::Calendar,
            entry_window: Duration::minutes(DEFAULT_ENTRY_WINDOW_MINUTES),
            fetch_padding_days: DEFAULT_FETCH_PADDING_DAYS,
            bounded_scan: false,
        }
    }
}

impl BacktestConfig {
    /// Earliest timestamp at which a time exit may fire.
    pub fn exit_cutoff(&self, entry_datetime: NaiveDateTime) -> Option<NaiveDateTime> {
        self.day_convention.add_days(entry_datetime, self.exit_days)
    }

    /// Inclusive date range requested from the price provider.
    pub fn fetch_range(&self, entry_datetime: NaiveDateTime) -> Option<(NaiveDate, NaiveDate)> {
        let padding = Duration::try_days(self.fetch_padding_days)?;
        let from = entry_datetime.checked_sub_signed(padding)?;
        let to = self.exit_cutoff(entry_datetime)?.checked_add_signed(padding)?;
        Some((from.date(), to.date()))
    }

    pub fn levels(&self, entry_price: f64) -> ExitLevels {
        ExitLevels {
            stop_loss: entry_price * (1.0 - self.stop_loss_pct / 100.0),
            target: entry_price * (1.0 + self.target_pct / 100.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitLevels {
    pub stop_loss: f64,
    pub target: f64,
}

impl ExitLevels {
    /// Stop-loss is checked first: a single bar cannot show whether the
    /// target traded before the stop, so a bar touching both is a loss.
    fn check(&self, bar: &PriceBar) -> Option<ExitFill> {
        if bar.low <= self.stop_loss {
            Some(ExitFill {
                exit_datetime: bar.timestamp,
                exit_price: self.stop_loss,
                reason: ExitReason::StopLoss,
            })
        } else if bar.high >= self.target {
            Some(ExitFill {
                exit_datetime: bar.timestamp,
                exit_price: self.target,
                reason: ExitReason::Target,
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExitFill {
    pub exit_datetime: NaiveDateTime,
    pub exit_price: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestOutcome {
    pub entries: usize,
    pub results: Vec<TradeResult>,
    pub skipped: Vec<SkippedEntry>,
}

impl BacktestOutcome {
    fn skip(&mut self, entry: &TradeEntry, reason: SkipReason) {
        warn!(
            "skipping {} at {}: {}",
            entry.symbol, entry.entry_datetime, reason
        );
        self.skipped.push(SkippedEntry {
            symbol: entry.symbol.clone(),
            entry_datetime: entry.entry_datetime,
            reason,
        });
    }

    /// Results of the run, or `BatchEmpty` when a non-empty batch produced
    /// nothing.
    pub fn into_results(self) -> Result<Vec<TradeResult>, SignalError> {
        if self.entries > 0 && self.results.is_empty() {
            return Err(SignalError::BatchEmpty {
                entries: self.entries,
                skipped: self.skipped.len(),
            });
        }
        Ok(self.results)
    }
}

/// Bar whose close becomes the entry price: inside `at ± window` (inclusive),
/// with a usable close, nearest to `at`; ties go to the earlier bar.
pub fn resolve_entry_price(
    bars: &[PriceBar],
    at: NaiveDateTime,
    window: Duration,
) -> Option<&PriceBar> {
    let start = at.checked_sub_signed(window).unwrap_or(NaiveDateTime::MIN);
    let end = at.checked_add_signed(window).unwrap_or(NaiveDateTime::MAX);
    bars.iter()
        .filter(|b| b.timestamp >= start && b.timestamp <= end && b.has_valid_close())
        .min_by_key(|b| {
            let distance = b.timestamp - at;
            let distance = if distance < Duration::zero() {
                -distance
            } else {
                distance
            };
            (distance, b.timestamp)
        })
}

/// Forward exit search over bars strictly after `entry_datetime`.
///
/// Non-tradable bars are skipped. With `bounded_scan` the stop/target scan
/// ends at the first bar at or past `cutoff`; otherwise the whole series is
/// scanned for stop/target before falling back to the time exit.
pub fn find_exit(
    bars: &[PriceBar],
    entry_datetime: NaiveDateTime,
    levels: &ExitLevels,
    cutoff: NaiveDateTime,
    exit_days: u32,
    bounded_scan: bool,
) -> Option<ExitFill> {
    let post_entry = bars
        .iter()
        .filter(|b| b.timestamp > entry_datetime && b.is_tradable());

    let time_exit = |bar: &PriceBar| ExitFill {
        exit_datetime: bar.timestamp,
        exit_price: bar.close,
        reason: ExitReason::TimeExit { days: exit_days },
    };

    if bounded_scan {
        for bar in post_entry {
            if let Some(fill) = levels.check(bar) {
                return Some(fill);
            }
            if bar.timestamp >= cutoff {
                return Some(time_exit(bar));
            }
        }
        return None;
    }

    if let Some(fill) = post_entry.clone().find_map(|b| levels.check(b)) {
        return Some(fill);
    }
    post_entry.into_iter().find(|b| b.timestamp >= cutoff).map(time_exit)
}

/// Simulate one entry against an already normalized series.
pub fn simulate_entry(
    entry: &TradeEntry,
    bars: &[PriceBar],
    config: &BacktestConfig,
) -> Result<TradeResult, SkipReason> {
    if bars.is_empty() {
        return Err(SkipReason::DataUnavailable);
    }

    let entry_bar = resolve_entry_price(bars, entry.entry_datetime, config.entry_window)
        .ok_or(SkipReason::EntryUnresolvable)?;
    let entry_price = entry_bar.close;
    let levels = config.levels(entry_price);
    debug!(
        "{} entry {:.2} from bar {} (stop {:.2}, target {:.2})",
        entry.symbol, entry_price, entry_bar.timestamp, levels.stop_loss, levels.target
    );

    let cutoff = config
        .exit_cutoff(entry.entry_datetime)
        .ok_or(SkipReason::DateOutOfRange)?;
    let fill = find_exit(
        bars,
        entry.entry_datetime,
        &levels,
        cutoff,
        config.exit_days,
        config.bounded_scan,
    )
    .ok_or(SkipReason::ExitUnresolvable)?;

    let pnl_amount = fill.exit_price - entry_price;
    Ok(TradeResult {
        symbol: entry.symbol.clone(),
        entry_datetime: entry.entry_datetime,
        entry_price,
        exit_datetime: fill.exit_datetime,
        exit_price: fill.exit_price,
        exit_reason: fill.reason,
        pnl_pct: pnl_amount / entry_price * 100.0,
        pnl_amount,
        stop_loss_price: levels.stop_loss,
        target_price: levels.target,
        market_cap: entry.market_cap.clone(),
        sector: entry.sector.clone(),
    })
}

/// Run every entry in order. Per-entry failures are logged and recorded in
/// `skipped`; only fatal provider errors abort the batch.
pub fn run_backtest(
    port: &dyn PricePort,
    entries: &[TradeEntry],
    config: &BacktestConfig,
) -> Result<BacktestOutcome, SignalError> {
    let mut outcome = BacktestOutcome {
        entries: entries.len(),
        ..Default::default()
    };

    for (i, entry) in entries.iter().enumerate() {
        let Some((from, to)) = config.fetch_range(entry.entry_datetime) else {
            outcome.skip(entry, SkipReason::DateOutOfRange);
            continue;
        };
        debug!(
            "[{}/{}] {} at {}, fetching {} to {}",
            i + 1,
            entries.len(),
            entry.symbol,
            entry.entry_datetime,
            from,
            to
        );

        let bars = match port.fetch_bars(&entry.symbol, from, to) {
            Ok(bars) => normalize_series(bars),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                outcome.skip(
                    entry,
                    SkipReason::ProviderFailed {
                        reason: e.to_string(),
                    },
                );
                continue;
            }
        };

        match simulate_entry(entry, &bars, config) {
            Ok(result) => outcome.results.push(result),
            Err(reason) => outcome.skip(entry, reason),
        }
    }

    info!(
        "Backtest complete: {} of {} entries resolved, {} skipped",
        outcome.results.len(),
        outcome.entries,
        outcome.skipped.len()
    );
    Ok(outcome)
}
