//! Trade entries (input signals) and simulated trade results.

use chrono::NaiveDateTime;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct TradeEntry {
    pub symbol: String,
    pub entry_datetime: NaiveDateTime,
    pub market_cap: Option<String>,
    pub sector: Option<String>,
}

impl TradeEntry {
    pub fn new(symbol: impl Into<String>, entry_datetime: NaiveDateTime) -> Self {
        Self {
            symbol: symbol.into(),
            entry_datetime,
            market_cap: None,
            sector: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    Target,
    TimeExit { days: u32 },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "Stop Loss"),
            ExitReason::Target => write!(f, "Target"),
            ExitReason::TimeExit { days } => write!(f, "Time Exit ({} days)", days),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    pub symbol: String,
    pub entry_datetime: NaiveDateTime,
    pub entry_price: f64,
    pub exit_datetime: NaiveDateTime,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub pnl_pct: f64,
    pub pnl_amount: f64,
    pub stop_loss_price: f64,
    pub target_price: f64,
    pub market_cap: Option<String>,
    pub sector: Option<String>,
}

impl TradeResult {
    pub fn is_win(&self) -> bool {
        self.pnl_pct > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl_pct < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_reason_display() {
        assert_eq!(ExitReason::StopLoss.to_string(), "Stop Loss");
        assert_eq!(ExitReason::Target.to_string(), "Target");
        assert_eq!(
            ExitReason::TimeExit { days: 10 }.to_string(),
            "Time Exit (10 days)"
        );
    }

    #[test]
    fn entry_new_has_no_metadata() {
        let at = chrono::NaiveDate::from_ymd_opt(2025, 8, 6)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap();
        let entry = TradeEntry::new("TCS", at);
        assert_eq!(entry.symbol, "TCS");
        assert!(entry.market_cap.is_none());
        assert!(entry.sector.is_none());
    }
}
