//! Core domain types and logic.

pub mod price_bar;
pub mod trade;
pub mod backtest;
pub mod metrics;
pub mod config_validation;
pub mod error;
