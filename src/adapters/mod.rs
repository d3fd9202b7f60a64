//! Concrete adapter implementations for ports.

#[cfg(feature = "smartapi")]
pub mod smartapi_adapter;
pub mod csv_price_adapter;
pub mod csv_entry_adapter;
pub mod csv_report_adapter;
pub mod file_config_adapter;
