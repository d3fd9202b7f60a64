//! Configuration validation.
//!
//! Validates config fields before a backtest runs.

use crate::domain::backtest::{
    DayConvention, DEFAULT_ENTRY_WINDOW_MINUTES, DEFAULT_EXIT_DAYS, DEFAULT_FETCH_PADDING_DAYS,
};
use crate::domain::error::SignalError;
use crate::ports::config_port::ConfigPort;
use chrono::Duration;

pub const DATA_SOURCES: [&str; 2] = ["smartapi", "csv"];
pub const SMARTAPI_REQUIRED_KEYS: [&str; 4] = ["api_key", "client_id", "password", "totp"];

/// Ten years of holding period.
pub const MAX_EXIT_DAYS: u32 = 3_650;
/// One week either side of the signal.
pub const MAX_ENTRY_WINDOW_MINUTES: i64 = 7 * 24 * 60;
pub const MAX_FETCH_PADDING_DAYS: i64 = 365;

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), SignalError> {
    validate_risk_params(
        config.get_double("backtest", "stop_loss", 5.0),
        config.get_double("backtest", "target", 10.0),
    )?;
    parse_exit_days(config)?;
    parse_day_convention(config)?;
    parse_entry_window(config)?;
    parse_fetch_padding(config)?;
    Ok(())
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), SignalError> {
    let source = data_source(config);
    if !DATA_SOURCES.contains(&source.as_str()) {
        return Err(SignalError::ConfigInvalid {
            section: "data".to_string(),
            key: "source".to_string(),
            reason: format!("unknown source '{}', expected smartapi or csv", source),
        });
    }

    if source == "csv" {
        return require_non_empty(config, "data", "csv_dir");
    }

    for key in SMARTAPI_REQUIRED_KEYS {
        require_non_empty(config, "smartapi", key)?;
    }
    if config.get_int("smartapi", "request_delay_ms", 1000) < 0 {
        return Err(SignalError::ConfigInvalid {
            section: "smartapi".to_string(),
            key: "request_delay_ms".to_string(),
            reason: "request_delay_ms must be non-negative".to_string(),
        });
    }
    Ok(())
}

/// Configured price source, lower-cased. Defaults to `smartapi`.
pub fn data_source(config: &dyn ConfigPort) -> String {
    config
        .get_string("data", "source")
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "smartapi".to_string())
}

/// Stop-loss and target percentages, also used for CLI overrides.
pub fn validate_risk_params(stop_loss_pct: f64, target_pct: f64) -> Result<(), SignalError> {
    if !(stop_loss_pct.is_finite() && stop_loss_pct > 0.0) {
        return Err(SignalError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "stop_loss".to_string(),
            reason: "stop_loss must be positive".to_string(),
        });
    }
    if stop_loss_pct >= 100.0 {
        return Err(SignalError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "stop_loss".to_string(),
            reason: "stop_loss must be below 100".to_string(),
        });
    }
    if !(target_pct.is_finite() && target_pct > 0.0) {
        return Err(SignalError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "target".to_string(),
            reason: "target must be positive".to_string(),
        });
    }
    Ok(())
}

/// Validated `exit_days`, at most [`MAX_EXIT_DAYS`].
pub fn parse_exit_days(config: &dyn ConfigPort) -> Result<u32, SignalError> {
    let Some(raw) = config.get_string("backtest", "exit_days") else {
        return Ok(DEFAULT_EXIT_DAYS);
    };
    let days = raw.trim().parse::<u32>().map_err(|_| SignalError::ConfigInvalid {
        section: "backtest".to_string(),
        key: "exit_days".to_string(),
        reason: "exit_days must be a non-negative integer".to_string(),
    })?;
    check_exit_days(days)?;
    Ok(days)
}

/// Upper bound on `exit_days`, shared with the `--exit-days` flag.
pub fn check_exit_days(days: u32) -> Result<(), SignalError> {
    if days > MAX_EXIT_DAYS {
        return Err(SignalError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "exit_days".to_string(),
            reason: format!("exit_days must be at most {}", MAX_EXIT_DAYS),
        });
    }
    Ok(())
}

pub fn parse_day_convention(config: &dyn ConfigPort) -> Result<DayConvention, SignalError> {
    match config.get_string("backtest", "day_convention") {
        Some(s) => DayConvention::parse(&s).ok_or_else(|| SignalError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "day_convention".to_string(),
            reason: format!("unknown day convention '{}', expected calendar or trading", s),
        }),
        None => Ok(DayConvention::Calendar),
    }
}

pub fn parse_entry_window(config: &dyn ConfigPort) -> Result<Duration, SignalError> {
    let minutes = config.get_int(
        "backtest",
        "entry_window_minutes",
        DEFAULT_ENTRY_WINDOW_MINUTES,
    );
    if minutes <= 0 || minutes > MAX_ENTRY_WINDOW_MINUTES {
        return Err(SignalError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "entry_window_minutes".to_string(),
            reason: format!(
                "entry_window_minutes must be between 1 and {}",
                MAX_ENTRY_WINDOW_MINUTES
            ),
        });
    }
    Duration::try_minutes(minutes).ok_or_else(|| SignalError::ConfigInvalid {
        section: "backtest".to_string(),
        key: "entry_window_minutes".to_string(),
        reason: "entry_window_minutes is out of range".to_string(),
    })
}

pub fn parse_fetch_padding(config: &dyn ConfigPort) -> Result<i64, SignalError> {
    let days = config.get_int(
        "backtest",
        "fetch_padding_days",
        DEFAULT_FETCH_PADDING_DAYS,
    );
    if !(0..=MAX_FETCH_PADDING_DAYS).contains(&days) {
        return Err(SignalError::ConfigInvalid {
            section: "backtest".to_string(),
            key: "fetch_padding_days".to_string(),
            reason: format!(
                "fetch_padding_days must be between 0 and {}",
                MAX_FETCH_PADDING_DAYS
            ),
        });
    }
    Ok(days)
}

fn require_non_empty(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), SignalError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(SignalError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}
