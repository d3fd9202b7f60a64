//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_entry_adapter::CsvEntryAdapter;
use crate::adapters::csv_price_adapter::CsvPriceAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as backtest_engine, BacktestConfig};
use crate::domain::config_validation::{
    check_exit_days, data_source, parse_day_convention, parse_entry_window, parse_exit_days,
    parse_fetch_padding, validate_backtest_config, validate_data_config, validate_risk_params,
};
use crate::domain::error::SignalError;
use crate::domain::metrics::{
    returns_histogram, MetricsSummary, SymbolSummary, DEFAULT_HISTOGRAM_BINS,
};
use crate::domain::trade::TradeEntry;
use crate::ports::config_port::ConfigPort;
use crate::ports::price_port::PricePort;
use crate::ports::report_port::ReportPort;

pub const DEFAULT_OUTPUT: &str = "backtest_results.csv";

#[derive(Parser, Debug)]
#[command(name = "signalbt", about = "Backtest trade signals against intraday prices")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over a CSV of trade entries
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        entries: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Stop-loss percentage below entry
        #[arg(long)]
        stop_loss: Option<f64>,
        /// Target percentage above entry
        #[arg(long)]
        target: Option<f64>,
        /// Holding period before a time exit
        #[arg(long)]
        exit_days: Option<u32>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List the symbols the SmartAPI provider can resolve
    Symbols {
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Command-line values that take precedence over `[backtest]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub stop_loss: Option<f64>,
    pub target: Option<f64>,
    pub exit_days: Option<u32>,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            entries,
            output,
            stop_loss,
            target,
            exit_days,
        } => run_backtest(
            &config,
            &entries,
            output.as_ref(),
            Overrides {
                stop_loss,
                target,
                exit_days,
            },
        ),
        Command::Validate { config } => run_validate(&config),
        Command::Symbols { config } => run_symbols(&config),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = SignalError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(e: SignalError) -> ExitCode {
    eprintln!("error: {e}");
    (&e).into()
}

fn run_backtest(
    config_path: &PathBuf,
    entries_path: &PathBuf,
    output_path: Option<&PathBuf>,
    overrides: Overrides,
) -> ExitCode {
    // Stage 1: Load and validate config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_backtest_config(&adapter) {
        return fail(e);
    }
    if let Err(e) = validate_data_config(&adapter) {
        return fail(e);
    }

    // Stage 2: Build BacktestConfig with overrides
    let bt_config = match build_backtest_config(&adapter)
        .and_then(|c| apply_overrides(c, overrides))
    {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    // Stage 3: Load trade entries
    eprintln!("Loading trade entries from {}", entries_path.display());
    let entries = match CsvEntryAdapter::load(entries_path) {
        Ok(e) => e,
        Err(e) => return fail(e),
    };

    let output = output_path
        .cloned()
        .or_else(|| adapter.get_string("report", "output").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    // Stage 4: Price source
    let price_port = match build_price_port(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };

    run_backtest_pipeline(price_port.as_ref(), &entries, &bt_config, &output)
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, SignalError> {
    let defaults = BacktestConfig::default();
    let config = BacktestConfig {
        stop_loss_pct: adapter.get_double("backtest", "stop_loss", defaults.stop_loss_pct),
        target_pct: adapter.get_double("backtest", "target", defaults.target_pct),
        exit_days: parse_exit_days(adapter)?,
        day_convention: parse_day_convention(adapter)?,
        entry_window: parse_entry_window(adapter)?,
        fetch_padding_days: parse_fetch_padding(adapter)?,
        bounded_scan: adapter.get_bool("backtest", "bounded_scan", defaults.bounded_scan),
    };
    validate_risk_params(config.stop_loss_pct, config.target_pct)?;
    Ok(config)
}

pub fn apply_overrides(
    mut config: BacktestConfig,
    overrides: Overrides,
) -> Result<BacktestConfig, SignalError> {
    if let Some(stop_loss) = overrides.stop_loss {
        config.stop_loss_pct = stop_loss;
    }
    if let Some(target) = overrides.target {
        config.target_pct = target;
    }
    if let Some(exit_days) = overrides.exit_days {
        check_exit_days(exit_days)?;
        config.exit_days = exit_days;
    }
    validate_risk_params(config.stop_loss_pct, config.target_pct)?;
    Ok(config)
}

/// Price source selected by `[data] source`.
pub fn build_price_port(adapter: &dyn ConfigPort) -> Result<Box<dyn PricePort>, SignalError> {
    match data_source(adapter).as_str() {
        "csv" => {
            let dir = adapter
                .get_string("data", "csv_dir")
                .ok_or_else(|| SignalError::ConfigMissing {
                    section: "data".into(),
                    key: "csv_dir".into(),
                })?;
            eprintln!("Using CSV price data from {}", dir);
            Ok(Box::new(CsvPriceAdapter::new(PathBuf::from(dir))))
        }
        #[cfg(feature = "smartapi")]
        "smartapi" => {
            use crate::adapters::smartapi_adapter::SmartApiAdapter;

            eprintln!("Using SmartAPI price data");
            Ok(Box::new(SmartApiAdapter::from_config(adapter)?))
        }
        other => Err(SignalError::ConfigInvalid {
            section: "data".into(),
            key: "source".into(),
            reason: format!("source '{}' is not available in this build", other),
        }),
    }
}

pub fn run_backtest_pipeline(
    price_port: &dyn PricePort,
    entries: &[TradeEntry],
    bt_config: &BacktestConfig,
    output: &PathBuf,
) -> ExitCode {
    eprintln!(
        "Running backtest: {} entries, SL {}%, TP {}%, exit after {} days",
        entries.len(),
        bt_config.stop_loss_pct,
        bt_config.target_pct,
        bt_config.exit_days,
    );

    // Stage 5: Simulate
    let outcome = match backtest_engine::run_backtest(price_port, entries, bt_config) {
        Ok(o) => o,
        Err(e) => return fail(e),
    };

    for skipped in &outcome.skipped {
        eprintln!(
            "  skipped {} at {}: {}",
            skipped.symbol, skipped.entry_datetime, skipped.reason
        );
    }

    let results = match outcome.into_results() {
        Ok(r) => r,
        Err(e) => {
            let code = fail(e);
            print_empty_batch_hints();
            return code;
        }
    };

    // Stage 6: Metrics
    let summary = MetricsSummary::compute(&results);
    print_summary(&summary);

    let per_symbol = SymbolSummary::compute_per_symbol(&results);
    if !per_symbol.is_empty() {
        eprintln!("\n=== Per-Symbol Summary ===");
        for s in &per_symbol {
            let pnl_sign = if s.total_pnl >= 0.0 { "+" } else { "" };
            eprintln!(
                "  {}:  {} trades, {:.1}% win rate, {}{:.2}%",
                s.symbol, s.total_trades, s.win_rate, pnl_sign, s.total_pnl,
            );
        }
    }

    let histogram = returns_histogram(&results, DEFAULT_HISTOGRAM_BINS);
    if !histogram.is_empty() {
        eprintln!("\n=== Return Distribution ===");
        for bin in histogram.iter().filter(|b| b.count > 0) {
            eprintln!("  {:>7.2}% .. {:>7.2}%  {}", bin.lower, bin.upper, bin.count);
        }
    }

    // Stage 7: Export
    let output_str = output.display().to_string();
    match CsvReportAdapter::new().write(&results, &summary, &output_str) {
        Ok(()) => {
            eprintln!("\nResults written to: {}", output.display());
            eprintln!(
                "Summary written to: {}",
                CsvReportAdapter::summary_path(output).display()
            );
            eprintln!(
                "Equity curve written to: {}",
                CsvReportAdapter::equity_path(output).display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn print_summary(summary: &MetricsSummary) {
    let s = summary.rounded();
    eprintln!("\n=== Backtest Results ===");
    eprintln!("Total Trades:     {}", s.total_trades);
    eprintln!("Winning Trades:   {}", s.winning_trades);
    eprintln!("Losing Trades:    {}", s.losing_trades);
    eprintln!("Win Rate:         {:.2}%", s.win_rate);
    eprintln!("Avg Gain:         {:.2}%", s.avg_gain);
    eprintln!("Avg Loss:         {:.2}%", s.avg_loss);
    eprintln!("Largest Gain:     {:.2}%", s.largest_gain);
    eprintln!("Largest Loss:     {:.2}%", s.largest_loss);
    eprintln!("Max Drawdown:     {:.2}%", s.max_drawdown);
    eprintln!("Risk/Reward:      {:.2}", s.risk_reward);
    eprintln!("Total P&L:        {:.2}%", s.total_pnl);
    eprintln!(
        "Exits:            {} stop loss, {} target, {} time",
        s.exit_breakdown.stop_loss, s.exit_breakdown.target, s.exit_breakdown.time_exit
    );
}

fn print_empty_batch_hints() {
    eprintln!("\nNo trade produced a result. Check that:");
    eprintln!("  - SmartAPI credentials and the TOTP code are current");
    eprintln!("  - every symbol has an instrument token (see `signalbt symbols`)");
    eprintln!("  - request_delay_ms is high enough to avoid rate limiting");
    eprintln!("  - entry dates fall inside the provider's available history");
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_backtest_config(&adapter) {
        return fail(e);
    }
    if let Err(e) = validate_data_config(&adapter) {
        return fail(e);
    }
    let config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };

    eprintln!("\nBacktest parameters:");
    eprintln!("  stop_loss:            {}%", config.stop_loss_pct);
    eprintln!("  target:               {}%", config.target_pct);
    eprintln!("  exit_days:            {} ({:?})", config.exit_days, config.day_convention);
    eprintln!("  entry_window_minutes: {}", config.entry_window.num_minutes());
    eprintln!("  fetch_padding_days:   {}", config.fetch_padding_days);
    eprintln!("  bounded_scan:         {}", config.bounded_scan);
    eprintln!("  data source:          {}", data_source(&adapter));

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_symbols(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    #[cfg(feature = "smartapi")]
    {
        use crate::adapters::smartapi_adapter::token_map;

        let tokens = token_map(&config);
        for (symbol, token) in &tokens {
            println!("{}\t{}", symbol, token);
        }
        eprintln!("{} symbols configured", tokens.len());
        ExitCode::SUCCESS
    }

    #[cfg(not(feature = "smartapi"))]
    {
        let _ = config;
        eprintln!("error: smartapi feature is required for symbols");
        ExitCode::from(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::DayConvention;
    use crate::domain::config_validation::MAX_EXIT_DAYS;
    use chrono::Duration;

    fn config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    #[test]
    fn build_config_defaults() {
        let bt = build_backtest_config(&config("[backtest]\n")).unwrap();
        assert_eq!(bt.stop_loss_pct, 5.0);
        assert_eq!(bt.target_pct, 10.0);
        assert_eq!(bt.exit_days, 10);
        assert_eq!(bt.day_convention, DayConvention::Calendar);
        assert_eq!(bt.entry_window, Duration::minutes(120));
        assert!(!bt.bounded_scan);
    }

    #[test]
    fn build_config_reads_values() {
        let bt = build_backtest_config(&config(
            "[backtest]\nstop_loss = 3\ntarget = 6\nexit_days = 4\nday_convention = trading\nentry_window_minutes = 30\nbounded_scan = true\n",
        ))
        .unwrap();
        assert_eq!(bt.stop_loss_pct, 3.0);
        assert_eq!(bt.target_pct, 6.0);
        assert_eq!(bt.exit_days, 4);
        assert_eq!(bt.day_convention, DayConvention::Trading);
        assert_eq!(bt.entry_window, Duration::minutes(30));
        assert!(bt.bounded_scan);
    }

    #[test]
    fn overrides_take_precedence() {
        let bt = apply_overrides(
            BacktestConfig::default(),
            Overrides {
                stop_loss: Some(2.0),
                target: None,
                exit_days: Some(3),
            },
        )
        .unwrap();
        assert_eq!(bt.stop_loss_pct, 2.0);
        assert_eq!(bt.target_pct, 10.0);
        assert_eq!(bt.exit_days, 3);
    }

    #[test]
    fn invalid_override_rejected() {
        let err = apply_overrides(
            BacktestConfig::default(),
            Overrides {
                stop_loss: Some(-1.0),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SignalError::ConfigInvalid { .. }));
    }

    #[test]
    fn exit_days_override_above_bound_rejected() {
        let err = apply_overrides(
            BacktestConfig::default(),
            Overrides {
                exit_days: Some(MAX_EXIT_DAYS + 1),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, SignalError::ConfigInvalid { key, .. } if key == "exit_days"));
    }

    #[test]
    fn build_config_rejects_out_of_range_values() {
        for ini in [
            "[backtest]\nexit_days = 4000000000\n",
            "[backtest]\nentry_window_minutes = 9223372036854775807\n",
            "[backtest]\nfetch_padding_days = 9223372036854775807\n",
        ] {
            let err = build_backtest_config(&config(ini)).unwrap_err();
            assert!(matches!(err, SignalError::ConfigInvalid { .. }), "{ini}");
        }
    }

    #[test]
    fn csv_price_port_selected() {
        let port = build_price_port(&config("[data]\nsource = csv\ncsv_dir = /tmp\n"));
        assert!(port.is_ok());
    }

    #[test]
    fn unknown_source_rejected() {
        let err = build_price_port(&config("[data]\nsource = ftp\n")).err().unwrap();
        assert!(matches!(err, SignalError::ConfigInvalid { key, .. } if key == "source"));
    }
}
