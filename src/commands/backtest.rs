use crate::backtest::run_backtest;
use crate::commands::write_report;
use crate::config::{load_settings_file, BacktestConfig};
use crate::data::PriceSeries;
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;

pub fn run(
    data_file: &Path,
    settings_file: &Path,
    past_window: usize,
    trade_window: usize,
    output: Option<&Path>,
) -> Result<()> {
    info!(
        "Received backtest command for past_window={} trade_window={}",
        past_window, trade_window
    );
    let settings = load_settings_file(settings_file)?;
    let config = BacktestConfig::from_settings_map(&settings)?;
    let series = PriceSeries::load_from_file(data_file)?;

    let run = run_backtest(&series, past_window, trade_window, &config).with_context(|| {
        format!(
            "Backtest failed for {} (past_window={}, trade_window={})",
            series.symbol(),
            past_window,
            trade_window
        )
    })?;

    let summary = &run.summary;
    info!(
        "{}: {} trades ({} open), win rate {:.1}%, net PnL {:.2}, final capital {:.2} ({:+.2}%), max DD {:.2}%, Sharpe {:.3}, buy & hold {:+.2}%",
        series.symbol(),
        summary.total_trades,
        summary.open_trades,
        summary.win_rate * 100.0,
        summary.net_pnl,
        summary.final_capital,
        summary.total_return_percent,
        summary.max_drawdown_percent,
        summary.sharpe_ratio,
        summary.buy_and_hold_return_percent
    );
    if !run.rejected.is_empty() {
        warn!("{} signal(s) were rejected", run.rejected.len());
    }

    write_report(&run, output)
}
