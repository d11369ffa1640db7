use crate::config::BacktestConfig;
use crate::data::PriceSeries;
use crate::equity::{EquityCurve, EquityCurveBuilder};
use crate::error::EngineResult;
use crate::extrema::{Extrema, ExtremaDetector};
use crate::models::{MatchedTrade, RejectedSignal, SignalEvent};
use crate::performance::{PerformanceCalculator, PerformanceSummary};
use crate::signals::SignalAssigner;
use crate::simulator::TradeSimulator;
use log::debug;
use serde::{Deserialize, Serialize};

/// Every artifact of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub past_window: usize,
    pub trade_window: usize,
    pub extrema: Extrema,
    pub signals: Vec<SignalEvent>,
    pub trades: Vec<MatchedTrade>,
    pub rejected: Vec<RejectedSignal>,
    pub equity: EquityCurve,
    pub summary: PerformanceSummary,
}

/// Runs detection, signal assignment, matching and the equity replay for one
/// `(past_window, trade_window)` pair. A trailing position is always marked at
/// the last close and the curve must reconcile with the trades.
pub fn run_backtest(
    series: &PriceSeries,
    past_window: usize,
    trade_window: usize,
    config: &BacktestConfig,
) -> EngineResult<BacktestRun> {
    let simulator = TradeSimulator::new(config.clone())?;

    let extrema = ExtremaDetector::detect(series, past_window, trade_window)?;
    let signals = SignalAssigner::assign(&extrema, series, trade_window, config);

    let mut outcome = simulator.run(&signals);
    outcome.mark_open_position(series);

    let equity = EquityCurveBuilder::build(
        series,
        &outcome.trades,
        config.initial_capital,
        config.trade_on,
    )?;
    equity.reconcile(&outcome.trades, config.initial_capital)?;

    let summary = PerformanceCalculator::calculate_performance(
        &outcome.trades,
        &equity,
        config.initial_capital,
        series.bar_interval(),
    );

    debug!(
        "Backtest pw={} tw={}: {} trades, {} rejected, final capital {:.2}",
        past_window,
        trade_window,
        outcome.trades.len(),
        outcome.rejected.len(),
        summary.final_capital
    );

    Ok(BacktestRun {
        past_window,
        trade_window,
        extrema,
        signals,
        trades: outcome.trades,
        rejected: outcome.rejected,
        equity,
        summary,
    })
}
