use crate::commands::write_report;
use crate::config::{load_settings_file, BacktestConfig, OptimizerSettings};
use crate::data::PriceSeries;
use crate::optimizer::ParameterOptimizer;
use anyhow::Result;
use log::info;
use std::path::Path;
use std::sync::Arc;

const TOP_RESULTS_TO_LOG: usize = 5;

pub fn run(data_file: &Path, settings_file: &Path, output: Option<&Path>) -> Result<()> {
    let settings = load_settings_file(settings_file)?;
    let config = BacktestConfig::from_settings_map(&settings)?;
    let mut optimizer_settings = OptimizerSettings::from_settings_map(&settings)?;
    optimizer_settings.show_progress = true;
    info!(
        "Received optimize command: maximize {} over {} cells",
        optimizer_settings.objective.label(),
        optimizer_settings.cell_count()
    );

    let series = Arc::new(PriceSeries::load_from_file(data_file)?);
    let optimizer = ParameterOptimizer::new(optimizer_settings)?;
    let report = optimizer.optimize(Arc::clone(&series), &config)?;

    for (rank, result) in report.ranked(TOP_RESULTS_TO_LOG).iter().enumerate() {
        info!(
            "#{} pw={} tw={}: {:.4} (final capital {:.2}, {} trades)",
            rank + 1,
            result.past_window,
            result.trade_window,
            result.objective,
            result.final_capital.unwrap_or(f64::NAN),
            result.total_trades
        );
    }

    write_report(&report, output)?;
    report.require_best()?;
    Ok(())
}
