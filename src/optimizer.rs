use crate::backtest::run_backtest;
use crate::config::{BacktestConfig, OptimizationObjective, OptimizerSettings};
use crate::data::PriceSeries;
use crate::error::{EngineError, EngineResult};
use crate::models::OptimizationResult;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Shared stop flag with an optional wall-clock deadline. Workers check it
/// between cells; a cell already running is allowed to finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Same stop flag, with a deadline `timeout` from now. An earlier
    /// deadline already on the token is kept.
    pub fn deadline_after(&self, timeout: Duration) -> Self {
        let fresh = Instant::now() + timeout;
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(self.deadline.map_or(fresh, |existing| existing.min(fresh))),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GridCell {
    index: usize,
    past_window: usize,
    trade_window: usize,
}

struct CellOutcome {
    index: usize,
    result: OptimizationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub objective: OptimizationObjective,
    pub best: Option<OptimizationResult>,
    /// Evaluated cells in enumeration order, failed ones included.
    pub all_results: Vec<OptimizationResult>,
    pub total_cells: usize,
    pub cancelled: bool,
}

impl OptimizationReport {
    pub fn require_best(&self) -> EngineResult<&OptimizationResult> {
        match &self.best {
            Some(best) => Ok(best),
            None if self.cancelled => Err(EngineError::Cancelled),
            None => Err(EngineError::OptimizationExhausted {
                cells: self.total_cells,
            }),
        }
    }

    /// Top `limit` successful cells by objective; ties keep enumeration order.
    pub fn ranked(&self, limit: usize) -> Vec<&OptimizationResult> {
        let mut ranked: Vec<&OptimizationResult> = self
            .all_results
            .iter()
            .filter(|result| !result.is_failed())
            .collect();
        ranked.sort_by(|a, b| {
            b.objective
                .partial_cmp(&a.objective)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);
        ranked
    }

    pub fn failed_cells(&self) -> usize {
        self.all_results.iter().filter(|r| r.is_failed()).count()
    }
}

/// Scores one grid cell. Never fails: errors and cells without trades come
/// back as a failed result scored `-inf`.
pub fn evaluate_cell(
    series: &PriceSeries,
    past_window: usize,
    trade_window: usize,
    config: &BacktestConfig,
    objective: OptimizationObjective,
) -> OptimizationResult {
    let run = match run_backtest(series, past_window, trade_window, config) {
        Ok(run) => run,
        Err(error) => {
            return OptimizationResult::failed(past_window, trade_window, error.to_string())
        }
    };

    if run.trades.is_empty() {
        return OptimizationResult::failed(
            past_window,
            trade_window,
            "no valid trades".to_string(),
        );
    }

    let score = match objective {
        OptimizationObjective::FinalCapital => run.summary.final_capital,
        OptimizationObjective::Sharpe => run.summary.sharpe_ratio,
    };
    if !score.is_finite() {
        return OptimizationResult::failed(
            past_window,
            trade_window,
            format!("non-finite {}", objective.label()),
        );
    }

    OptimizationResult {
        past_window,
        trade_window,
        objective: score,
        final_capital: Some(run.summary.final_capital),
        total_trades: run.trades.len(),
        error: None,
    }
}

/// Strict `>` in enumeration order: the first cell reaching the maximum wins.
fn select_best(results: &[OptimizationResult]) -> Option<OptimizationResult> {
    let mut best: Option<&OptimizationResult> = None;
    for result in results.iter().filter(|result| !result.is_failed()) {
        match best {
            Some(current) if result.objective <= current.objective => {}
            _ => best = Some(result),
        }
    }
    best.cloned()
}

/// Exhaustive grid search over `(past_window, trade_window)`.
pub struct ParameterOptimizer {
    settings: OptimizerSettings,
    token: CancellationToken,
}

impl ParameterOptimizer {
    pub fn new(settings: OptimizerSettings) -> EngineResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            token: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    fn grid(&self) -> Vec<GridCell> {
        let mut cells = Vec::with_capacity(self.settings.cell_count());
        for past_window in self.settings.past_window_range.values() {
            for trade_window in self.settings.trade_window_range.values() {
                cells.push(GridCell {
                    index: cells.len(),
                    past_window,
                    trade_window,
                });
            }
        }
        cells
    }

    pub fn optimize(
        &self,
        series: Arc<PriceSeries>,
        config: &BacktestConfig,
    ) -> EngineResult<OptimizationReport> {
        config.validate()?;
        let token = match self.settings.deadline {
            Some(timeout) => self.token.deadline_after(timeout),
            None => self.token.clone(),
        };
        let objective = self.settings.objective;
        let cells = self.grid();
        let cell_count = cells.len();

        let num_workers = self
            .settings
            .max_workers
            .unwrap_or_else(num_cpus::get)
            .max(1)
            .min(cell_count);
        info!(
            "Optimizing {} over {} cells (past_window {}..={}, trade_window {}..={}) with {} worker threads",
            objective.label(),
            cell_count,
            self.settings.past_window_range.min,
            self.settings.past_window_range.max,
            self.settings.trade_window_range.min,
            self.settings.trade_window_range.max,
            num_workers
        );

        let config = Arc::new(config.clone());
        let (tx, rx): (Sender<GridCell>, Receiver<GridCell>) = bounded(cell_count);
        let (result_tx, result_rx): (Sender<CellOutcome>, Receiver<CellOutcome>) =
            bounded(cell_count);

        let mut handles = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            let rx = rx.clone();
            let result_tx = result_tx.clone();
            let series = Arc::clone(&series);
            let config = Arc::clone(&config);
            let token = token.clone();

            let handle = thread::spawn(move || {
                while let Ok(cell) = rx.recv() {
                    if token.is_cancelled() {
                        debug!("Worker {} stopping: optimization cancelled", worker_id);
                        break;
                    }
                    let start_time = Instant::now();
                    let result = evaluate_cell(
                        &series,
                        cell.past_window,
                        cell.trade_window,
                        &config,
                        objective,
                    );
                    let duration = start_time.elapsed();

                    match &result.error {
                        None => debug!(
                            "Worker {} finished pw={} tw={} in {:.1}ms: {} {:.4}, final capital {:.2}, {} trades",
                            worker_id,
                            cell.past_window,
                            cell.trade_window,
                            duration.as_secs_f64() * 1000.0,
                            objective.label(),
                            result.objective,
                            result.final_capital.unwrap_or(f64::NAN),
                            result.total_trades
                        ),
                        Some(error) => debug!(
                            "Worker {} finished pw={} tw={} in {:.1}ms with error: {}",
                            worker_id,
                            cell.past_window,
                            cell.trade_window,
                            duration.as_secs_f64() * 1000.0,
                            error
                        ),
                    }

                    if result_tx
                        .send(CellOutcome {
                            index: cell.index,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);
        drop(rx);

        for cell in &cells {
            if tx.send(*cell).is_err() {
                if !token.is_cancelled() {
                    warn!("All optimizer workers exited before the grid was dispatched");
                }
                break;
            }
        }
        drop(tx);

        let pb = if self.settings.show_progress {
            ProgressBar::new(cell_count as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut slots: Vec<Option<OptimizationResult>> = vec![None; cell_count];
        let mut completed = 0;
        while completed < cell_count {
            match result_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(outcome) => {
                    completed += 1;
                    pb.set_position(completed as u64);
                    slots[outcome.index] = Some(outcome.result);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut worker_failures = 0;
        for handle in handles {
            if handle.join().is_err() {
                worker_failures += 1;
            }
        }
        if worker_failures > 0 {
            warn!("{} optimizer worker(s) panicked", worker_failures);
        }

        let cancelled = completed < cell_count && token.is_cancelled();
        let mut all_results = Vec::with_capacity(completed);
        for (cell, slot) in cells.iter().zip(slots) {
            match slot {
                Some(result) => all_results.push(result),
                None if cancelled => {}
                None => all_results.push(OptimizationResult::failed(
                    cell.past_window,
                    cell.trade_window,
                    "worker terminated before evaluating cell".to_string(),
                )),
            }
        }

        if cancelled {
            pb.finish_with_message("Optimization cancelled");
            warn!(
                "Optimization cancelled after {} of {} cells",
                completed, cell_count
            );
        } else {
            pb.finish_with_message("Optimization completed");
        }

        let best = select_best(&all_results);
        let report = OptimizationReport {
            objective,
            best,
            all_results,
            total_cells: cell_count,
            cancelled,
        };

        match &report.best {
            Some(best) => info!(
                "Best cell pw={} tw={}: {} {:.4}, final capital {:.2}, {} trades ({} of {} cells failed)",
                best.past_window,
                best.trade_window,
                objective.label(),
                best.objective,
                best.final_capital.unwrap_or(f64::NAN),
                best.total_trades,
                report.failed_cells(),
                cell_count
            ),
            None => warn!("No optimum found across {} cells", cell_count),
        }

        Ok(report)
    }
}
