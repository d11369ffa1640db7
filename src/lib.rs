pub mod backtest;
pub mod commands;
pub mod config;
pub mod data;
pub mod equity;
pub mod error;
pub mod extrema;
pub mod models;
pub mod optimizer;
pub mod performance;
pub mod signals;
pub mod simulator;

pub use backtest::{run_backtest, BacktestRun};
pub use config::{BacktestConfig, OptimizationObjective, OptimizerSettings, WindowRange};
pub use data::PriceSeries;
pub use error::{EngineError, EngineResult};
pub use optimizer::{CancellationToken, OptimizationReport, ParameterOptimizer};
