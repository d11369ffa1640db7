use clap::{Parser, Subcommand};
use log::info;
use sr_engine::commands::{backtest, optimize};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sr-engine")]
#[command(about = "Support/resistance backtesting and window optimization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest for a fixed pair of window sizes
    Backtest {
        /// Path to the price series snapshot (bincode, or JSON with a .json extension)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Path to the JSON settings file
        #[arg(long = "settings-file", value_name = "PATH")]
        settings_file: PathBuf,
        /// Bars of history on each side of an extremum
        #[arg(long)]
        past_window: usize,
        /// Bars between detection and execution
        #[arg(long)]
        trade_window: usize,
        /// Write the JSON report here instead of stdout
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Grid-search past_window and trade_window over the configured ranges
    Optimize {
        /// Path to the price series snapshot (bincode, or JSON with a .json extension)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: PathBuf,
        /// Path to the JSON settings file
        #[arg(long = "settings-file", value_name = "PATH")]
        settings_file: PathBuf,
        /// Write the JSON report here instead of stdout
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let Cli { command } = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting sr-engine. Backtest results are not a forecast of future returns.");

    match command {
        Commands::Backtest {
            data_file,
            settings_file,
            past_window,
            trade_window,
            output,
        } => {
            backtest::run(
                &data_file,
                &settings_file,
                past_window,
                trade_window,
                output.as_deref(),
            )?;
        }
        Commands::Optimize {
            data_file,
            settings_file,
            output,
        } => {
            optimize::run(&data_file, &settings_file, output.as_deref())?;
        }
    }

    Ok(())
}
