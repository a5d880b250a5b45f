use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use stratalloc::{
    commands::{backtest, consensus, export_market_data, monte_carlo, portfolio, walk_forward},
    config::{EngineRuntimeSettings, WalkForwardConfig},
    models::AnalysisDate,
    monte_carlo::{DEFAULT_SIMULATIONS, DEFAULT_TRADES_PER_SIMULATION},
};

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.json";

#[derive(Parser)]
#[command(name = "stratalloc")]
#[command(about = "Strategy backtesting, robustness analysis and portfolio allocation")]
struct Cli {
    /// Path to the market data file (JSON bars or binary snapshot)
    #[arg(long = "data-file", value_name = "PATH", global = true)]
    data_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one strategy on one symbol
    Backtest {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        strategy: String,
        /// Strategy and risk parameters as key=value (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// JSON file with backtest options; overrides risk parameters given via --param
        #[arg(long, value_name = "PATH")]
        options: Option<PathBuf>,
    },
    /// Backtest a weighted strategy consensus across several symbols
    Portfolio {
        /// Comma separated symbols (defaults to every symbol in the data file)
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Weighted strategies, e.g. rsi=0.6,ma_crossover=0.4
        #[arg(long)]
        strategies: String,
        #[arg(long, value_name = "PATH")]
        options: Option<PathBuf>,
    },
    /// Out-of-sample evaluation over rolling train/test windows
    WalkForward {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        strategy: String,
        #[arg(long, default_value_t = 252)]
        train_days: usize,
        #[arg(long, default_value_t = 63)]
        test_days: usize,
        #[arg(long, default_value_t = 63)]
        step: usize,
        #[arg(long, value_name = "PATH")]
        options: Option<PathBuf>,
    },
    /// Resample a backtest's trade returns to estimate the outcome distribution
    MonteCarlo {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        strategy: String,
        #[arg(long, default_value_t = DEFAULT_SIMULATIONS)]
        simulations: usize,
        #[arg(long, default_value_t = DEFAULT_TRADES_PER_SIMULATION)]
        trades_per_sim: usize,
        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, value_name = "PATH")]
        options: Option<PathBuf>,
    },
    /// Weighted vote of the built-in strategies for one symbol
    Consensus {
        #[arg(long)]
        symbol: String,
        /// Allocation profile (conservative, balanced, aggressive, growth, value, technical)
        #[arg(long)]
        profile: Option<String>,
        /// Market regime adjustment (bull, bear, sideways, volatile)
        #[arg(long)]
        regime: Option<String>,
        /// Analysis date (YYYY-MM-DD, RFC 3339, or "today")
        #[arg(long, default_value = "today")]
        date: AnalysisDate,
    },
    /// Convert a market data file into a binary snapshot
    ExportSnapshot {
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { data_file, command } = Cli::parse();
    let data_file = data_file.unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET_DATA_FILE));
    let settings = EngineRuntimeSettings::from_env()?;

    info!("Starting stratalloc. Simulated results only, not financial advice.");

    match command {
        Commands::Backtest {
            symbol,
            strategy,
            params,
            options,
        } => {
            backtest::run(
                settings,
                &data_file,
                &symbol,
                &strategy,
                &params,
                options.as_deref(),
            )?;
        }
        Commands::Portfolio {
            symbols,
            strategies,
            options,
        } => {
            portfolio::run(settings, &data_file, &symbols, &strategies, options.as_deref())?;
        }
        Commands::WalkForward {
            symbol,
            strategy,
            train_days,
            test_days,
            step,
            options,
        } => {
            let config = WalkForwardConfig {
                train_days,
                test_days,
                step,
            };
            walk_forward::run(
                settings,
                &data_file,
                &symbol,
                &strategy,
                config,
                options.as_deref(),
            )?;
        }
        Commands::MonteCarlo {
            symbol,
            strategy,
            simulations,
            trades_per_sim,
            seed,
            options,
        } => {
            monte_carlo::run(
                settings,
                &data_file,
                &symbol,
                &strategy,
                simulations,
                trades_per_sim,
                seed,
                options.as_deref(),
            )?;
        }
        Commands::Consensus {
            symbol,
            profile,
            regime,
            date,
        } => {
            consensus::run(
                &data_file,
                &symbol,
                date,
                profile.as_deref(),
                regime.as_deref(),
            )?;
        }
        Commands::ExportSnapshot { output } => {
            export_market_data::run(&data_file, &output)?;
        }
    }

    Ok(())
}
