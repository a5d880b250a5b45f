use crate::commands::market_data_snapshot::{
    bars_for_symbol, load_market_data, load_options, print_json,
};
use crate::config::EngineRuntimeSettings;
use crate::engine::BacktestEngine;
use crate::monte_carlo::MonteCarloSimulator;
use crate::run_status::RunStatus;
use crate::strategy::create_strategy;
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[allow(clippy::too_many_arguments)]
pub fn run(
    settings: EngineRuntimeSettings,
    data_file: &Path,
    symbol: &str,
    strategy_name: &str,
    simulations: usize,
    trades_per_simulation: usize,
    seed: Option<u64>,
    options_file: Option<&Path>,
) -> Result<()> {
    let data = Arc::new(load_market_data(data_file)?);
    let (symbol, bars) = bars_for_symbol(&data, symbol)?;
    let options = load_options(options_file)?;
    let strategy = create_strategy(strategy_name, HashMap::new(), data.clone())?;

    let engine = BacktestEngine::new(settings);
    let backtest = engine.run_backtest(strategy.as_ref(), &symbol, &bars, &options)?;
    info!(
        "Resampling {} closed trades of {} on {}",
        backtest.trades.len(),
        strategy.get_name(),
        symbol
    );
    let summary = MonteCarloSimulator::new(seed).run_on_backtest(
        &backtest,
        simulations,
        trades_per_simulation,
        &RunStatus::new(),
    )?;
    print_json(&summary)
}
