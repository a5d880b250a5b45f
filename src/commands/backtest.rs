use crate::commands::market_data_snapshot::{
    bars_for_symbol, load_market_data, load_options, parse_parameters, print_json,
};
use crate::config::{BacktestOptions, EngineRuntimeSettings};
use crate::engine::BacktestEngine;
use crate::strategy::create_strategy;
use anyhow::Result;
use log::info;
use std::path::Path;
use std::sync::Arc;

pub fn run(
    settings: EngineRuntimeSettings,
    data_file: &Path,
    symbol: &str,
    strategy_name: &str,
    parameters: &[String],
    options_file: Option<&Path>,
) -> Result<()> {
    let data = Arc::new(load_market_data(data_file)?);
    let (symbol, bars) = bars_for_symbol(&data, symbol)?;
    let parameters = parse_parameters(parameters)?;
    // Risk controls come from the options file, or from the same key=value
    // parameters the strategy reads.
    let options = match options_file {
        Some(_) => load_options(options_file)?,
        None => BacktestOptions::from_parameters(&parameters),
    };
    let strategy = create_strategy(strategy_name, parameters, data.clone())?;

    info!(
        "Running {} on {} ({} bars)",
        strategy.get_name(),
        symbol,
        bars.len()
    );
    let engine = BacktestEngine::new(settings);
    let result = engine.run_backtest(strategy.as_ref(), &symbol, &bars, &options)?;
    print_json(&result)
}
