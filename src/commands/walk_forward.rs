use crate::commands::market_data_snapshot::{
    bars_for_symbol, load_market_data, load_options, print_json,
};
use crate::config::{EngineRuntimeSettings, WalkForwardConfig};
use crate::engine::BacktestEngine;
use crate::run_status::RunStatus;
use crate::strategy::create_strategy;
use crate::walk_forward::WalkForwardHarness;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub fn run(
    settings: EngineRuntimeSettings,
    data_file: &Path,
    symbol: &str,
    strategy_name: &str,
    config: WalkForwardConfig,
    options_file: Option<&Path>,
) -> Result<()> {
    let data = Arc::new(load_market_data(data_file)?);
    let (symbol, bars) = bars_for_symbol(&data, symbol)?;
    let options = load_options(options_file)?;
    let strategy = create_strategy(strategy_name, HashMap::new(), data.clone())?;

    let engine = BacktestEngine::new(settings);
    let report = WalkForwardHarness::new(&engine).run(
        strategy.as_ref(),
        &symbol,
        &bars,
        &config,
        &options,
        &RunStatus::new(),
    )?;
    print_json(&report)
}
