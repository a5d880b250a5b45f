use crate::candle_utils::normalize_symbol;
use crate::commands::market_data_snapshot::{load_market_data, load_options, print_json};
use crate::config::EngineRuntimeSettings;
use crate::engine::BacktestEngine;
use crate::models::Bar;
use crate::strategy::{create_strategy, Strategy};
use anyhow::{anyhow, Context, Result};
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// `rsi=0.6,ma_crossover=0.4` into (name, weight) pairs.
pub fn parse_strategy_weights(spec: &str) -> Result<Vec<(String, f64)>> {
    spec.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, weight)) => {
                let weight: f64 = weight
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid weight for strategy {}", name.trim()))?;
                Ok((name.trim().to_string(), weight))
            }
            None => Ok((entry.to_string(), 1.0)),
        })
        .collect()
}

pub fn run(
    settings: EngineRuntimeSettings,
    data_file: &Path,
    symbols: &[String],
    strategies: &str,
    options_file: Option<&Path>,
) -> Result<()> {
    let data = Arc::new(load_market_data(data_file)?);
    let options = load_options(options_file)?;
    let weighted = parse_strategy_weights(strategies)?;
    if weighted.is_empty() {
        return Err(anyhow!("At least one strategy is required"));
    }

    let wanted: Vec<String> = symbols.iter().filter_map(|s| normalize_symbol(s)).collect();
    let bars_by_symbol: HashMap<String, Vec<Bar>> = data
        .bars_by_symbol()
        .iter()
        .filter(|(symbol, _)| wanted.is_empty() || wanted.contains(symbol))
        .map(|(symbol, bars)| (symbol.clone(), bars.clone()))
        .collect();
    if bars_by_symbol.is_empty() {
        return Err(anyhow!("None of the requested symbols have market data"));
    }

    let mut owned: Vec<(Box<dyn Strategy>, f64)> = Vec::with_capacity(weighted.len());
    for (name, weight) in weighted {
        owned.push((create_strategy(&name, HashMap::new(), data.clone())?, weight));
    }
    let borrowed: Vec<(&dyn Strategy, f64)> = owned
        .iter()
        .map(|(strategy, weight)| (strategy.as_ref(), *weight))
        .collect();

    info!(
        "Running portfolio backtest over {} symbols with {} strategies",
        bars_by_symbol.len(),
        borrowed.len()
    );
    let engine = BacktestEngine::new(settings);
    let result = engine.run_portfolio_backtest(&borrowed, &bars_by_symbol, &options)?;
    print_json(&result)
}
