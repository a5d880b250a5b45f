use crate::candle_utils::normalize_symbol;
use crate::config::BacktestOptions;
use crate::data_context::MarketData;
use crate::models::Bar;
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub fn ensure_market_data_file(path: &Path) -> Result<()> {
    if fs::metadata(path).is_ok() {
        return Ok(());
    }

    Err(anyhow!(
        "Market data file not found at {}. Pass --data-file with a JSON bar list or a snapshot written by `export-snapshot`.",
        path.display()
    ))
}

pub fn load_market_data(path: &Path) -> Result<MarketData> {
    ensure_market_data_file(path)?;
    let data = MarketData::load(path, &RunStatus::new())?;
    if !data.has_data() {
        return Err(anyhow!("Market data file {} has no usable bars", path.display()));
    }
    Ok(data)
}

/// Normalized symbol and its bars.
pub fn bars_for_symbol(data: &MarketData, symbol: &str) -> Result<(String, Vec<Bar>)> {
    let symbol = normalize_symbol(symbol).ok_or_else(|| anyhow!("Symbol must not be empty"))?;
    let bars = data
        .bars_for(&symbol)
        .filter(|bars| !bars.is_empty())
        .map(|bars| bars.to_vec())
        .ok_or_else(|| anyhow!("No bars for {} in the market data file", symbol))?;
    Ok((symbol, bars))
}

/// Options from a JSON file, or the defaults.
pub fn load_options(path: Option<&Path>) -> Result<BacktestOptions> {
    let Some(path) = path else {
        return Ok(BacktestOptions::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read backtest options from {}", path.display()))?;
    let options: BacktestOptions = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid backtest options JSON in {}", path.display()))?;
    options.validate()?;
    Ok(options)
}

/// `key=value` pairs into a strategy parameter map.
pub fn parse_parameters(pairs: &[String]) -> Result<HashMap<String, f64>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected key=value, got '{}'", pair))?;
            let value: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("Parameter {} is not a number", key.trim()))?;
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", rendered);
    Ok(())
}
