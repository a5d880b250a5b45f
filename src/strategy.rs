use crate::data_context::MarketDataProvider;
use crate::error::EngineError;
use crate::models::*;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Pluggable signal source. Implementations read whatever history they need
/// from their own data provider; the engine only hands them a symbol and a date.
pub trait Strategy: Send + Sync {
    fn get_name(&self) -> &str;
    fn get_description(&self) -> &str {
        ""
    }
    fn analyze(&self, symbol: &str, date: AnalysisDate) -> Result<Signal>;
    fn get_parameters(&self) -> HashMap<String, f64> {
        HashMap::new()
    }
    fn set_parameters(&mut self, _parameters: &HashMap<String, f64>) -> Result<()> {
        Ok(())
    }
    fn can_execute(&self, _symbol: &str) -> bool {
        true
    }
    /// Bars of history the strategy needs before its signals are meaningful.
    fn get_required_historical_days(&self) -> usize;
}

#[path = "strategies/rsi.rs"]
pub mod rsi;

pub use rsi::RSIStrategy;

#[path = "strategies/ma_crossover.rs"]
pub mod ma_crossover;

pub use ma_crossover::MACrossoverStrategy;

#[path = "strategies/buy_and_hold.rs"]
pub mod buy_and_hold;

pub use buy_and_hold::BuyAndHoldStrategy;

pub const AVAILABLE_STRATEGIES: [&str; 3] = ["rsi", "ma_crossover", "buy_and_hold"];

pub fn create_strategy(
    name: &str,
    parameters: HashMap<String, f64>,
    data: Arc<dyn MarketDataProvider>,
) -> Result<Box<dyn Strategy>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "rsi" => Ok(Box::new(RSIStrategy::new(parameters, data))),
        "ma_crossover" | "macrossover" => Ok(Box::new(MACrossoverStrategy::new(parameters, data))),
        "buy_and_hold" | "buyandhold" => Ok(Box::new(BuyAndHoldStrategy::new())),
        _ => Err(EngineError::UnknownStrategy(name.to_string()).into()),
    }
}

/// History window ending at `date` (inclusive), at most `lookback` bars.
pub(crate) fn history_until(
    data: &dyn MarketDataProvider,
    symbol: &str,
    date: AnalysisDate,
    lookback: usize,
) -> Result<Vec<Bar>> {
    let end = match date {
        AnalysisDate::Today => None,
        AnalysisDate::On(date) => Some(date),
    };
    data.get_historical_prices(symbol, None, end, Some(lookback))
}
