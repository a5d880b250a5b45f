use crate::models::*;
use anyhow::Result;

/// Always votes BUY. Used as the benchmark every other strategy is compared to.
pub struct BuyAndHoldStrategy {
    name: String,
}

impl BuyAndHoldStrategy {
    pub fn new() -> Self {
        Self {
            name: "BuyAndHold".to_string(),
        }
    }
}

impl Default for BuyAndHoldStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl super::Strategy for BuyAndHoldStrategy {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_description(&self) -> &str {
        "Benchmark: buy on the first bar and hold"
    }

    fn analyze(&self, _symbol: &str, _date: AnalysisDate) -> Result<Signal> {
        Ok(Signal::new(SignalAction::Buy, 1.0, "buy and hold"))
    }

    fn get_required_historical_days(&self) -> usize {
        0
    }
}
