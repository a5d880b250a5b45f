use crate::data_context::MarketDataProvider;
use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64_clamped, get_usize_param_min};
use crate::strategy_utils::{buy_signal, hold_signal, meets_confidence_threshold, sell_signal};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;

pub struct MACrossoverStrategy {
    name: String,
    fast_period: usize,
    slow_period: usize,
    min_confidence: f64,
    data: Arc<dyn MarketDataProvider>,
}

impl MACrossoverStrategy {
    pub fn new(parameters: HashMap<String, f64>, data: Arc<dyn MarketDataProvider>) -> Self {
        let fast_period = get_usize_param_min(&parameters, "fastPeriod", 10, 1);
        let slow_period = get_usize_param_min(&parameters, "slowPeriod", 30, 2).max(fast_period + 1);
        let min_confidence = get_param_f64_clamped(&parameters, "minConfidence", 0.5, 0.0, 1.0);
        Self {
            name: "MACrossover".to_string(),
            fast_period,
            slow_period,
            min_confidence,
            data,
        }
    }
}

impl super::Strategy for MACrossoverStrategy {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_description(&self) -> &str {
        "Fast/slow simple moving average crossover"
    }

    fn analyze(&self, symbol: &str, date: AnalysisDate) -> Result<Signal> {
        let history =
            super::history_until(self.data.as_ref(), symbol, date, self.get_required_historical_days())?;
        if history.len() < self.slow_period + 1 {
            return Ok(hold_signal("insufficient history"));
        }

        let prices: Vec<f64> = history.iter().map(|bar| bar.close).collect();
        let fast = indicators::calculate_sma(&prices, self.fast_period);
        let slow = indicators::calculate_sma(&prices, self.slow_period);
        let n = prices.len();
        let (current_fast, prev_fast) = (fast[n - 1], fast[n - 2]);
        let (current_slow, prev_slow) = (slow[n - 1], slow[n - 2]);
        let spread = if current_slow.abs() > 0.0 {
            (current_fast - current_slow) / current_slow
        } else {
            0.0
        };
        let confidence = (spread.abs() * 10.0 + 0.5).min(1.0);

        // Fast average crossing above the slow one (bullish)
        if prev_fast <= prev_slow && current_fast > current_slow {
            if meets_confidence_threshold(confidence, self.min_confidence) {
                return Ok(buy_signal(confidence, "fast average crossed above slow average")
                    .with_metric("spread", spread));
            }
        }

        // Fast average crossing below the slow one (bearish)
        if prev_fast >= prev_slow && current_fast < current_slow {
            if meets_confidence_threshold(confidence, self.min_confidence) {
                return Ok(sell_signal(confidence, "fast average crossed below slow average")
                    .with_metric("spread", spread));
            }
        }

        Ok(hold_signal("no crossover").with_metric("spread", spread))
    }

    fn get_parameters(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("fastPeriod".to_string(), self.fast_period as f64),
            ("slowPeriod".to_string(), self.slow_period as f64),
            ("minConfidence".to_string(), self.min_confidence),
        ])
    }

    fn set_parameters(&mut self, parameters: &HashMap<String, f64>) -> Result<()> {
        let fast = get_usize_param_min(parameters, "fastPeriod", self.fast_period, 1);
        let slow = get_usize_param_min(parameters, "slowPeriod", self.slow_period, 2);
        if fast >= slow {
            return Err(anyhow!(
                "fastPeriod ({}) must be shorter than slowPeriod ({})",
                fast,
                slow
            ));
        }
        self.fast_period = fast;
        self.slow_period = slow;
        self.min_confidence =
            get_param_f64_clamped(parameters, "minConfidence", self.min_confidence, 0.0, 1.0);
        Ok(())
    }

    fn get_required_historical_days(&self) -> usize {
        self.slow_period + 1
    }
}
