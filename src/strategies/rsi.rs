use crate::data_context::MarketDataProvider;
use crate::indicators;
use crate::models::*;
use crate::param_utils::{get_param_f64_clamped, get_usize_param_min};
use crate::strategy_utils::{buy_signal, hold_signal, meets_confidence_threshold, sell_signal};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

pub struct RSIStrategy {
    name: String,
    period: usize,
    oversold_level: f64,
    overbought_level: f64,
    min_confidence: f64,
    data: Arc<dyn MarketDataProvider>,
}

impl RSIStrategy {
    pub fn new(parameters: HashMap<String, f64>, data: Arc<dyn MarketDataProvider>) -> Self {
        let mut strategy = Self {
            name: "RSI".to_string(),
            period: 14,
            oversold_level: 30.0,
            overbought_level: 70.0,
            min_confidence: 0.6,
            data,
        };
        strategy.apply_parameters(&parameters);
        strategy
    }

    fn apply_parameters(&mut self, parameters: &HashMap<String, f64>) {
        self.period = get_usize_param_min(parameters, "period", self.period, 2);
        self.oversold_level =
            get_param_f64_clamped(parameters, "oversoldLevel", self.oversold_level, 0.0, 100.0);
        self.overbought_level = get_param_f64_clamped(
            parameters,
            "overboughtLevel",
            self.overbought_level,
            0.0,
            100.0,
        );
        self.min_confidence =
            get_param_f64_clamped(parameters, "minConfidence", self.min_confidence, 0.0, 1.0);
    }
}

impl super::Strategy for RSIStrategy {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_description(&self) -> &str {
        "Mean reversion on Wilder RSI extremes"
    }

    fn analyze(&self, symbol: &str, date: AnalysisDate) -> Result<Signal> {
        let history =
            super::history_until(self.data.as_ref(), symbol, date, self.get_required_historical_days())?;
        if history.len() < self.period + 1 {
            return Ok(hold_signal("insufficient history"));
        }

        let closes: Vec<f64> = history.iter().map(|bar| bar.close).collect();
        let current_rsi = indicators::calculate_rsi(&closes, self.period)
            .last()
            .copied()
            .unwrap_or(50.0);

        // Buy signal: RSI is oversold
        if current_rsi < self.oversold_level && self.oversold_level > 0.0 {
            let confidence =
                ((self.oversold_level - current_rsi) / self.oversold_level + 0.5).min(1.0);
            if meets_confidence_threshold(confidence, self.min_confidence) {
                return Ok(buy_signal(confidence, format!("RSI {:.1} is oversold", current_rsi))
                    .with_metric("rsi", current_rsi));
            }
        }

        // Sell signal: RSI is overbought
        if current_rsi > self.overbought_level && self.overbought_level < 100.0 {
            let confidence =
                ((current_rsi - self.overbought_level) / (100.0 - self.overbought_level) + 0.5)
                    .min(1.0);
            if meets_confidence_threshold(confidence, self.min_confidence) {
                return Ok(
                    sell_signal(confidence, format!("RSI {:.1} is overbought", current_rsi))
                        .with_metric("rsi", current_rsi),
                );
            }
        }

        Ok(hold_signal(format!("RSI {:.1} is neutral", current_rsi)).with_metric("rsi", current_rsi))
    }

    fn get_parameters(&self) -> HashMap<String, f64> {
        HashMap::from([
            ("period".to_string(), self.period as f64),
            ("oversoldLevel".to_string(), self.oversold_level),
            ("overboughtLevel".to_string(), self.overbought_level),
            ("minConfidence".to_string(), self.min_confidence),
        ])
    }

    fn set_parameters(&mut self, parameters: &HashMap<String, f64>) -> Result<()> {
        self.apply_parameters(parameters);
        Ok(())
    }

    fn get_required_historical_days(&self) -> usize {
        self.period.max(50)
    }
}
