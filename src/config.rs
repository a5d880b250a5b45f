use crate::error::{EngineError, EngineResult};
use crate::ledger::level_key;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_SLIPPAGE_RATE: f64 = 0.0005;
pub const DEFAULT_COMMISSION_RATE: f64 = 0.001;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.03;
pub const DEFAULT_MAX_POSITIONS: usize = 5;
const MAX_PROFIT_LEVEL_PARAMS: usize = 5;

const SETTING_KEYS: [&str; 5] = [
    "BACKTEST_INITIAL_CAPITAL",
    "TRADE_SLIPPAGE_RATE",
    "TRADE_COMMISSION_RATE",
    "RISK_FREE_RATE",
    "PORTFOLIO_MAX_POSITIONS",
];

/// One rung of the partial profit ladder. `sell_fraction` is relative to the
/// position's original share count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitLevel {
    #[serde(alias = "profit_threshold")]
    pub profit_threshold: f64,
    #[serde(alias = "sell_fraction")]
    pub sell_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BacktestOptions {
    #[serde(alias = "position_size")]
    pub position_size: f64,
    #[serde(alias = "stop_loss")]
    pub stop_loss: Option<f64>,
    #[serde(alias = "take_profit")]
    pub take_profit: Option<f64>,
    #[serde(alias = "max_holding_days")]
    pub max_holding_days: Option<i64>,
    #[serde(alias = "trailing_stop")]
    pub trailing_stop: bool,
    #[serde(alias = "trailing_stop_activation")]
    pub trailing_stop_activation: f64,
    #[serde(alias = "trailing_stop_distance")]
    pub trailing_stop_distance: f64,
    #[serde(alias = "partial_profit_taking")]
    pub partial_profit_taking: bool,
    #[serde(alias = "profit_levels")]
    pub profit_levels: Vec<ProfitLevel>,
    #[serde(alias = "max_positions")]
    pub max_positions: Option<usize>,
    #[serde(alias = "initial_capital")]
    pub initial_capital: Option<f64>,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            position_size: 0.1,
            stop_loss: None,
            take_profit: None,
            max_holding_days: None,
            trailing_stop: false,
            trailing_stop_activation: 0.05,
            trailing_stop_distance: 0.10,
            partial_profit_taking: false,
            profit_levels: Vec::new(),
            max_positions: None,
            initial_capital: None,
        }
    }
}

impl BacktestOptions {
    /// Build options from a flat parameter map. Risk controls that are absent or
    /// non-positive stay disabled.
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        use crate::param_utils::*;

        let defaults = Self::default();
        let mut profit_levels = Vec::new();
        for n in 1..=MAX_PROFIT_LEVEL_PARAMS {
            let threshold = parameters.get(&format!("profitLevel{}Threshold", n)).copied();
            let fraction = parameters.get(&format!("profitLevel{}Fraction", n)).copied();
            if let (Some(profit_threshold), Some(sell_fraction)) = (threshold, fraction) {
                profit_levels.push(ProfitLevel {
                    profit_threshold,
                    sell_fraction,
                });
            }
        }

        Self {
            position_size: get_param(parameters, "positionSize", defaults.position_size),
            stop_loss: get_positive_param(parameters, "stopLoss"),
            take_profit: get_positive_param(parameters, "takeProfit"),
            max_holding_days: get_positive_param(parameters, "maxHoldingDays")
                .map(|days| days.round() as i64),
            trailing_stop: get_param(parameters, "trailingStop", 0.0) >= 0.5,
            trailing_stop_activation: get_param(
                parameters,
                "trailingStopActivation",
                defaults.trailing_stop_activation,
            ),
            trailing_stop_distance: get_param(
                parameters,
                "trailingStopDistance",
                defaults.trailing_stop_distance,
            ),
            partial_profit_taking: get_param(parameters, "partialProfitTaking", 0.0) >= 0.5,
            profit_levels,
            max_positions: get_positive_param(parameters, "maxPositions")
                .map(|value| value.round() as usize),
            initial_capital: get_positive_param(parameters, "initialCapital"),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.position_size.is_finite() || self.position_size <= 0.0 || self.position_size > 1.0
        {
            return Err(EngineError::InvalidOptions(format!(
                "position_size must be in (0, 1] (value: {})",
                self.position_size
            )));
        }
        for (name, value) in [("stop_loss", self.stop_loss), ("take_profit", self.take_profit)] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(EngineError::InvalidOptions(format!(
                        "{} must be a non-negative fraction (value: {})",
                        name, value
                    )));
                }
            }
        }
        if let Some(days) = self.max_holding_days {
            if days < 0 {
                return Err(EngineError::InvalidOptions(format!(
                    "max_holding_days must be >= 0 (value: {})",
                    days
                )));
            }
        }
        if self.trailing_stop {
            if !self.trailing_stop_activation.is_finite() || self.trailing_stop_activation < 0.0 {
                return Err(EngineError::InvalidOptions(format!(
                    "trailing_stop_activation must be >= 0 (value: {})",
                    self.trailing_stop_activation
                )));
            }
            if !self.trailing_stop_distance.is_finite()
                || self.trailing_stop_distance < 0.0
                || self.trailing_stop_distance >= 1.0
            {
                return Err(EngineError::InvalidOptions(format!(
                    "trailing_stop_distance must be in [0, 1) (value: {})",
                    self.trailing_stop_distance
                )));
            }
        }
        // Rungs are tracked per basis point, so two thresholds must differ there.
        let mut previous_key: Option<i64> = None;
        for level in &self.profit_levels {
            let key = level_key(level.profit_threshold);
            if !level.profit_threshold.is_finite() || previous_key.is_some_and(|prev| key <= prev) {
                return Err(EngineError::InvalidOptions(
                    "profit levels must have finite thresholds ascending by at least one basis point"
                        .to_string(),
                ));
            }
            if !level.sell_fraction.is_finite()
                || level.sell_fraction <= 0.0
                || level.sell_fraction > 1.0
            {
                return Err(EngineError::InvalidOptions(format!(
                    "sell_fraction must be in (0, 1] (value: {})",
                    level.sell_fraction
                )));
            }
            previous_key = Some(key);
        }
        if let Some(capital) = self.initial_capital {
            if !capital.is_finite() || capital <= 0.0 {
                return Err(EngineError::InvalidOptions(format!(
                    "initial_capital must be positive (value: {})",
                    capital
                )));
            }
        }
        if self.max_positions == Some(0) {
            return Err(EngineError::InvalidOptions(
                "max_positions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Execution and evaluation settings shared by every run of an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRuntimeSettings {
    pub initial_capital: f64,
    pub slippage_rate: f64,
    pub commission_rate: f64,
    /// Annual rate; Sharpe ratios use `risk_free_rate / 252` per period.
    pub risk_free_rate: f64,
    pub max_positions: usize,
}

impl Default for EngineRuntimeSettings {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            slippage_rate: DEFAULT_SLIPPAGE_RATE,
            commission_rate: DEFAULT_COMMISSION_RATE,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            max_positions: DEFAULT_MAX_POSITIONS,
        }
    }
}

impl EngineRuntimeSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let initial_capital = setting_f64_or(
            settings,
            "BACKTEST_INITIAL_CAPITAL",
            DEFAULT_INITIAL_CAPITAL,
            Some(f64::MIN_POSITIVE),
            None,
        )?;
        let slippage_rate = setting_f64_or(
            settings,
            "TRADE_SLIPPAGE_RATE",
            DEFAULT_SLIPPAGE_RATE,
            Some(0.0),
            Some(1.0),
        )?;
        let commission_rate = setting_f64_or(
            settings,
            "TRADE_COMMISSION_RATE",
            DEFAULT_COMMISSION_RATE,
            Some(0.0),
            Some(1.0),
        )?;
        let risk_free_rate = setting_f64_or(
            settings,
            "RISK_FREE_RATE",
            DEFAULT_RISK_FREE_RATE,
            Some(0.0),
            Some(1.0),
        )?;
        let max_positions =
            setting_usize_or(settings, "PORTFOLIO_MAX_POSITIONS", DEFAULT_MAX_POSITIONS, 1)?;

        Ok(Self {
            initial_capital,
            slippage_rate,
            commission_rate,
            risk_free_rate,
            max_positions,
        })
    }

    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = SETTING_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Self::from_settings_map(&settings)
    }

    pub fn daily_risk_free_rate(&self) -> f64 {
        self.risk_free_rate / 252.0
    }
}

/// Rolling window geometry for walk-forward runs, in bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardConfig {
    pub train_days: usize,
    pub test_days: usize,
    pub step: usize,
}

impl WalkForwardConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.test_days == 0 {
            return Err(EngineError::InvalidConfig(
                "walk-forward test_days must be at least 1".to_string(),
            ));
        }
        if self.step == 0 {
            return Err(EngineError::InvalidConfig(
                "walk-forward step must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_f64_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn setting_usize_or(
    settings: &HashMap<String, String>,
    key: &str,
    default: usize,
    min: usize,
) -> Result<usize> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            raw
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn runtime_settings_fall_back_to_defaults() {
        let parsed = EngineRuntimeSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed, EngineRuntimeSettings::default());
        assert!((parsed.daily_risk_free_rate() - 0.03 / 252.0).abs() < 1e-15);
    }

    #[test]
    fn runtime_settings_reject_malformed_values() {
        let err = EngineRuntimeSettings::from_settings_map(&settings(&[(
            "TRADE_SLIPPAGE_RATE",
            "lots",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("TRADE_SLIPPAGE_RATE"));

        assert!(EngineRuntimeSettings::from_settings_map(&settings(&[(
            "TRADE_COMMISSION_RATE",
            "-0.01"
        )]))
        .is_err());
        assert!(EngineRuntimeSettings::from_settings_map(&settings(&[(
            "PORTFOLIO_MAX_POSITIONS",
            "2.5"
        )]))
        .is_err());
    }

    #[test]
    fn runtime_settings_parse_overrides() {
        let parsed = EngineRuntimeSettings::from_settings_map(&settings(&[
            ("BACKTEST_INITIAL_CAPITAL", "25000"),
            ("TRADE_SLIPPAGE_RATE", "0"),
            ("PORTFOLIO_MAX_POSITIONS", " 3 "),
        ]))
        .unwrap();
        assert_eq!(parsed.initial_capital, 25_000.0);
        assert_eq!(parsed.slippage_rate, 0.0);
        assert_eq!(parsed.commission_rate, DEFAULT_COMMISSION_RATE);
        assert_eq!(parsed.max_positions, 3);
    }

    #[test]
    fn options_deserialize_from_either_key_style() {
        let camel: BacktestOptions = serde_json::from_str(
            r#"{"positionSize":0.5,"stopLoss":0.1,"profitLevels":[{"profitThreshold":0.1,"sellFraction":0.5}]}"#,
        )
        .unwrap();
        let snake: BacktestOptions = serde_json::from_str(
            r#"{"position_size":0.5,"stop_loss":0.1,"profit_levels":[{"profit_threshold":0.1,"sell_fraction":0.5}]}"#,
        )
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.take_profit, None);
        assert!(!camel.trailing_stop);
    }

    #[test]
    fn options_from_parameters_reads_ladder() {
        let mut parameters = HashMap::new();
        parameters.insert("positionSize".to_string(), 0.25);
        parameters.insert("stopLoss".to_string(), 0.08);
        parameters.insert("takeProfit".to_string(), 0.0);
        parameters.insert("trailingStop".to_string(), 1.0);
        parameters.insert("partialProfitTaking".to_string(), 1.0);
        parameters.insert("profitLevel1Threshold".to_string(), 0.1);
        parameters.insert("profitLevel1Fraction".to_string(), 0.5);
        parameters.insert("profitLevel2Threshold".to_string(), 0.2);

        let options = BacktestOptions::from_parameters(&parameters);
        assert_eq!(options.position_size, 0.25);
        assert_eq!(options.stop_loss, Some(0.08));
        assert_eq!(options.take_profit, None);
        assert!(options.trailing_stop);
        assert_eq!(options.profit_levels.len(), 1);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn options_validation_rejects_bad_inputs() {
        let mut options = BacktestOptions {
            position_size: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(EngineError::InvalidOptions(_))
        ));

        options.position_size = 0.5;
        options.profit_levels = vec![
            ProfitLevel {
                profit_threshold: 0.2,
                sell_fraction: 0.5,
            },
            ProfitLevel {
                profit_threshold: 0.1,
                sell_fraction: 0.5,
            },
        ];
        assert!(options.validate().is_err());

        options.profit_levels = vec![
            ProfitLevel {
                profit_threshold: 0.10001,
                sell_fraction: 0.5,
            },
            ProfitLevel {
                profit_threshold: 0.10004,
                sell_fraction: 0.5,
            },
        ];
        assert!(matches!(
            options.validate(),
            Err(EngineError::InvalidOptions(_))
        ));
        options.profit_levels[1].profit_threshold = 0.1001;
        assert!(options.validate().is_ok());

        options.profit_levels.clear();
        options.max_positions = Some(0);
        assert!(options.validate().is_err());
    }

    #[test]
    fn walk_forward_config_requires_progress() {
        let config = WalkForwardConfig {
            train_days: 10,
            test_days: 5,
            step: 0,
        };
        assert!(config.validate().is_err());
        assert!(WalkForwardConfig { step: 5, ..config }.validate().is_ok());
    }
}
