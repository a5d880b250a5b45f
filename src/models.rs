use crate::config::BacktestOptions;
use anyhow::{anyhow, Result as AnyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }
}

impl FromStr for SignalAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(SignalAction::Buy),
            "sell" => Ok(SignalAction::Sell),
            "hold" => Ok(SignalAction::Hold),
            other => Err(anyhow!("Unknown signal action '{}'", other)),
        }
    }
}

const MAJORITY_EPSILON: f64 = 1e-12;

/// A weighted vote carries only with strictly more than half of the
/// normalized weight. An exact 50/50 split stays HOLD despite rounding.
pub fn is_majority(weight: f64) -> bool {
    weight > 0.5 + MAJORITY_EPSILON
}

/// Output of `Strategy::analyze`. `confidence` is a fraction in `0..=1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub action: SignalAction,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl Signal {
    pub fn new(action: SignalAction, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

/// The date a strategy is asked to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisDate {
    Today,
    On(DateTime<Utc>),
}

impl FromStr for AnalysisDate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("today") {
            return Ok(AnalysisDate::Today);
        }
        if let Ok(date) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(AnalysisDate::On(date.with_timezone(&Utc)));
        }
        let day = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map_err(|_| anyhow!("Date must be 'today', RFC 3339 or YYYY-MM-DD (value: {})", s))?;
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("Invalid date {}", s))?;
        Ok(AnalysisDate::On(midnight.and_utc()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub price: f64,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    MaxHoldingDays,
    StrategySignal,
    /// Partial exit at the given profit threshold (fraction, e.g. `0.1`).
    PartialProfit(f64),
    BacktestEnd,
    PortfolioSignal,
}

impl ExitReason {
    pub fn label(&self) -> String {
        match self {
            ExitReason::StopLoss => "stop_loss".to_string(),
            ExitReason::TakeProfit => "take_profit".to_string(),
            ExitReason::TrailingStop => "trailing_stop".to_string(),
            ExitReason::MaxHoldingDays => "max_holding_days".to_string(),
            ExitReason::StrategySignal => "strategy_signal".to_string(),
            ExitReason::PartialProfit(threshold) => {
                let percent = (threshold * 100.0 * 10_000.0).round() / 10_000.0;
                format!("partial_profit_{}", percent)
            }
            ExitReason::BacktestEnd => "backtest_end".to_string(),
            ExitReason::PortfolioSignal => "portfolio_signal".to_string(),
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for ExitReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        match raw {
            "stop_loss" => Ok(ExitReason::StopLoss),
            "take_profit" => Ok(ExitReason::TakeProfit),
            "trailing_stop" => Ok(ExitReason::TrailingStop),
            "max_holding_days" => Ok(ExitReason::MaxHoldingDays),
            "strategy_signal" => Ok(ExitReason::StrategySignal),
            "backtest_end" => Ok(ExitReason::BacktestEnd),
            "portfolio_signal" => Ok(ExitReason::PortfolioSignal),
            other => {
                let percent = other
                    .strip_prefix("partial_profit_")
                    .and_then(|value| value.parse::<f64>().ok())
                    .filter(|value| value.is_finite())
                    .ok_or_else(|| anyhow!("Unknown exit reason '{}'", other))?;
                Ok(ExitReason::PartialProfit(percent / 100.0))
            }
        }
    }
}

impl From<ExitReason> for String {
    fn from(reason: ExitReason) -> Self {
        reason.label()
    }
}

impl TryFrom<String> for ExitReason {
    type Error = anyhow::Error;

    fn try_from(value: String) -> AnyResult<Self> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub symbol: String,
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_date: DateTime<Utc>,
    pub exit_price: f64,
    pub shares: u64,
    pub return_pct: f64,
    pub profit_loss: f64,
    pub holding_days: i64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub average_return: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub expectancy: f64,
    pub average_holding_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub id: String,
    pub strategy_name: String,
    pub symbols: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub initial_capital: f64,
    pub final_capital: f64,
    /// Fractional return over the run (`0.1` = +10%).
    pub total_return: f64,
    pub trades: Vec<ClosedTrade>,
    /// Seeded with the initial capital, then one point per date.
    pub equity_curve: Vec<f64>,
    pub dates: Vec<DateTime<Utc>>,
    pub metrics: PerformanceMetrics,
    pub options_used: BacktestOptions,
}

impl BacktestResult {
    pub fn trade_returns(&self) -> Vec<f64> {
        self.trades.iter().map(|trade| trade.return_pct).collect()
    }

    pub fn realized_profit_loss(&self) -> f64 {
        self.trades.iter().map(|trade| trade.profit_loss).sum()
    }
}
