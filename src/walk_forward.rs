use crate::config::{BacktestOptions, WalkForwardConfig};
use crate::engine::BacktestEngine;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::performance::PerformanceCalculator;
use crate::run_status::RunStatus;
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardPeriod {
    pub index: usize,
    /// `None` when the train window is empty.
    pub train_start: Option<DateTime<Utc>>,
    pub train_end: Option<DateTime<Utc>>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub trade_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardSummary {
    pub total_periods: usize,
    pub profitable_periods: usize,
    pub average_return: f64,
    pub best_period_return: f64,
    pub worst_period_return: f64,
    pub average_sharpe: f64,
    pub average_max_drawdown: f64,
    /// Share of periods with a positive return.
    pub consistency: f64,
}

impl WalkForwardSummary {
    pub fn from_periods(periods: &[WalkForwardPeriod]) -> Self {
        if periods.is_empty() {
            return Self::default();
        }
        let returns: Vec<f64> = periods.iter().map(|p| p.total_return).collect();
        let sharpes: Vec<f64> = periods.iter().map(|p| p.sharpe_ratio).collect();
        let drawdowns: Vec<f64> = periods.iter().map(|p| p.max_drawdown).collect();
        let profitable_periods = returns.iter().filter(|r| **r > 0.0).count();

        Self {
            total_periods: periods.len(),
            profitable_periods,
            average_return: PerformanceCalculator::average(&returns),
            best_period_return: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_period_return: returns.iter().copied().fold(f64::INFINITY, f64::min),
            average_sharpe: PerformanceCalculator::average(&sharpes),
            average_max_drawdown: PerformanceCalculator::average(&drawdowns),
            consistency: profitable_periods as f64 / periods.len() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardReport {
    pub symbol: String,
    pub strategy_name: String,
    pub train_days: usize,
    pub test_days: usize,
    pub step: usize,
    pub periods: Vec<WalkForwardPeriod>,
    pub all_trades: Vec<ClosedTrade>,
    pub summary: WalkForwardSummary,
}

/// Rolls a train/test window across one symbol's bars and backtests every
/// test slice on its own. The train slice only positions the window; the
/// strategy is not refitted.
pub struct WalkForwardHarness<'a> {
    engine: &'a BacktestEngine,
}

impl<'a> WalkForwardHarness<'a> {
    pub fn new(engine: &'a BacktestEngine) -> Self {
        Self { engine }
    }

    /// Number of windows `config` yields over `bar_count` bars.
    pub fn period_count(bar_count: usize, config: &WalkForwardConfig) -> usize {
        let span = config.train_days + config.test_days;
        if config.step == 0 || bar_count < span {
            return 0;
        }
        (bar_count - span) / config.step + 1
    }

    pub fn run(
        &self,
        strategy: &dyn Strategy,
        symbol: &str,
        bars: &[Bar],
        config: &WalkForwardConfig,
        options: &BacktestOptions,
        status: &RunStatus,
    ) -> EngineResult<WalkForwardReport> {
        config.validate()?;
        options.validate()?;
        let expected = Self::period_count(bars.len(), config);
        status.set_phase(format!("walk-forward {} on {}", strategy.get_name(), symbol));
        status.set_progress(expected, 0);

        let mut periods = Vec::with_capacity(expected);
        let mut all_trades = Vec::new();
        let mut start = 0;
        while start + config.train_days + config.test_days <= bars.len() {
            if status.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let test_start = start + config.train_days;
            let test_end = test_start + config.test_days;

            match self.engine.run_backtest(
                strategy,
                symbol,
                &bars[test_start..test_end],
                options,
            ) {
                Ok(result) => {
                    let (train_start, train_end) = if config.train_days > 0 {
                        (Some(bars[start].date), Some(bars[test_start - 1].date))
                    } else {
                        (None, None)
                    };
                    let period = WalkForwardPeriod {
                        index: periods.len(),
                        train_start,
                        train_end,
                        test_start: bars[test_start].date,
                        test_end: bars[test_end - 1].date,
                        total_return: result.total_return,
                        sharpe_ratio: result.metrics.sharpe_ratio,
                        max_drawdown: result.metrics.max_drawdown,
                        trade_count: result.trades.len(),
                    };
                    info!(
                        "Walk-forward period {} ({} - {}): return {:.2}%, {} trades",
                        period.index,
                        period.test_start.format("%Y-%m-%d"),
                        period.test_end.format("%Y-%m-%d"),
                        period.total_return * 100.0,
                        period.trade_count
                    );
                    all_trades.extend(result.trades);
                    periods.push(period);
                }
                Err(EngineError::InsufficientData {
                    required,
                    available,
                    ..
                }) => {
                    warn!(
                        "Skipping walk-forward window starting at bar {}: {} bars of history, {} required",
                        test_start, available, required
                    );
                }
                Err(err) => return Err(err),
            }

            status.increment_completed();
            start += config.step;
        }

        let summary = WalkForwardSummary::from_periods(&periods);
        info!(
            "Walk-forward of {} on {}: {} periods, consistency {:.0}%",
            strategy.get_name(),
            symbol,
            summary.total_periods,
            summary.consistency * 100.0
        );

        Ok(WalkForwardReport {
            symbol: symbol.to_string(),
            strategy_name: strategy.get_name().to_string(),
            train_days: config.train_days,
            test_days: config.test_days,
            step: config.step,
            periods,
            all_trades,
            summary,
        })
    }
}
