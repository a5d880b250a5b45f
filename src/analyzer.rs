use crate::config::DEFAULT_RISK_FREE_RATE;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::performance::{PerformanceCalculator, TradeSample, TRADING_DAYS_PER_YEAR};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const MIN_EXPECTANCY: f64 = 0.0;
const MIN_WIN_RATE: f64 = 0.40;
const MIN_SHARPE: f64 = 0.5;
const CORRELATION_PENALTY_BASE: f64 = 1.5;

/// Raw fills of a trade recorded outside the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeInput {
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_date: DateTime<Utc>,
    pub exit_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedTrade {
    pub symbol: String,
    pub strategy: String,
    pub entry_date: DateTime<Utc>,
    pub exit_date: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub return_pct: f64,
    pub profit_loss: f64,
    pub holding_days: i64,
}

impl RecordedTrade {
    fn sample(&self) -> TradeSample {
        TradeSample {
            return_pct: self.return_pct,
            profit_loss: self.profit_loss,
            holding_days: self.holding_days as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyFilter {
    All,
    Named(String),
}

impl StrategyFilter {
    fn matches(&self, strategy: &str) -> bool {
        match self {
            StrategyFilter::All => true,
            StrategyFilter::Named(name) => name == strategy,
        }
    }
}

impl From<&str> for StrategyFilter {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("all") {
            StrategyFilter::All
        } else {
            StrategyFilter::Named(value.to_string())
        }
    }
}

/// Pairwise Pearson correlation of strategy return sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationMatrix {
    pub strategies: Vec<String>,
    pub values: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.values.get(a).and_then(|row| row.get(b)).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRanking {
    pub strategy: String,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimalCombination {
    pub strategies: Vec<String>,
    pub weights: BTreeMap<String, f64>,
    pub expected_sharpe: f64,
    /// `(1 − mean pairwise correlation) × 100`.
    pub diversification_benefit: f64,
}

/// Owned trade history keyed by strategy, plus the metrics and combination
/// search built on it.
#[derive(Debug, Clone)]
pub struct PerformanceAnalyzer {
    trades: Vec<RecordedTrade>,
    daily_risk_free: f64,
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_RISK_FREE_RATE)
    }
}

impl PerformanceAnalyzer {
    /// `annual_risk_free` is converted to a per-day rate over 252 trading days.
    pub fn new(annual_risk_free: f64) -> Self {
        Self {
            trades: Vec::new(),
            daily_risk_free: annual_risk_free / TRADING_DAYS_PER_YEAR,
        }
    }

    pub fn record_trade(&mut self, symbol: &str, strategy: &str, trade: TradeInput) -> &RecordedTrade {
        let return_pct = if trade.entry_price > 0.0 {
            (trade.exit_price - trade.entry_price) / trade.entry_price
        } else {
            0.0
        };
        let holding_days = (trade.exit_date - trade.entry_date).num_days().max(0);
        self.push(RecordedTrade {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            entry_date: trade.entry_date,
            exit_date: trade.exit_date,
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            return_pct,
            profit_loss: trade.exit_price - trade.entry_price,
            holding_days,
        })
    }

    /// Import every closed trade of a backtest under `strategy`, keeping the
    /// engine's net figures.
    pub fn record_backtest(&mut self, strategy: &str, result: &BacktestResult) -> usize {
        for trade in &result.trades {
            self.push(RecordedTrade {
                symbol: trade.symbol.clone(),
                strategy: strategy.to_string(),
                entry_date: trade.entry_date,
                exit_date: trade.exit_date,
                entry_price: trade.entry_price,
                exit_price: trade.exit_price,
                return_pct: trade.return_pct,
                profit_loss: trade.profit_loss,
                holding_days: trade.holding_days,
            });
        }
        debug!(
            "Recorded {} trades from backtest {} as {}",
            result.trades.len(),
            result.id,
            strategy
        );
        result.trades.len()
    }

    fn push(&mut self, trade: RecordedTrade) -> &RecordedTrade {
        self.trades.push(trade);
        &self.trades[self.trades.len() - 1]
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    pub fn trades(&self) -> &[RecordedTrade] {
        &self.trades
    }

    pub fn clear(&mut self) {
        self.trades.clear();
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.trades
            .iter()
            .map(|trade| trade.strategy.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Metrics for the filtered trades in recording order. No matching trades
    /// gives the all-zero metrics.
    pub fn analyze_strategy(&self, filter: &StrategyFilter) -> PerformanceMetrics {
        let samples: Vec<TradeSample> = self
            .trades
            .iter()
            .filter(|trade| filter.matches(&trade.strategy))
            .map(RecordedTrade::sample)
            .collect();
        PerformanceCalculator::calculate_metrics(&samples, self.daily_risk_free)
    }

    fn returns_by_strategy(&self) -> BTreeMap<String, Vec<f64>> {
        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for trade in &self.trades {
            grouped
                .entry(trade.strategy.clone())
                .or_default()
                .push(trade.return_pct);
        }
        grouped
    }

    /// Correlations compare return sequences by position, truncated to the
    /// shorter sequence.
    pub fn calculate_strategy_correlations(&self) -> CorrelationMatrix {
        let returns = self.returns_by_strategy();
        let strategies: Vec<String> = returns.keys().cloned().collect();
        let mut values: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for a in &strategies {
            let row = values.entry(a.clone()).or_default();
            for b in &strategies {
                let correlation = if a == b {
                    1.0
                } else {
                    PerformanceCalculator::pearson_correlation(&returns[a], &returns[b])
                };
                row.insert(b.clone(), correlation);
            }
        }
        CorrelationMatrix { strategies, values }
    }

    /// Per-strategy metrics, best Sharpe first.
    pub fn rank_strategies(&self) -> Vec<StrategyRanking> {
        let mut rankings: Vec<StrategyRanking> = self
            .strategy_names()
            .into_iter()
            .map(|strategy| {
                let metrics = self.analyze_strategy(&StrategyFilter::Named(strategy.clone()));
                StrategyRanking { strategy, metrics }
            })
            .collect();
        rankings.sort_by(|a, b| {
            b.metrics
                .sharpe_ratio
                .total_cmp(&a.metrics.sharpe_ratio)
                .then_with(|| a.strategy.cmp(&b.strategy))
        });
        rankings
    }

    /// Pick up to `max_strategies` strategies, favouring high Sharpe and low
    /// correlation with the other candidates.
    pub fn find_optimal_combination(&self, max_strategies: usize) -> EngineResult<OptimalCombination> {
        if self.trades.is_empty() {
            return Err(EngineError::NoTradeHistory);
        }
        if max_strategies == 0 {
            return Err(EngineError::InvalidConfig(
                "max_strategies must be at least 1".to_string(),
            ));
        }

        let rankings = self.rank_strategies();
        let mut candidates: Vec<&StrategyRanking> = rankings
            .iter()
            .filter(|ranking| {
                ranking.metrics.expectancy > MIN_EXPECTANCY
                    && ranking.metrics.win_rate >= MIN_WIN_RATE
                    && ranking.metrics.sharpe_ratio > MIN_SHARPE
            })
            .collect();
        if candidates.is_empty() {
            debug!(
                "No strategy passes the quality filter, falling back to the top {} by Sharpe",
                max_strategies
            );
            candidates = rankings.iter().take(max_strategies).collect();
        }

        let correlations = self.calculate_strategy_correlations();
        let mut scored: Vec<(&StrategyRanking, f64)> = candidates
            .iter()
            .map(|candidate| {
                let others: Vec<f64> = candidates
                    .iter()
                    .filter(|other| other.strategy != candidate.strategy)
                    .map(|other| {
                        correlations
                            .get(&candidate.strategy, &other.strategy)
                            .unwrap_or(0.0)
                            .abs()
                    })
                    .collect();
                let mean_abs_correlation = PerformanceCalculator::average(&others);
                let score = candidate.metrics.sharpe_ratio
                    * (CORRELATION_PENALTY_BASE - mean_abs_correlation);
                (*candidate, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.strategy.cmp(&b.0.strategy)));
        scored.truncate(max_strategies);

        let positive_total: f64 = scored.iter().map(|(_, score)| score.max(0.0)).sum();
        let weights: BTreeMap<String, f64> = scored
            .iter()
            .map(|(ranking, score)| {
                let weight = if positive_total > 0.0 {
                    score.max(0.0) / positive_total
                } else {
                    1.0 / scored.len() as f64
                };
                (ranking.strategy.clone(), weight)
            })
            .collect();

        let expected_sharpe: f64 = scored
            .iter()
            .map(|(ranking, _)| weights[&ranking.strategy] * ranking.metrics.sharpe_ratio)
            .sum();

        let strategies: Vec<String> = scored.iter().map(|(r, _)| r.strategy.clone()).collect();
        let mut pairwise = Vec::new();
        for (i, a) in strategies.iter().enumerate() {
            for b in &strategies[i + 1..] {
                pairwise.push(correlations.get(a, b).unwrap_or(0.0));
            }
        }
        let diversification_benefit = (1.0 - PerformanceCalculator::average(&pairwise)) * 100.0;

        info!(
            "Optimal combination: {:?} (expected Sharpe {:.2}, diversification {:.1})",
            strategies, expected_sharpe, diversification_benefit
        );

        Ok(OptimalCombination {
            strategies,
            weights,
            expected_sharpe,
            diversification_benefit,
        })
    }

    /// Weights of `combination` as the map the allocator accepts.
    pub fn combination_weights(combination: &OptimalCombination) -> HashMap<String, f64> {
        combination
            .weights
            .iter()
            .map(|(name, weight)| (name.clone(), *weight))
            .collect()
    }
}
