use crate::error::{EngineError, EngineResult};
use crate::models::BacktestResult;
use crate::performance::PerformanceCalculator;
use crate::run_status::RunStatus;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

pub const DEFAULT_SIMULATIONS: usize = 1000;
pub const DEFAULT_TRADES_PER_SIMULATION: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub simulations: usize,
    pub trades_per_simulation: usize,
    pub mean: f64,
    /// Element at `n / 2` of the sorted outcomes, not interpolated.
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub percentile_5: f64,
    pub percentile_25: f64,
    pub percentile_75: f64,
    pub percentile_95: f64,
    pub probability_profit: f64,
    pub std_dev: f64,
    /// Compounded return of every trial, ascending.
    pub distribution: Vec<f64>,
}

/// Bootstrap of compounded trade sequences drawn with replacement.
#[derive(Debug, Clone, Default)]
pub struct MonteCarloSimulator {
    seed: Option<u64>,
}

impl MonteCarloSimulator {
    /// With a seed every trial `i` draws from `seed + i`, so results do not
    /// depend on how trials are spread over threads.
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }

    pub fn run(
        &self,
        returns: &[f64],
        simulations: usize,
        trades_per_simulation: usize,
        status: &RunStatus,
    ) -> EngineResult<MonteCarloSummary> {
        let population: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if population.is_empty() {
            return Err(EngineError::EmptyTradePopulation);
        }
        if simulations == 0 || trades_per_simulation == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "Monte Carlo needs at least one simulation and one trade per simulation (got {} x {})",
                simulations, trades_per_simulation
            )));
        }

        let base_seed = self.seed.unwrap_or_else(rand::random);
        status.set_phase("monte-carlo");
        status.set_progress(simulations, 0);

        let outcomes: Option<Vec<f64>> = (0..simulations)
            .into_par_iter()
            .map(|trial| {
                if status.is_cancelled() {
                    return None;
                }
                let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(trial as u64));
                let growth = (0..trades_per_simulation).fold(1.0, |equity, _| {
                    equity * (1.0 + population[rng.gen_range(0..population.len())])
                });
                status.increment_completed();
                Some(growth - 1.0)
            })
            .collect();
        let mut distribution = outcomes.ok_or(EngineError::Cancelled)?;
        distribution.sort_by(f64::total_cmp);

        let summary = Self::summarize(distribution, trades_per_simulation);
        info!(
            "Monte Carlo: {} simulations x {} trades, median {:.2}%, P(profit) {:.1}%",
            summary.simulations,
            summary.trades_per_simulation,
            summary.median * 100.0,
            summary.probability_profit * 100.0
        );
        Ok(summary)
    }

    /// Resample the closed-trade returns of a backtest.
    pub fn run_on_backtest(
        &self,
        result: &BacktestResult,
        simulations: usize,
        trades_per_simulation: usize,
        status: &RunStatus,
    ) -> EngineResult<MonteCarloSummary> {
        self.run(&result.trade_returns(), simulations, trades_per_simulation, status)
    }

    fn summarize(distribution: Vec<f64>, trades_per_simulation: usize) -> MonteCarloSummary {
        let n = distribution.len();
        let nearest_rank = |p: f64| distribution[((n as f64 * p).floor() as usize).min(n - 1)];
        let profitable = distribution.iter().filter(|v| **v > 0.0).count();
        let std_dev = if n > 1 {
            distribution.iter().std_dev()
        } else {
            0.0
        };

        MonteCarloSummary {
            simulations: n,
            trades_per_simulation,
            mean: PerformanceCalculator::average(&distribution),
            median: distribution[n / 2],
            min: distribution[0],
            max: distribution[n - 1],
            percentile_5: nearest_rank(0.05),
            percentile_25: nearest_rank(0.25),
            percentile_75: nearest_rank(0.75),
            percentile_95: nearest_rank(0.95),
            probability_profit: profitable as f64 / n as f64,
            std_dev: if std_dev.is_finite() { std_dev } else { 0.0 },
            distribution,
        }
    }
}
