use crate::models::*;
use statrs::statistics::Statistics;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// The per-trade figures every metric is derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeSample {
    pub return_pct: f64,
    pub profit_loss: f64,
    pub holding_days: f64,
}

impl From<&ClosedTrade> for TradeSample {
    fn from(trade: &ClosedTrade) -> Self {
        Self {
            return_pct: trade.return_pct,
            profit_loss: trade.profit_loss,
            holding_days: trade.holding_days as f64,
        }
    }
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Trade-level metrics. Sharpe and drawdown are measured on the trade-return
    /// sequence; `daily_risk_free` is the per-period risk-free rate.
    pub fn calculate_metrics(samples: &[TradeSample], daily_risk_free: f64) -> PerformanceMetrics {
        let total_trades = samples.len();
        if total_trades == 0 {
            return PerformanceMetrics::default();
        }

        let returns: Vec<f64> = samples.iter().map(|s| s.return_pct).collect();
        let wins: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = returns
            .iter()
            .copied()
            .filter(|r| *r < 0.0)
            .map(f64::abs)
            .collect();

        let winning_trades = wins.len();
        let losing_trades = losses.len();
        let win_rate = winning_trades as f64 / total_trades as f64;
        let average_return = Self::average(&returns);
        let average_win = Self::average(&wins);
        let average_loss = Self::average(&losses);

        let gross_profit: f64 = samples
            .iter()
            .map(|s| s.profit_loss)
            .filter(|pl| *pl > 0.0)
            .sum();
        let gross_loss: f64 = samples
            .iter()
            .map(|s| s.profit_loss)
            .filter(|pl| *pl < 0.0)
            .sum::<f64>()
            .abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else {
            0.0
        };

        let expectancy = win_rate * average_win - (1.0 - win_rate) * average_loss;
        let holding: Vec<f64> = samples.iter().map(|s| s.holding_days).collect();

        PerformanceMetrics {
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            average_return,
            average_win,
            average_loss,
            profit_factor: Self::finite_or_zero(profit_factor),
            sharpe_ratio: Self::sharpe_ratio(&returns, daily_risk_free),
            max_drawdown: Self::max_drawdown_from_returns(&returns),
            expectancy: Self::finite_or_zero(expectancy),
            average_holding_days: Self::average(&holding),
        }
    }

    pub fn from_closed_trades(trades: &[ClosedTrade], daily_risk_free: f64) -> PerformanceMetrics {
        let samples: Vec<TradeSample> = trades.iter().map(TradeSample::from).collect();
        Self::calculate_metrics(&samples, daily_risk_free)
    }

    /// Backtest metrics: trade statistics from the closed trades, Sharpe and
    /// drawdown from the daily equity curve.
    pub fn for_backtest(
        trades: &[ClosedTrade],
        equity_curve: &[f64],
        daily_risk_free: f64,
    ) -> PerformanceMetrics {
        let mut metrics = Self::from_closed_trades(trades, daily_risk_free);
        let daily_returns = Self::period_returns(equity_curve);
        metrics.sharpe_ratio = Self::sharpe_ratio(&daily_returns, daily_risk_free);
        metrics.max_drawdown = Self::max_drawdown_from_equity(equity_curve);
        metrics
    }

    /// `((mean − rf) / sample_stdev) × √252`; zero when fewer than two returns or
    /// no variance.
    pub fn sharpe_ratio(returns: &[f64], daily_risk_free: f64) -> f64 {
        let clean: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
        if clean.len() < 2 {
            return 0.0;
        }
        let mean = clean.iter().mean();
        let std_dev = clean.iter().std_dev();
        if !std_dev.is_finite() || std_dev <= f64::EPSILON {
            return 0.0;
        }
        Self::finite_or_zero((mean - daily_risk_free) / std_dev * TRADING_DAYS_PER_YEAR.sqrt())
    }

    /// Deepest peak-to-trough decline of the curve built by compounding `1 + r`.
    pub fn max_drawdown_from_returns(returns: &[f64]) -> f64 {
        let mut equity = 1.0;
        let mut curve = Vec::with_capacity(returns.len() + 1);
        curve.push(equity);
        for r in returns.iter().copied().filter(|r| r.is_finite()) {
            equity *= 1.0 + r;
            curve.push(equity);
        }
        Self::max_drawdown_from_equity(&curve)
    }

    /// Fractional max drawdown in `[0, 1]`.
    pub fn max_drawdown_from_equity(curve: &[f64]) -> f64 {
        let mut peak = f64::NEG_INFINITY;
        let mut max_drawdown: f64 = 0.0;
        for &value in curve {
            if !value.is_finite() {
                continue;
            }
            if value > peak {
                peak = value;
            }
            if peak > 0.0 {
                let drawdown = (peak - value) / peak;
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
            }
        }
        max_drawdown.clamp(0.0, 1.0)
    }

    pub fn period_returns(curve: &[f64]) -> Vec<f64> {
        curve
            .windows(2)
            .filter(|pair| pair[0] > 0.0 && pair[0].is_finite() && pair[1].is_finite())
            .map(|pair| pair[1] / pair[0] - 1.0)
            .collect()
    }

    /// Pearson correlation over the common prefix of two sequences; zero with
    /// fewer than two points or no variance on either side.
    pub fn pearson_correlation(a: &[f64], b: &[f64]) -> f64 {
        let n = a.len().min(b.len());
        if n < 2 {
            return 0.0;
        }
        let (a, b) = (&a[..n], &b[..n]);
        let std_a = a.iter().std_dev();
        let std_b = b.iter().std_dev();
        if !(std_a > f64::EPSILON && std_b > f64::EPSILON) {
            return 0.0;
        }
        let covariance = a.iter().covariance(b.iter());
        Self::finite_or_zero(covariance / (std_a * std_b)).clamp(-1.0, 1.0)
    }

    pub fn average(values: &[f64]) -> f64 {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return 0.0;
        }
        finite.iter().sum::<f64>() / finite.len() as f64
    }

    fn finite_or_zero(value: f64) -> f64 {
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }
}
