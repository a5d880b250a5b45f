use crate::config::{BacktestOptions, ProfitLevel};
use crate::ledger::Position;
use crate::models::ExitReason;
use chrono::{DateTime, Utc};

pub const PRICE_EPSILON: f64 = 1e-6;

/// Slippage and commission applied to simulated fills.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionCosts {
    pub slippage_rate: f64,
    pub commission_rate: f64,
}

impl ExecutionCosts {
    pub fn new(slippage_rate: f64, commission_rate: f64) -> Self {
        Self {
            slippage_rate,
            commission_rate,
        }
    }

    pub fn buy_price(&self, price: f64) -> f64 {
        price * (1.0 + self.slippage_rate)
    }

    pub fn sell_price(&self, price: f64) -> f64 {
        price * (1.0 - self.slippage_rate)
    }

    pub fn commission(&self, price: f64, shares: u64) -> f64 {
        if shares == 0 || !price.is_finite() || price <= 0.0 {
            return 0.0;
        }
        price * shares as f64 * self.commission_rate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionAllocation {
    pub shares: u64,
    pub entry_price: f64,
    pub commission: f64,
    pub total_cost: f64,
}

#[derive(Debug, PartialEq)]
pub enum PositionSizingOutcome {
    Sized(PositionAllocation),
    TooSmall,
    InsufficientCash { required: f64 },
}

/// `shares = floor(capital × position_size / entry_price)`; the entry is only
/// allowed when at least one share fits and the commission-inclusive cost does
/// not exceed the available capital.
pub fn determine_position_size(
    available_cash: f64,
    position_size: f64,
    close: f64,
    costs: &ExecutionCosts,
) -> PositionSizingOutcome {
    let entry_price = costs.buy_price(close);
    if entry_price <= 0.0 || !entry_price.is_finite() || !available_cash.is_finite() {
        return PositionSizingOutcome::TooSmall;
    }

    let allocation = available_cash.max(0.0) * position_size.max(0.0);
    let shares = (allocation / entry_price).floor().max(0.0) as u64;
    if shares == 0 {
        return PositionSizingOutcome::TooSmall;
    }

    let commission = costs.commission(entry_price, shares);
    let total_cost = entry_price * shares as f64 + commission;
    if total_cost > available_cash + PRICE_EPSILON {
        return PositionSizingOutcome::InsufficientCash {
            required: total_cost,
        };
    }

    PositionSizingOutcome::Sized(PositionAllocation {
        shares,
        entry_price,
        commission,
        total_cost,
    })
}

/// A profit rung that is due on this bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialExit {
    pub level: ProfitLevel,
    /// May be zero; the rung is still consumed.
    pub shares: u64,
}

/// Untaken rungs whose threshold the current gain has reached, ascending. Share
/// counts are `floor(original × sell_fraction)` capped by what each earlier rung
/// leaves behind.
pub fn due_profit_levels(position: &Position, close: f64, levels: &[ProfitLevel]) -> Vec<PartialExit> {
    let gain = position.gain_at(close);
    let mut remaining = position.shares;
    let mut due = Vec::new();
    for level in levels {
        if position.is_level_taken(level.profit_threshold) || gain < level.profit_threshold {
            continue;
        }
        let wanted = (position.original_shares as f64 * level.sell_fraction).floor().max(0.0) as u64;
        let shares = wanted.min(remaining);
        remaining -= shares;
        due.push(PartialExit {
            level: *level,
            shares,
        });
    }
    due
}

/// Exit decision with the raw (pre-slippage) fill price of the rule that won.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub reason: ExitReason,
    pub raw_price: f64,
}

/// Run the exit checks in their fixed order. Every rule that fires overwrites
/// the previous reason and fill, so the last firing rule wins. Only the fixed
/// stop loss fills at its own level; every other rule fills at the close. `sell_signal`
/// is the exit reason to record when the strategy (or portfolio consensus)
/// says SELL.
pub fn evaluate_exit(
    position: &Position,
    close: f64,
    date: DateTime<Utc>,
    options: &BacktestOptions,
    sell_signal: Option<ExitReason>,
) -> Option<ExitDecision> {
    let mut decision: Option<ExitDecision> = None;

    if position.trailing_stop_active {
        if let Some(stop_price) = position.trailing_stop_price {
            if close <= stop_price {
                decision = Some(ExitDecision {
                    reason: ExitReason::TrailingStop,
                    raw_price: close,
                });
            }
        }
    }

    if let Some(stop_loss) = options.stop_loss {
        let stop_price = position.entry_price * (1.0 - stop_loss);
        if !position.trailing_stop_active && close <= stop_price {
            decision = Some(ExitDecision {
                reason: ExitReason::StopLoss,
                raw_price: stop_price,
            });
        }
    }

    if let Some(take_profit) = options.take_profit {
        let target_price = position.entry_price * (1.0 + take_profit);
        if close >= target_price {
            decision = Some(ExitDecision {
                reason: ExitReason::TakeProfit,
                raw_price: close,
            });
        }
    }

    if let Some(limit) = options.max_holding_days {
        if position.holding_days(date) >= limit {
            decision = Some(ExitDecision {
                reason: ExitReason::MaxHoldingDays,
                raw_price: close,
            });
        }
    }

    if let Some(reason) = sell_signal {
        decision = Some(ExitDecision {
            reason,
            raw_price: close,
        });
    }

    decision
}
