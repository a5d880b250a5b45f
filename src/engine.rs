use crate::candle_utils::union_dates;
use crate::config::{BacktestOptions, EngineRuntimeSettings};
use crate::error::{EngineError, EngineResult};
use crate::ledger::{Position, PositionLedger};
use crate::models::*;
use crate::performance::PerformanceCalculator;
use crate::strategy::Strategy;
use crate::trading_rules::{
    determine_position_size, due_profit_levels, evaluate_exit, ExecutionCosts,
    PositionSizingOutcome,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::ops::Range;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq)]
enum EntrySignalOutcome {
    Executed,
    Skipped { reason: &'static str },
}

/// Combined decision of the weighted strategies for one symbol and date.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioDecision {
    pub action: SignalAction,
    pub buy_weight: f64,
    pub sell_weight: f64,
    /// Weight-averaged confidence of the strategies voting with `action`.
    pub confidence: f64,
}

/// Mutable state of one simulation: cash, open positions and everything recorded so far.
struct SimulationState {
    costs: ExecutionCosts,
    cash: f64,
    ledger: PositionLedger,
    trades: Vec<ClosedTrade>,
    equity_curve: Vec<f64>,
    dates: Vec<DateTime<Utc>>,
    last_close: HashMap<String, f64>,
}

impl SimulationState {
    fn new(initial_capital: f64, costs: ExecutionCosts) -> Self {
        Self {
            costs,
            cash: initial_capital,
            ledger: PositionLedger::new(),
            trades: Vec::new(),
            equity_curve: vec![initial_capital],
            dates: Vec::new(),
            last_close: HashMap::new(),
        }
    }

    /// Partial profit rungs, trailing stop maintenance and the exit checks for
    /// one open position on one bar.
    fn manage_position(
        &mut self,
        symbol: &str,
        bar: &Bar,
        options: &BacktestOptions,
        sell_reason: Option<ExitReason>,
    ) {
        let costs = self.costs;
        let Some(position) = self.ledger.get_mut(symbol) else {
            return;
        };

        if options.partial_profit_taking {
            for partial in due_profit_levels(position, bar.close, &options.profit_levels) {
                position.mark_level_taken(partial.level.profit_threshold);
                if partial.shares == 0 {
                    continue;
                }
                let (trade, proceeds) = realize_exit(
                    &costs,
                    position,
                    partial.shares,
                    bar.close,
                    bar.date,
                    ExitReason::PartialProfit(partial.level.profit_threshold),
                );
                self.cash += proceeds;
                self.trades.push(trade);
            }
            if position.is_closed() {
                self.ledger.remove(symbol);
                return;
            }
        }

        position.update_trailing_stop(
            bar.close,
            options.trailing_stop,
            options.trailing_stop_activation,
            options.trailing_stop_distance,
        );

        if let Some(decision) = evaluate_exit(position, bar.close, bar.date, options, sell_reason) {
            let shares = position.shares;
            let (trade, proceeds) = realize_exit(
                &costs,
                position,
                shares,
                decision.raw_price,
                bar.date,
                decision.reason,
            );
            debug!(
                "Closed {} on {} ({}), P/L {:.2}",
                symbol,
                bar.date.format("%Y-%m-%d"),
                trade.exit_reason,
                trade.profit_loss
            );
            self.cash += proceeds;
            self.trades.push(trade);
            self.ledger.remove(symbol);
        }
    }

    fn try_enter(
        &mut self,
        symbol: &str,
        bar: &Bar,
        confidence: f64,
        options: &BacktestOptions,
    ) -> EntrySignalOutcome {
        if self.ledger.has_position(symbol) {
            return EntrySignalOutcome::Skipped {
                reason: "position_open",
            };
        }
        match determine_position_size(self.cash, options.position_size, bar.close, &self.costs) {
            PositionSizingOutcome::Sized(allocation) => {
                self.cash -= allocation.total_cost;
                self.ledger.open(Position::open(
                    symbol,
                    bar.date,
                    allocation.entry_price,
                    allocation.shares,
                    allocation.total_cost,
                    confidence,
                ));
                EntrySignalOutcome::Executed
            }
            PositionSizingOutcome::TooSmall => EntrySignalOutcome::Skipped {
                reason: "position_too_small",
            },
            PositionSizingOutcome::InsufficientCash { required } => {
                debug!(
                    "Skipping {} entry on {}: needs {:.2}, cash {:.2}",
                    symbol,
                    bar.date.format("%Y-%m-%d"),
                    required,
                    self.cash
                );
                EntrySignalOutcome::Skipped {
                    reason: "insufficient_cash",
                }
            }
        }
    }

    fn mark_equity(&mut self, date: DateTime<Utc>) {
        let last_close = &self.last_close;
        let positions_value = self
            .ledger
            .market_value(|symbol| last_close.get(symbol).copied());
        self.equity_curve.push(self.cash + positions_value);
        self.dates.push(date);
    }

    /// Close everything still open at each symbol's last known close.
    fn liquidate(&mut self, date: DateTime<Utc>) {
        let costs = self.costs;
        for mut position in self.ledger.drain() {
            let close = self
                .last_close
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.entry_price);
            let shares = position.shares;
            let (trade, proceeds) = realize_exit(
                &costs,
                &mut position,
                shares,
                close,
                date,
                ExitReason::BacktestEnd,
            );
            self.cash += proceeds;
            self.trades.push(trade);
        }
    }
}

/// Sell `shares` of `position` at the slippage-adjusted `raw_price`. Returns the
/// trade record and the net cash proceeds.
fn realize_exit(
    costs: &ExecutionCosts,
    position: &mut Position,
    shares: u64,
    raw_price: f64,
    date: DateTime<Utc>,
    reason: ExitReason,
) -> (ClosedTrade, f64) {
    let exit_price = costs.sell_price(raw_price);
    let reduction = position.reduce(shares);
    let commission = costs.commission(exit_price, reduction.shares);
    let proceeds = exit_price * reduction.shares as f64 - commission;
    let profit_loss = proceeds - reduction.allocated_cost;
    let return_pct = if reduction.allocated_cost > 0.0 {
        profit_loss / reduction.allocated_cost
    } else {
        0.0
    };
    let trade = ClosedTrade {
        symbol: position.symbol.clone(),
        entry_date: position.entry_date,
        entry_price: position.entry_price,
        exit_date: date,
        exit_price,
        shares: reduction.shares,
        return_pct,
        profit_loss,
        holding_days: position.holding_days(date),
        exit_reason: reason,
    };
    (trade, proceeds)
}

/// Validated, normalized strategy weights for a portfolio run.
fn normalize_strategy_weights(
    strategies: &[(&dyn Strategy, f64)],
) -> EngineResult<Vec<f64>> {
    if strategies.is_empty() {
        return Err(EngineError::InvalidConfig(
            "portfolio backtest needs at least one strategy".to_string(),
        ));
    }
    for (strategy, weight) in strategies {
        if !weight.is_finite() || *weight < 0.0 {
            return Err(EngineError::InvalidWeight {
                strategy: strategy.get_name().to_string(),
                weight: *weight,
            });
        }
    }
    let total: f64 = strategies.iter().map(|(_, weight)| weight).sum();
    if total <= 0.0 {
        return Err(EngineError::NonPositiveWeightSum(total));
    }
    Ok(strategies.iter().map(|(_, weight)| weight / total).collect())
}

pub struct BacktestEngine {
    runtime_settings: EngineRuntimeSettings,
}

impl BacktestEngine {
    pub fn new(runtime_settings: EngineRuntimeSettings) -> Self {
        Self { runtime_settings }
    }

    pub fn runtime_settings(&self) -> &EngineRuntimeSettings {
        &self.runtime_settings
    }

    pub fn set_runtime_settings(&mut self, settings: EngineRuntimeSettings) {
        self.runtime_settings = settings;
    }

    fn costs(&self) -> ExecutionCosts {
        ExecutionCosts::new(
            self.runtime_settings.slippage_rate,
            self.runtime_settings.commission_rate,
        )
    }

    fn initial_capital(&self, options: &BacktestOptions) -> f64 {
        options
            .initial_capital
            .unwrap_or(self.runtime_settings.initial_capital)
    }

    /// Replay every bar of one symbol through `strategy`.
    pub fn run_backtest(
        &self,
        strategy: &dyn Strategy,
        symbol: &str,
        bars: &[Bar],
        options: &BacktestOptions,
    ) -> EngineResult<BacktestResult> {
        self.run_window(strategy, symbol, bars, 0..bars.len(), options)
    }

    /// Replay only `bars[range]` as if it were the whole series. Bars outside
    /// the window never count toward the history requirement.
    pub fn run_window(
        &self,
        strategy: &dyn Strategy,
        symbol: &str,
        bars: &[Bar],
        range: Range<usize>,
        options: &BacktestOptions,
    ) -> EngineResult<BacktestResult> {
        options.validate()?;
        let end = range.end.min(bars.len());
        let start = range.start.min(end);
        let window = &bars[start..end];
        if window.is_empty() {
            return Err(EngineError::NoMarketData);
        }
        let required = strategy.get_required_historical_days();
        if window.len() < required {
            return Err(EngineError::InsufficientData {
                symbol: symbol.to_string(),
                required,
                available: window.len(),
            });
        }

        let initial_capital = self.initial_capital(options);
        let can_enter = strategy.can_execute(symbol);
        let mut state = SimulationState::new(initial_capital, self.costs());
        info!(
            "Backtesting {} on {} over {} bars",
            strategy.get_name(),
            symbol,
            window.len()
        );

        for bar in window {
            state.last_close.insert(symbol.to_string(), bar.close);
            let signal = Self::signal_or_hold(strategy, symbol, bar.date);

            if state.ledger.has_position(symbol) {
                let sell_reason =
                    (signal.action == SignalAction::Sell).then_some(ExitReason::StrategySignal);
                state.manage_position(symbol, bar, options, sell_reason);
            }

            if can_enter && state.ledger.is_empty() && signal.action == SignalAction::Buy {
                if let EntrySignalOutcome::Skipped { reason } =
                    state.try_enter(symbol, bar, signal.confidence, options)
                {
                    debug!("BUY on {} skipped: {}", bar.date.format("%Y-%m-%d"), reason);
                }
            }

            state.mark_equity(bar.date);
        }

        if !state.ledger.is_empty() {
            debug!("Force-closing open position in {} at run end", symbol);
        }
        if let Some(last) = window.last() {
            state.liquidate(last.date);
        }

        Ok(self.finish(
            state,
            strategy.get_name().to_string(),
            vec![symbol.to_string()],
            initial_capital,
            options,
        ))
    }

    /// Multi-symbol replay driven by the weighted consensus of several strategies.
    /// A symbol enters when BUY voters hold more than half the weight and exits
    /// (reason `portfolio_signal`) when SELL voters do.
    pub fn run_portfolio_backtest(
        &self,
        strategies: &[(&dyn Strategy, f64)],
        bars_by_symbol: &HashMap<String, Vec<Bar>>,
        options: &BacktestOptions,
    ) -> EngineResult<BacktestResult> {
        options.validate()?;
        let weights = normalize_strategy_weights(strategies)?;
        let required = strategies
            .iter()
            .map(|(strategy, _)| strategy.get_required_historical_days())
            .max()
            .unwrap_or(0);

        let mut eligible: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut longest = 0;
        for (symbol, series) in bars_by_symbol {
            longest = longest.max(series.len());
            if series.is_empty() || series.len() < required {
                warn!(
                    "Skipping {}: {} bars available, {} required",
                    symbol,
                    series.len(),
                    required
                );
                continue;
            }
            eligible.insert(symbol.clone(), series.clone());
        }
        if eligible.is_empty() {
            return Err(EngineError::InsufficientData {
                symbol: "portfolio".to_string(),
                required: required.max(1),
                available: longest,
            });
        }

        let mut symbols: Vec<String> = eligible.keys().cloned().collect();
        symbols.sort();
        let dates = union_dates(&eligible);
        let max_positions = options
            .max_positions
            .unwrap_or(self.runtime_settings.max_positions);
        let initial_capital = self.initial_capital(options);
        let mut state = SimulationState::new(initial_capital, self.costs());
        let mut cursors: HashMap<&str, usize> = symbols.iter().map(|s| (s.as_str(), 0)).collect();
        let strategy_name = strategies
            .iter()
            .map(|(strategy, _)| strategy.get_name())
            .collect::<Vec<_>>()
            .join("+");

        info!(
            "Portfolio backtest of {} across {} symbols and {} dates",
            strategy_name,
            symbols.len(),
            dates.len()
        );

        for &date in &dates {
            let mut todays: Vec<(&str, &Bar, PortfolioDecision)> = Vec::new();
            for symbol in &symbols {
                let Some(series) = eligible.get(symbol) else {
                    continue;
                };
                let Some(cursor) = cursors.get_mut(symbol.as_str()) else {
                    continue;
                };
                while *cursor < series.len() && series[*cursor].date < date {
                    *cursor += 1;
                }
                if *cursor < series.len() && series[*cursor].date == date {
                    let bar = &series[*cursor];
                    state.last_close.insert(symbol.clone(), bar.close);
                    let decision = Self::portfolio_decision(strategies, &weights, symbol, date);
                    todays.push((symbol.as_str(), bar, decision));
                }
            }

            for (symbol, bar, decision) in &todays {
                if state.ledger.has_position(symbol) {
                    let sell_reason = (decision.action == SignalAction::Sell)
                        .then_some(ExitReason::PortfolioSignal);
                    state.manage_position(symbol, bar, options, sell_reason);
                }
            }

            for (symbol, bar, decision) in &todays {
                if decision.action != SignalAction::Buy
                    || state.ledger.has_position(symbol)
                    || state.ledger.count() >= max_positions
                {
                    continue;
                }
                if let EntrySignalOutcome::Skipped { reason } =
                    state.try_enter(symbol, bar, decision.confidence, options)
                {
                    debug!(
                        "Portfolio BUY for {} on {} skipped: {}",
                        symbol,
                        date.format("%Y-%m-%d"),
                        reason
                    );
                }
            }

            state.mark_equity(date);
        }

        if let Some(&last_date) = dates.last() {
            state.liquidate(last_date);
        }

        Ok(self.finish(state, strategy_name, symbols, initial_capital, options))
    }

    /// Independent single-symbol runs across worker threads, sorted by symbol.
    pub fn run_batch(
        &self,
        strategy: &dyn Strategy,
        bars_by_symbol: &HashMap<String, Vec<Bar>>,
        options: &BacktestOptions,
    ) -> Vec<(String, EngineResult<BacktestResult>)> {
        let mut symbols: Vec<&String> = bars_by_symbol.keys().collect();
        symbols.sort();
        symbols
            .into_par_iter()
            .map(|symbol| {
                let bars = &bars_by_symbol[symbol];
                (
                    symbol.clone(),
                    self.run_backtest(strategy, symbol, bars, options),
                )
            })
            .collect()
    }

    /// Weighted vote of every strategy for `symbol` on `date`. Failing strategies
    /// and strategies that cannot trade the symbol count as HOLD.
    pub fn portfolio_decision(
        strategies: &[(&dyn Strategy, f64)],
        normalized_weights: &[f64],
        symbol: &str,
        date: DateTime<Utc>,
    ) -> PortfolioDecision {
        let mut buy_weight = 0.0;
        let mut sell_weight = 0.0;
        let mut buy_confidence = 0.0;
        let mut sell_confidence = 0.0;
        for ((strategy, _), &weight) in strategies.iter().zip(normalized_weights) {
            if weight <= 0.0 || !strategy.can_execute(symbol) {
                continue;
            }
            let signal = Self::signal_or_hold(*strategy, symbol, date);
            match signal.action {
                SignalAction::Buy => {
                    buy_weight += weight;
                    buy_confidence += weight * signal.confidence;
                }
                SignalAction::Sell => {
                    sell_weight += weight;
                    sell_confidence += weight * signal.confidence;
                }
                SignalAction::Hold => {}
            }
        }

        let (action, confidence) = if is_majority(buy_weight) {
            (SignalAction::Buy, buy_confidence / buy_weight)
        } else if is_majority(sell_weight) {
            (SignalAction::Sell, sell_confidence / sell_weight)
        } else {
            (SignalAction::Hold, 0.0)
        };
        PortfolioDecision {
            action,
            buy_weight,
            sell_weight,
            confidence,
        }
    }

    fn signal_or_hold(strategy: &dyn Strategy, symbol: &str, date: DateTime<Utc>) -> Signal {
        match strategy.analyze(symbol, AnalysisDate::On(date)) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(
                    "{} failed to analyze {} on {}: {}",
                    strategy.get_name(),
                    symbol,
                    date.format("%Y-%m-%d"),
                    err
                );
                Signal::new(SignalAction::Hold, 0.0, format!("analysis failed: {}", err))
            }
        }
    }

    fn finish(
        &self,
        state: SimulationState,
        strategy_name: String,
        symbols: Vec<String>,
        initial_capital: f64,
        options: &BacktestOptions,
    ) -> BacktestResult {
        let final_capital = state.cash;
        let total_return = if initial_capital > 0.0 {
            (final_capital - initial_capital) / initial_capital
        } else {
            0.0
        };
        let metrics = PerformanceCalculator::for_backtest(
            &state.trades,
            &state.equity_curve,
            self.runtime_settings.daily_risk_free_rate(),
        );
        info!(
            "{} finished: {} trades, return {:.2}%",
            strategy_name,
            state.trades.len(),
            total_return * 100.0
        );

        BacktestResult {
            id: Uuid::new_v4().to_string(),
            strategy_name,
            symbols,
            start_date: state.dates.first().copied(),
            end_date: state.dates.last().copied(),
            initial_capital,
            final_capital,
            total_return,
            trades: state.trades,
            equity_curve: state.equity_curve,
            dates: state.dates,
            metrics,
            options_used: options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfitLevel;
    use anyhow::anyhow;
    use chrono::{Duration, TimeZone};

    fn frictionless_settings() -> EngineRuntimeSettings {
        EngineRuntimeSettings {
            slippage_rate: 0.0,
            commission_rate: 0.0,
            ..Default::default()
        }
    }

    fn create_date(days_offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap() + Duration::days(days_offset)
    }

    fn generate_bars(symbol: &str, prices: &[f64]) -> Vec<Bar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &price)| Bar {
                symbol: symbol.to_string(),
                date: create_date(i as i64),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 1_000_000.0,
            })
            .collect()
    }

    struct MockStrategy {
        name: String,
        signals: HashMap<(String, DateTime<Utc>), SignalAction>,
        required: usize,
    }

    impl MockStrategy {
        fn new(name: &str, signals: &[(&str, i64, SignalAction)]) -> Self {
            Self {
                name: name.to_string(),
                signals: signals
                    .iter()
                    .map(|(symbol, day, action)| ((symbol.to_string(), create_date(*day)), *action))
                    .collect(),
                required: 0,
            }
        }
    }

    impl Strategy for MockStrategy {
        fn get_name(&self) -> &str {
            &self.name
        }

        fn analyze(&self, symbol: &str, date: AnalysisDate) -> anyhow::Result<Signal> {
            let AnalysisDate::On(date) = date else {
                return Err(anyhow!("mock needs a concrete date"));
            };
            let action = self
                .signals
                .get(&(symbol.to_string(), date))
                .copied()
                .unwrap_or(SignalAction::Hold);
            Ok(Signal::new(action, 0.9, "scripted"))
        }

        fn get_required_historical_days(&self) -> usize {
            self.required
        }
    }

    struct FailingStrategy;

    impl Strategy for FailingStrategy {
        fn get_name(&self) -> &str {
            "Failing"
        }

        fn analyze(&self, _symbol: &str, _date: AnalysisDate) -> anyhow::Result<Signal> {
            Err(anyhow!("data feed offline"))
        }

        fn get_required_historical_days(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_backtest_constant_price_round_trip_costs() {
        let engine = BacktestEngine::new(EngineRuntimeSettings::default());
        let bars = generate_bars("CONST", &[100.0, 100.0, 100.0, 100.0]);
        let strategy = MockStrategy::new(
            "mock",
            &[("CONST", 0, SignalAction::Buy), ("CONST", 2, SignalAction::Sell)],
        );
        let options = BacktestOptions {
            position_size: 0.5,
            ..Default::default()
        };

        let result = engine
            .run_backtest(&strategy, "CONST", &bars, &options)
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::StrategySignal);
        assert!((trade.entry_price - 100.05).abs() < 1e-9);
        assert!((trade.exit_price - 99.95).abs() < 1e-9);
        let shares = (50_000.0f64 / 100.05).floor();
        assert_eq!(trade.shares, shares as u64);
        let cost = 100.05 * shares * 1.001;
        let proceeds = 99.95 * shares * 0.999;
        assert!((trade.profit_loss - (proceeds - cost)).abs() < 1e-6);
        assert!(
            (result.final_capital - (result.initial_capital + trade.profit_loss)).abs() < 1e-6
        );
        assert_eq!(result.equity_curve.len(), bars.len() + 1);
        assert_eq!(trade.holding_days, 2);
    }

    #[test]
    fn test_insufficient_history_is_rejected() {
        let engine = BacktestEngine::new(frictionless_settings());
        let bars = generate_bars("AAA", &[100.0; 5]);
        let mut strategy = MockStrategy::new("mock", &[]);
        strategy.required = 10;

        let err = engine
            .run_backtest(&strategy, "AAA", &bars, &BacktestOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                required: 10,
                available: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_window_checks_history_against_its_own_bars() {
        let engine = BacktestEngine::new(frictionless_settings());
        let bars = generate_bars("AAA", &[100.0; 12]);
        let mut strategy = MockStrategy::new("mock", &[("AAA", 9, SignalAction::Buy)]);
        strategy.required = 3;

        let result = engine
            .run_window(&strategy, "AAA", &bars, 9..12, &BacktestOptions::default())
            .unwrap();
        assert_eq!(result.equity_curve.len(), 4);
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::BacktestEnd);
        assert_eq!(result.start_date, Some(create_date(9)));

        strategy.required = 10;
        let err = engine
            .run_window(&strategy, "AAA", &bars, 9..12, &BacktestOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                required: 10,
                available: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_partial_profit_ladder_then_final_close() {
        let engine = BacktestEngine::new(frictionless_settings());
        let bars = generate_bars("AAA", &[100.0, 105.0, 111.0, 122.0, 125.0]);
        let strategy = MockStrategy::new("mock", &[("AAA", 0, SignalAction::Buy)]);
        let options = BacktestOptions {
            position_size: 1.0,
            partial_profit_taking: true,
            profit_levels: vec![
                ProfitLevel {
                    profit_threshold: 0.10,
                    sell_fraction: 0.5,
                },
                ProfitLevel {
                    profit_threshold: 0.20,
                    sell_fraction: 0.25,
                },
            ],
            ..Default::default()
        };

        let result = engine.run_backtest(&strategy, "AAA", &bars, &options).unwrap();
        let reasons: Vec<String> = result.trades.iter().map(|t| t.exit_reason.label()).collect();
        assert_eq!(
            reasons,
            vec!["partial_profit_10", "partial_profit_20", "backtest_end"]
        );
        assert_eq!(result.trades[0].shares, 500);
        assert_eq!(result.trades[1].shares, 250);
        assert_eq!(result.trades[2].shares, 250);
        assert!((result.trades[0].return_pct - 0.11).abs() < 1e-9);
        let realized: f64 = result.trades.iter().map(|t| t.profit_loss).sum();
        assert!((result.final_capital - 100_000.0 - realized).abs() < 1e-6);
    }

    #[test]
    fn test_partial_levels_can_close_whole_position() {
        let engine = BacktestEngine::new(frictionless_settings());
        let bars = generate_bars("AAA", &[100.0, 120.0, 90.0]);
        let strategy = MockStrategy::new("mock", &[("AAA", 0, SignalAction::Buy)]);
        let options = BacktestOptions {
            position_size: 1.0,
            stop_loss: Some(0.05),
            partial_profit_taking: true,
            profit_levels: vec![ProfitLevel {
                profit_threshold: 0.10,
                sell_fraction: 1.0,
            }],
            ..Default::default()
        };

        let result = engine.run_backtest(&strategy, "AAA", &bars, &options).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::PartialProfit(0.10));
        assert!((result.final_capital - 120_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_max_holding_days_then_reentry() {
        let engine = BacktestEngine::new(frictionless_settings());
        let bars = generate_bars("AAA", &[100.0, 101.0, 102.0, 103.0]);
        let strategy = MockStrategy::new(
            "mock",
            &[("AAA", 0, SignalAction::Buy), ("AAA", 2, SignalAction::Buy)],
        );
        let options = BacktestOptions {
            position_size: 0.5,
            max_holding_days: Some(2),
            ..Default::default()
        };

        let result = engine.run_backtest(&strategy, "AAA", &bars, &options).unwrap();
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].exit_reason, ExitReason::MaxHoldingDays);
        assert_eq!(result.trades[0].exit_date, create_date(2));
        // re-entered on the exit bar because the strategy still says BUY
        assert_eq!(result.trades[1].entry_date, create_date(2));
        assert_eq!(result.trades[1].exit_reason, ExitReason::BacktestEnd);
    }

    #[test]
    fn test_strategy_errors_are_treated_as_hold() {
        let engine = BacktestEngine::new(frictionless_settings());
        let bars = generate_bars("AAA", &[100.0, 101.0, 102.0]);
        let result = engine
            .run_backtest(&FailingStrategy, "AAA", &bars, &BacktestOptions::default())
            .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.final_capital, result.initial_capital);
        assert!(result.equity_curve.iter().all(|v| (*v - 100_000.0).abs() < 1e-9));
    }

    #[test]
    fn test_invalid_options_are_rejected_before_running() {
        let engine = BacktestEngine::new(frictionless_settings());
        let bars = generate_bars("AAA", &[100.0]);
        let options = BacktestOptions {
            position_size: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            engine.run_backtest(&FailingStrategy, "AAA", &bars, &options),
            Err(EngineError::InvalidOptions(_))
        ));
        assert!(matches!(
            engine.run_backtest(&FailingStrategy, "AAA", &[], &BacktestOptions::default()),
            Err(EngineError::NoMarketData)
        ));
    }

    #[test]
    fn test_portfolio_respects_max_positions_and_consensus() {
        let engine = BacktestEngine::new(frictionless_settings());
        let mut bars_by_symbol = HashMap::new();
        for symbol in ["AAA", "BBB", "CCC"] {
            bars_by_symbol.insert(symbol.to_string(), generate_bars(symbol, &[50.0, 55.0, 60.0, 65.0]));
        }
        let bullish = MockStrategy::new(
            "bullish",
            &[
                ("AAA", 0, SignalAction::Buy),
                ("BBB", 0, SignalAction::Buy),
                ("CCC", 0, SignalAction::Buy),
                ("AAA", 2, SignalAction::Sell),
            ],
        );
        let skeptic = MockStrategy::new("skeptic", &[("CCC", 0, SignalAction::Sell)]);
        let strategies: Vec<(&dyn Strategy, f64)> = vec![(&bullish, 0.6), (&skeptic, 0.4)];
        let options = BacktestOptions {
            position_size: 0.3,
            max_positions: Some(2),
            ..Default::default()
        };

        let result = engine
            .run_portfolio_backtest(&strategies, &bars_by_symbol, &options)
            .unwrap();

        assert_eq!(result.symbols, vec!["AAA", "BBB", "CCC"]);
        assert_eq!(result.equity_curve.len(), 5);
        assert_eq!(result.strategy_name, "bullish+skeptic");
        let traded: Vec<&str> = result.trades.iter().map(|t| t.symbol.as_str()).collect();
        assert!(!traded.contains(&"CCC"));
        let aaa = result.trades.iter().find(|t| t.symbol == "AAA").unwrap();
        assert_eq!(aaa.exit_reason, ExitReason::PortfolioSignal);
        assert_eq!(aaa.exit_date, create_date(2));
        let bbb = result.trades.iter().find(|t| t.symbol == "BBB").unwrap();
        assert_eq!(bbb.exit_reason, ExitReason::BacktestEnd);
        let realized: f64 = result.trades.iter().map(|t| t.profit_loss).sum();
        assert!((result.final_capital - result.initial_capital - realized).abs() < 1e-6);
    }

    #[test]
    fn test_portfolio_decision_needs_strict_majority() {
        let yes = MockStrategy::new("yes", &[("AAA", 0, SignalAction::Buy)]);
        let no = MockStrategy::new("no", &[]);
        let strategies: Vec<(&dyn Strategy, f64)> = vec![(&yes, 0.5), (&no, 0.5)];
        let weights = normalize_strategy_weights(&strategies).unwrap();
        let decision = BacktestEngine::portfolio_decision(&strategies, &weights, "AAA", create_date(0));
        assert_eq!(decision.action, SignalAction::Hold);
        assert!((decision.buy_weight - 0.5).abs() < 1e-12);

        let strategies: Vec<(&dyn Strategy, f64)> = vec![(&yes, 2.0), (&FailingStrategy, 1.0)];
        let weights = normalize_strategy_weights(&strategies).unwrap();
        let decision = BacktestEngine::portfolio_decision(&strategies, &weights, "AAA", create_date(0));
        assert_eq!(decision.action, SignalAction::Buy);
        assert!((decision.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_portfolio_rejects_bad_weights_and_short_history() {
        let engine = BacktestEngine::new(frictionless_settings());
        let mut bars_by_symbol = HashMap::new();
        bars_by_symbol.insert("AAA".to_string(), generate_bars("AAA", &[10.0, 11.0]));
        let mock = MockStrategy::new("mock", &[]);

        let negative: Vec<(&dyn Strategy, f64)> = vec![(&mock, -1.0)];
        assert!(matches!(
            engine.run_portfolio_backtest(&negative, &bars_by_symbol, &BacktestOptions::default()),
            Err(EngineError::InvalidWeight { .. })
        ));
        let zero: Vec<(&dyn Strategy, f64)> = vec![(&mock, 0.0)];
        assert!(matches!(
            engine.run_portfolio_backtest(&zero, &bars_by_symbol, &BacktestOptions::default()),
            Err(EngineError::NonPositiveWeightSum(_))
        ));

        let mut needy = MockStrategy::new("needy", &[]);
        needy.required = 30;
        let strategies: Vec<(&dyn Strategy, f64)> = vec![(&needy, 1.0)];
        assert!(matches!(
            engine.run_portfolio_backtest(&strategies, &bars_by_symbol, &BacktestOptions::default()),
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_batch_runs_each_symbol_independently() {
        let engine = BacktestEngine::new(frictionless_settings());
        let mut bars_by_symbol = HashMap::new();
        bars_by_symbol.insert("BBB".to_string(), generate_bars("BBB", &[10.0, 12.0]));
        bars_by_symbol.insert("AAA".to_string(), generate_bars("AAA", &[10.0, 9.0]));
        let strategy = MockStrategy::new(
            "mock",
            &[("AAA", 0, SignalAction::Buy), ("BBB", 0, SignalAction::Buy)],
        );

        let results = engine.run_batch(&strategy, &bars_by_symbol, &BacktestOptions::default());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "AAA");
        let aaa = results[0].1.as_ref().unwrap();
        let bbb = results[1].1.as_ref().unwrap();
        assert!(aaa.total_return < 0.0);
        assert!(bbb.total_return > 0.0);
    }
}
