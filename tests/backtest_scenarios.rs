use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Once;
use stratalloc::config::{BacktestOptions, EngineRuntimeSettings, ProfitLevel};
use stratalloc::engine::BacktestEngine;
use stratalloc::error::EngineError;
use stratalloc::models::{AnalysisDate, Bar, ExitReason, Signal, SignalAction};
use stratalloc::strategy::Strategy as TradingStrategy;

const SLIPPAGE: f64 = 0.0005;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn day(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset)
}

fn bars(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            symbol: symbol.to_string(),
            date: day(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 10_000.0,
        })
        .collect()
}

fn frictionless() -> BacktestEngine {
    BacktestEngine::new(EngineRuntimeSettings {
        slippage_rate: 0.0,
        commission_rate: 0.0,
        ..Default::default()
    })
}

/// Replays a fixed action per bar index.
struct ScriptedStrategy {
    actions: HashMap<DateTime<Utc>, SignalAction>,
}

impl ScriptedStrategy {
    fn buy_on(days: &[i64]) -> Self {
        Self {
            actions: days.iter().map(|d| (day(*d), SignalAction::Buy)).collect(),
        }
    }

    fn from_codes(codes: &[u8]) -> Self {
        Self {
            actions: codes
                .iter()
                .enumerate()
                .map(|(i, code)| {
                    let action = match code % 3 {
                        0 => SignalAction::Buy,
                        1 => SignalAction::Sell,
                        _ => SignalAction::Hold,
                    };
                    (day(i as i64), action)
                })
                .collect(),
        }
    }
}

impl TradingStrategy for ScriptedStrategy {
    fn get_name(&self) -> &str {
        "Scripted"
    }

    fn analyze(&self, _symbol: &str, date: AnalysisDate) -> Result<Signal> {
        let AnalysisDate::On(date) = date else {
            return Err(anyhow!("scripted strategy needs a concrete date"));
        };
        let action = self.actions.get(&date).copied().unwrap_or(SignalAction::Hold);
        Ok(Signal::new(action, 0.75, "scripted"))
    }

    fn get_required_historical_days(&self) -> usize {
        1
    }
}

#[test]
fn forced_close_at_end_books_the_full_move() {
    ensure_test_env();
    let closes = [100.0, 101.0, 103.0, 102.0, 104.0, 106.0, 105.0, 107.0, 108.0, 110.0];
    let options = BacktestOptions {
        position_size: 1.0,
        ..Default::default()
    };

    let result = frictionless()
        .run_backtest(&ScriptedStrategy::buy_on(&[0]), "AAA", &bars("AAA", &closes), &options)
        .unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::BacktestEnd);
    assert!((trade.return_pct - 0.10).abs() < 1e-9);
    assert!((result.total_return - 0.10).abs() < 1e-9);
    assert_eq!(result.equity_curve.len(), closes.len() + 1);
    assert!((result.equity_curve[closes.len()] - 110_000.0).abs() < 1e-6);
}

#[test]
fn stop_loss_fills_at_the_stop_level() {
    ensure_test_env();
    let engine = BacktestEngine::new(EngineRuntimeSettings {
        slippage_rate: SLIPPAGE,
        ..Default::default()
    });
    let options = BacktestOptions {
        stop_loss: Some(0.10),
        ..Default::default()
    };

    let result = engine
        .run_backtest(
            &ScriptedStrategy::buy_on(&[0]),
            "AAA",
            &bars("AAA", &[100.0, 97.0, 85.0, 86.0]),
            &options,
        )
        .unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert_eq!(trade.exit_date, day(2));
    let expected = trade.entry_price * 0.90 * (1.0 - SLIPPAGE);
    assert!((trade.exit_price - expected).abs() < 1e-9);
    assert!((trade.exit_price - 100.0 * 0.90 * (1.0 - SLIPPAGE)).abs() < 0.1);
}

#[test]
fn trailing_stop_locks_in_gains() {
    ensure_test_env();
    let options = BacktestOptions {
        position_size: 1.0,
        stop_loss: Some(0.05),
        trailing_stop: true,
        trailing_stop_activation: 0.05,
        trailing_stop_distance: 0.10,
        ..Default::default()
    };

    let result = frictionless()
        .run_backtest(
            &ScriptedStrategy::buy_on(&[0]),
            "AAA",
            &bars("AAA", &[100.0, 105.0, 110.0, 120.0, 130.0, 125.0, 116.0, 118.0]),
            &options,
        )
        .unwrap();

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::TrailingStop);
    assert_eq!(trade.exit_date, day(6));
    // the stop sits at 117 but the fill is the 116 close
    assert!((trade.exit_price - 116.0).abs() < 1e-9);
    assert!((trade.return_pct - 0.16).abs() < 1e-9);
}

#[test]
fn later_exit_rules_overwrite_the_reason() {
    ensure_test_env();
    // Both the stop loss and the holding limit fire on day 2; the holding limit
    // is checked later and fills at the close.
    let options = BacktestOptions {
        position_size: 0.5,
        stop_loss: Some(0.10),
        max_holding_days: Some(2),
        ..Default::default()
    };

    let result = frictionless()
        .run_backtest(
            &ScriptedStrategy::buy_on(&[0]),
            "AAA",
            &bars("AAA", &[100.0, 95.0, 80.0]),
            &options,
        )
        .unwrap();

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit_reason, ExitReason::MaxHoldingDays);
    assert!((result.trades[0].exit_price - 80.0).abs() < 1e-9);
}

#[test]
fn full_allocation_never_enters_when_commission_applies() {
    ensure_test_env();
    let engine = BacktestEngine::new(EngineRuntimeSettings::default());
    let options = BacktestOptions {
        position_size: 1.0,
        ..Default::default()
    };
    let result = engine
        .run_backtest(
            &ScriptedStrategy::buy_on(&[0, 1, 2]),
            "AAA",
            &bars("AAA", &[100.0, 100.0, 100.0]),
            &options,
        )
        .unwrap();
    assert!(result.trades.is_empty());
    assert_eq!(result.final_capital, result.initial_capital);
}

#[test]
fn empty_series_is_rejected() {
    ensure_test_env();
    let err = frictionless()
        .run_backtest(
            &ScriptedStrategy::buy_on(&[0]),
            "AAA",
            &[],
            &BacktestOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::NoMarketData));
}

fn options_strategy() -> impl Strategy<Value = BacktestOptions> {
    (
        0.05f64..=1.0,
        proptest::option::of(0.02f64..0.3),
        proptest::option::of(0.02f64..0.5),
        proptest::option::of(1i64..10),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(position_size, stop_loss, take_profit, max_holding_days, trailing_stop, partial)| {
                BacktestOptions {
                    position_size,
                    stop_loss,
                    take_profit,
                    max_holding_days,
                    trailing_stop,
                    partial_profit_taking: partial,
                    profit_levels: vec![
                        ProfitLevel {
                            profit_threshold: 0.05,
                            sell_fraction: 0.3,
                        },
                        ProfitLevel {
                            profit_threshold: 0.15,
                            sell_fraction: 0.5,
                        },
                    ],
                    ..Default::default()
                }
            },
        )
}

proptest! {
    #[test]
    fn capital_is_conserved(
        closes in proptest::collection::vec(5.0f64..200.0, 1..60),
        codes in proptest::collection::vec(0u8..3, 60),
        options in options_strategy(),
    ) {
        let engine = BacktestEngine::new(EngineRuntimeSettings::default());
        let strategy = ScriptedStrategy::from_codes(&codes);
        let result = engine
            .run_backtest(&strategy, "AAA", &bars("AAA", &closes), &options)
            .unwrap();

        let realized: f64 = result.trades.iter().map(|t| t.profit_loss).sum();
        prop_assert!((result.final_capital - result.initial_capital - realized).abs() < 1e-6);
        prop_assert_eq!(result.equity_curve.len(), result.dates.len() + 1);
        prop_assert!((0.0..=1.0).contains(&result.metrics.max_drawdown));
        prop_assert!(result.trades.iter().all(|t| t.shares > 0));
    }
}
