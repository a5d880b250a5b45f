use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use stratalloc::allocator::{StrategyAllocator, VoteAction};
use stratalloc::analyzer::{PerformanceAnalyzer, StrategyFilter};
use stratalloc::config::{BacktestOptions, EngineRuntimeSettings, WalkForwardConfig};
use stratalloc::data_context::{MarketData, MarketDataProvider};
use stratalloc::engine::BacktestEngine;
use stratalloc::error::EngineError;
use stratalloc::models::{AnalysisDate, Bar, SignalAction};
use stratalloc::monte_carlo::MonteCarloSimulator;
use stratalloc::run_status::RunStatus;
use stratalloc::strategy::{create_strategy, Strategy, AVAILABLE_STRATEGIES};
use stratalloc::walk_forward::WalkForwardHarness;

fn ensure_test_env() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two symbols with oscillating prices so RSI and crossover strategies trade.
fn market_data(days: usize) -> MarketData {
    let base = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
    let mut bars = Vec::new();
    for (symbol, phase, drift) in [("AAA", 0.0, 0.05), ("BBB", 1.3, 0.02)] {
        for i in 0..days {
            let t = i as f64;
            let close = 100.0 + drift * t + 12.0 * (t / 9.0 + phase).sin();
            bars.push(Bar {
                symbol: symbol.to_string(),
                date: base + Duration::days(i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 50_000.0,
            });
        }
    }
    MarketData::from_bars(bars, HashMap::new()).unwrap()
}

fn strategies(data: &Arc<MarketData>) -> Vec<Box<dyn Strategy>> {
    let params = HashMap::from([("minConfidence".to_string(), 0.0)]);
    AVAILABLE_STRATEGIES
        .iter()
        .map(|name| create_strategy(name, params.clone(), data.clone()).unwrap())
        .collect()
}

#[test]
fn backtests_feed_analyzer_and_allocator() {
    ensure_test_env();
    let data = Arc::new(market_data(300));
    let engine = BacktestEngine::new(EngineRuntimeSettings::default());
    let options = BacktestOptions {
        position_size: 0.5,
        stop_loss: Some(0.15),
        ..Default::default()
    };

    let mut analyzer = PerformanceAnalyzer::default();
    let strategies = strategies(&data);
    for strategy in &strategies {
        for symbol in ["AAA", "BBB"] {
            let bars = data.bars_for(symbol).unwrap();
            let result = engine
                .run_backtest(strategy.as_ref(), symbol, bars, &options)
                .unwrap();
            let realized = result.realized_profit_loss();
            assert!((result.final_capital - result.initial_capital - realized).abs() < 1e-6);
            analyzer.record_backtest(strategy.get_name(), &result);
        }
    }
    assert!(analyzer.trade_count() > 0);
    let overall = analyzer.analyze_strategy(&StrategyFilter::All);
    assert_eq!(overall.total_trades, analyzer.trade_count());

    let combination = analyzer.find_optimal_combination(2).unwrap();
    assert!(!combination.strategies.is_empty());
    assert!(combination.strategies.len() <= 2);
    let total: f64 = combination.weights.values().sum();
    assert!((total - 1.0).abs() < 1e-9);

    let mut allocator = StrategyAllocator::new();
    for strategy in strategies {
        allocator.register_strategy(strategy);
    }
    allocator.apply_optimal_combination(&combination).unwrap();
    let weight_total: f64 = allocator.weights().values().sum();
    assert!((weight_total - 1.0).abs() < 1e-9);
    assert_eq!(allocator.active_profile(), None);

    let consensus = allocator.analyze_symbol("AAA", AnalysisDate::Today);
    assert!(consensus.votes.iter().all(|v| v.weight > 0.0));
    assert!(consensus.votes.iter().all(|v| v.action != VoteAction::Error));
    assert!((consensus.buy_vote_weight + consensus.hold_vote_weight - 1.0).abs() < 1e-9);
}

#[test]
fn profile_consensus_over_builtin_strategies() {
    ensure_test_env();
    let data = Arc::new(market_data(120));
    let mut allocator = StrategyAllocator::new();
    for strategy in strategies(&data) {
        allocator.register_strategy(strategy);
    }
    allocator.load_profile("conservative").unwrap();
    assert_eq!(allocator.weight("QualityDividend"), 0.35);

    // None of the profile's strategies are registered, so every vote is ERROR.
    let result = allocator.analyze_symbol("AAA", AnalysisDate::Today);
    assert_eq!(result.overall_action, SignalAction::Hold);
    assert_eq!(result.votes.len(), 4);
    assert!(result.votes.iter().all(|v| v.action == VoteAction::Error));
    assert!((result.consensus - 100.0).abs() < 1e-9);

    allocator.load_profile("technical").unwrap();
    allocator.rebalance_for_market_conditions("bear").unwrap();
    let total: f64 = allocator.weights().values().sum();
    assert!((total - 1.0).abs() < 1e-9);
    assert!(allocator.weight("MACrossover") < 0.30);
}

#[test]
fn walk_forward_and_monte_carlo_on_one_symbol() {
    ensure_test_env();
    let data = Arc::new(market_data(260));
    let engine = BacktestEngine::new(EngineRuntimeSettings::default());
    let strategy = create_strategy("rsi", HashMap::new(), data.clone()).unwrap();
    let bars = data.get_historical_prices("AAA", None, None, None).unwrap();

    let config = WalkForwardConfig {
        train_days: 60,
        test_days: 60,
        step: 40,
    };
    let report = WalkForwardHarness::new(&engine)
        .run(
            strategy.as_ref(),
            "AAA",
            &bars,
            &config,
            &BacktestOptions::default(),
            &RunStatus::new(),
        )
        .unwrap();
    assert_eq!(report.summary.total_periods, report.periods.len());
    assert_eq!(report.periods.len(), WalkForwardHarness::period_count(bars.len(), &config));
    assert!((0.0..=1.0).contains(&report.summary.consistency));
    for period in &report.periods {
        assert!(period.test_start <= period.test_end);
        assert!(period.train_end.unwrap() < period.test_start);
    }

    let simulator = MonteCarloSimulator::new(Some(11));
    let summary = simulator
        .run(&[0.05, -0.02, 0.03], 1, 1, &RunStatus::new())
        .unwrap();
    assert_eq!(summary.distribution.len(), 1);
    assert!([0.05, -0.02, 0.03]
        .iter()
        .any(|r| (r - summary.distribution[0]).abs() < 1e-12));

    let backtest = engine
        .run_backtest(strategy.as_ref(), "AAA", &bars, &BacktestOptions::default())
        .unwrap();
    match simulator.run_on_backtest(&backtest, 100, 10, &RunStatus::new()) {
        Ok(summary) => assert_eq!(summary.simulations, 100),
        Err(err) => {
            assert!(backtest.trades.is_empty());
            assert!(matches!(err, EngineError::EmptyTradePopulation));
        }
    }
}
