pub mod allocator;
pub mod analyzer;
pub mod candle_utils;
pub mod commands;
pub mod config;
pub mod data_context;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ledger;
pub mod models;
pub mod monte_carlo;
pub mod param_utils;
pub mod performance;
pub mod run_status;
pub mod strategy;
pub mod strategy_utils;
pub mod trading_rules;
pub mod walk_forward;
