pub mod backtest;
pub mod consensus;
pub mod export_market_data;
pub mod market_data_snapshot;
pub mod monte_carlo;
pub mod portfolio;
pub mod walk_forward;
