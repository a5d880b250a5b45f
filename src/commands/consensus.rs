use crate::allocator::StrategyAllocator;
use crate::commands::market_data_snapshot::{load_market_data, print_json};
use crate::models::AnalysisDate;
use crate::strategy::{create_strategy, AVAILABLE_STRATEGIES};
use anyhow::Result;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Register every built-in strategy, apply the profile and regime, and print
/// the consensus for one symbol.
pub fn run(
    data_file: &Path,
    symbol: &str,
    date: AnalysisDate,
    profile: Option<&str>,
    regime: Option<&str>,
) -> Result<()> {
    let data = Arc::new(load_market_data(data_file)?);
    let mut allocator = StrategyAllocator::new();
    for name in AVAILABLE_STRATEGIES {
        allocator.register_strategy(create_strategy(name, HashMap::new(), data.clone())?);
    }
    if let Some(profile) = profile {
        allocator.load_profile(profile)?;
    }
    if let Some(regime) = regime {
        allocator.rebalance_for_market_conditions(regime)?;
    }

    let symbol = symbol.trim().to_uppercase();
    let result = allocator.analyze_symbol(&symbol, date);
    info!(
        "{} consensus for {}: {:.1}%",
        result.overall_action.as_str(),
        symbol,
        result.consensus
    );
    print_json(&result)
}
