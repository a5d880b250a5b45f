use crate::commands::market_data_snapshot::load_market_data;
use anyhow::Result;
use log::info;
use std::path::Path;

/// Re-encode a market data file as a versioned binary snapshot.
pub fn run(input_path: &Path, output_path: &Path) -> Result<()> {
    info!(
        "Generating market data snapshot at {} from {}",
        output_path.display(),
        input_path.display()
    );

    let market_data = load_market_data(input_path)?;
    market_data.save_to_file(output_path)?;
    info!(
        "Market data snapshot with {} symbols written to {}",
        market_data.symbols().len(),
        output_path.display()
    );

    Ok(())
}
