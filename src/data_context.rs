use crate::candle_utils::{group_bars_by_symbol, normalize_symbol, union_dates};
use crate::models::{Bar, PriceQuote};
use crate::run_status::RunStatus;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;

/// Source of bars and fundamentals consumed by strategies. Implementations may
/// block; callers own retries and timeouts.
pub trait MarketDataProvider: Send + Sync {
    /// Bars for `symbol` sorted ascending, filtered to `[start, end]`. `limit`
    /// keeps the most recent N bars of the filtered range.
    fn get_historical_prices(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Bar>>;

    fn get_current_price(&self, symbol: &str) -> Result<PriceQuote>;

    fn get_fundamentals(&self, symbol: &str) -> Result<HashMap<String, f64>>;
}

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    symbols: Vec<String>,
    bars: Vec<Bar>,
    #[serde(default)]
    fundamentals: HashMap<String, HashMap<String, f64>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonMarketData {
    Bars(Vec<Bar>),
    Document {
        bars: Vec<Bar>,
        #[serde(default)]
        fundamentals: HashMap<String, HashMap<String, f64>>,
    },
}

/// In-memory market data keyed by symbol.
#[derive(Debug, Clone, Default)]
pub struct MarketData {
    symbols: Vec<String>,
    unique_dates: Vec<DateTime<Utc>>,
    bars_by_symbol: HashMap<String, Vec<Bar>>,
    fundamentals: HashMap<String, HashMap<String, f64>>,
}

impl MarketData {
    pub fn from_bars(
        bars: Vec<Bar>,
        fundamentals: HashMap<String, HashMap<String, f64>>,
    ) -> Result<Self> {
        let normalized: Vec<Bar> = bars
            .into_iter()
            .filter_map(|mut bar| {
                let symbol = normalize_symbol(&bar.symbol)?;
                if !bar.close.is_finite() || bar.close <= 0.0 {
                    return None;
                }
                bar.symbol = symbol;
                Some(bar)
            })
            .collect();
        if normalized.is_empty() {
            return Err(anyhow!("Market data has no usable bars"));
        }

        let bars_by_symbol = group_bars_by_symbol(&normalized);
        let unique_dates = union_dates(&bars_by_symbol);
        let mut symbols: Vec<String> = bars_by_symbol.keys().cloned().collect();
        symbols.sort();
        let fundamentals = fundamentals
            .into_iter()
            .filter_map(|(symbol, values)| normalize_symbol(&symbol).map(|s| (s, values)))
            .collect();

        Ok(Self {
            symbols,
            unique_dates,
            bars_by_symbol,
            fundamentals,
        })
    }

    /// Load a snapshot, picking the decoder from the extension (`.json` or bincode).
    pub fn load<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::load_json(path, status)
        } else {
            Self::load_from_file(path, status)
        }
    }

    pub fn load_json<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!("Loading market data from {}", path.display()));
        let file = File::open(path)
            .with_context(|| format!("Failed to open market data file at {}", path.display()))?;
        let parsed: JsonMarketData = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid market data JSON in {}", path.display()))?;
        let data = match parsed {
            JsonMarketData::Bars(bars) => Self::from_bars(bars, HashMap::new())?,
            JsonMarketData::Document { bars, fundamentals } => Self::from_bars(bars, fundamentals)?,
        };
        info!(
            "Loaded {} symbols across {} dates from {}",
            data.symbols.len(),
            data.unique_dates.len(),
            path.display()
        );
        Ok(data)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P, status: &RunStatus) -> Result<Self> {
        let path = path.as_ref();
        status.set_phase(format!(
            "Loading market data snapshot from {}",
            path.display()
        ));
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let snapshot: MarketDataSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        status.set_phase("Reconstructing market data snapshot");
        Self::from_bars(snapshot.bars, snapshot.fundamentals)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let snapshot = MarketDataSnapshot {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            symbols: self.symbols.clone(),
            bars: self
                .symbols
                .iter()
                .filter_map(|symbol| self.bars_by_symbol.get(symbol))
                .flat_map(|series| series.iter().cloned())
                .collect(),
            fundamentals: self.fundamentals.clone(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }

    pub fn has_data(&self) -> bool {
        !self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn unique_dates(&self) -> &[DateTime<Utc>] {
        &self.unique_dates
    }

    pub fn bars_for(&self, symbol: &str) -> Option<&[Bar]> {
        self.bars_by_symbol.get(symbol).map(|series| series.as_slice())
    }

    pub fn bars_by_symbol(&self) -> &HashMap<String, Vec<Bar>> {
        &self.bars_by_symbol
    }
}

impl MarketDataProvider for MarketData {
    fn get_historical_prices(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Bar>> {
        let key = normalize_symbol(symbol).ok_or_else(|| anyhow!("Empty symbol"))?;
        let series = self
            .bars_by_symbol
            .get(&key)
            .ok_or_else(|| anyhow!("No price history for {}", key))?;
        let lower = match start {
            Some(start) => series.partition_point(|bar| bar.date < start),
            None => 0,
        };
        let upper = match end {
            Some(end) => series.partition_point(|bar| bar.date <= end),
            None => series.len(),
        };
        if lower >= upper {
            return Ok(Vec::new());
        }
        let window = &series[lower..upper];
        let window = match limit {
            Some(limit) if limit < window.len() => &window[window.len() - limit..],
            _ => window,
        };
        Ok(window.to_vec())
    }

    fn get_current_price(&self, symbol: &str) -> Result<PriceQuote> {
        let key = normalize_symbol(symbol).ok_or_else(|| anyhow!("Empty symbol"))?;
        let bar = self
            .bars_by_symbol
            .get(&key)
            .and_then(|series| series.last())
            .ok_or_else(|| anyhow!("No price history for {}", key))?;
        Ok(PriceQuote {
            symbol: key,
            price: bar.close,
            date: bar.date,
        })
    }

    fn get_fundamentals(&self, symbol: &str) -> Result<HashMap<String, f64>> {
        let key = normalize_symbol(symbol).ok_or_else(|| anyhow!("Empty symbol"))?;
        Ok(self.fundamentals.get(&key).cloned().unwrap_or_default())
    }
}
