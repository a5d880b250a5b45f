use thiserror::Error;

/// Failures the caller is expected to branch on. Opaque collaborator failures
/// (market data, strategy internals, file loading) travel as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("insufficient data for {symbol}: strategy needs {required} bars, {available} available")]
    InsufficientData {
        symbol: String,
        required: usize,
        available: usize,
    },
    #[error("invalid weight {weight} for strategy {strategy}")]
    InvalidWeight { strategy: String, weight: f64 },
    #[error("weights must sum to a positive value (sum: {0})")]
    NonPositiveWeightSum(f64),
    #[error("unknown allocation profile '{0}'")]
    UnknownProfile(String),
    #[error("unknown market regime '{0}'")]
    UnknownRegime(String),
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error("no trades to resample")]
    EmptyTradePopulation,
    #[error("no trade history recorded")]
    NoTradeHistory,
    #[error("invalid backtest options: {0}")]
    InvalidOptions(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("no market data available")]
    NoMarketData,
}

pub type EngineResult<T> = Result<T, EngineError>;
