use crate::analyzer::{OptimalCombination, PerformanceAnalyzer};
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::strategy::Strategy;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

const NORMALIZATION_TOLERANCE: f64 = 1e-12;

/// A named, fixed weight table. Every table sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationProfile {
    pub name: &'static str,
    pub weights: &'static [(&'static str, f64)],
}

pub const ALLOCATION_PROFILES: [AllocationProfile; 6] = [
    AllocationProfile {
        name: "conservative",
        weights: &[
            ("WarrenBuffett", 0.30),
            ("QualityDividend", 0.35),
            ("GARP", 0.20),
            ("Contrarian", 0.15),
        ],
    },
    AllocationProfile {
        name: "balanced",
        weights: &[
            ("WarrenBuffett", 0.20),
            ("QualityDividend", 0.15),
            ("MomentumQuality", 0.15),
            ("GARP", 0.15),
            ("Contrarian", 0.10),
            ("TurtleTrading", 0.10),
            ("MACrossover", 0.15),
        ],
    },
    AllocationProfile {
        name: "aggressive",
        weights: &[
            ("MomentumQuality", 0.30),
            ("TurtleTrading", 0.25),
            ("MACrossover", 0.20),
            ("FourWeekRule", 0.15),
            ("GARP", 0.10),
        ],
    },
    AllocationProfile {
        name: "growth",
        weights: &[
            ("GARP", 0.35),
            ("MomentumQuality", 0.30),
            ("WarrenBuffett", 0.15),
            ("TurtleTrading", 0.10),
            ("MACrossover", 0.10),
        ],
    },
    AllocationProfile {
        name: "value",
        weights: &[
            ("WarrenBuffett", 0.40),
            ("Contrarian", 0.25),
            ("QualityDividend", 0.20),
            ("GARP", 0.15),
        ],
    },
    AllocationProfile {
        name: "technical",
        weights: &[
            ("TurtleTrading", 0.30),
            ("MACrossover", 0.30),
            ("FourWeekRule", 0.25),
            ("MomentumQuality", 0.15),
        ],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
    Volatile,
}

impl MarketRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketRegime::Bull => "bull",
            MarketRegime::Bear => "bear",
            MarketRegime::Sideways => "sideways",
            MarketRegime::Volatile => "volatile",
        }
    }

    /// Weight multipliers; strategies not listed keep their weight.
    pub fn multipliers(&self) -> &'static [(&'static str, f64)] {
        match self {
            MarketRegime::Bull => &[
                ("MomentumQuality", 1.3),
                ("TurtleTrading", 1.2),
                ("MACrossover", 1.2),
                ("FourWeekRule", 1.1),
                ("GARP", 1.1),
                ("QualityDividend", 0.8),
                ("Contrarian", 0.7),
            ],
            MarketRegime::Bear => &[
                ("QualityDividend", 1.4),
                ("WarrenBuffett", 1.3),
                ("Contrarian", 1.2),
                ("MomentumQuality", 0.6),
                ("TurtleTrading", 0.7),
                ("MACrossover", 0.7),
                ("FourWeekRule", 0.8),
                ("GARP", 0.9),
            ],
            MarketRegime::Sideways => &[
                ("Contrarian", 1.3),
                ("QualityDividend", 1.1),
                ("FourWeekRule", 0.9),
                ("TurtleTrading", 0.7),
                ("MACrossover", 0.8),
                ("MomentumQuality", 0.8),
            ],
            MarketRegime::Volatile => &[
                ("QualityDividend", 1.2),
                ("WarrenBuffett", 1.2),
                ("Contrarian", 1.1),
                ("MomentumQuality", 0.7),
                ("TurtleTrading", 0.9),
                ("MACrossover", 0.8),
                ("GARP", 0.9),
            ],
        }
    }

    fn multiplier_for(&self, strategy: &str) -> f64 {
        self.multipliers()
            .iter()
            .find(|(name, _)| *name == strategy)
            .map(|(_, multiplier)| *multiplier)
            .unwrap_or(1.0)
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketRegime {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bull" => Ok(MarketRegime::Bull),
            "bear" => Ok(MarketRegime::Bear),
            "sideways" => Ok(MarketRegime::Sideways),
            "volatile" => Ok(MarketRegime::Volatile),
            _ => Err(EngineError::UnknownRegime(s.to_string())),
        }
    }
}

/// A strategy's vote. `Error` marks a strategy that failed or is not registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteAction {
    Buy,
    Sell,
    Hold,
    Error,
}

impl From<SignalAction> for VoteAction {
    fn from(action: SignalAction) -> Self {
        match action {
            SignalAction::Buy => VoteAction::Buy,
            SignalAction::Sell => VoteAction::Sell,
            SignalAction::Hold => VoteAction::Hold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyVote {
    pub strategy: String,
    pub weight: f64,
    pub action: VoteAction,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub symbol: String,
    /// BUY when BUY voters hold more than half the weight, otherwise HOLD.
    pub overall_action: SignalAction,
    pub buy_vote_weight: f64,
    pub hold_vote_weight: f64,
    /// `max(buy, hold) × 100`.
    pub consensus: f64,
    /// `Σ weight × confidence` over every vote.
    pub weighted_confidence: f64,
    pub votes: Vec<StrategyVote>,
}

/// Owned registry of strategies with weights normalized to sum 1.
#[derive(Default)]
pub struct StrategyAllocator {
    strategies: Vec<Box<dyn Strategy>>,
    weights: BTreeMap<String, f64>,
    active_profile: Option<String>,
}

impl StrategyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a strategy. Every registration resets the weights to an
    /// equal split across the registered strategies.
    pub fn register_strategy(&mut self, strategy: Box<dyn Strategy>) {
        let name = strategy.get_name().to_string();
        match self.strategies.iter().position(|s| s.get_name() == name) {
            Some(index) => self.strategies[index] = strategy,
            None => self.strategies.push(strategy),
        }
        if !self.weights.is_empty() {
            warn!(
                "Registering {} resets strategy weights to an equal split",
                name
            );
        }
        let equal = 1.0 / self.strategies.len() as f64;
        self.weights = self
            .strategies
            .iter()
            .map(|s| (s.get_name().to_string(), equal))
            .collect();
        self.active_profile = None;
    }

    pub fn remove_strategy(&mut self, name: &str) -> Option<Box<dyn Strategy>> {
        let index = self.strategies.iter().position(|s| s.get_name() == name)?;
        let removed = self.strategies.remove(index);
        self.weights.remove(name);
        let total: f64 = self.weights.values().sum();
        if total > 0.0 {
            for weight in self.weights.values_mut() {
                *weight /= total;
            }
        } else {
            self.weights.clear();
        }
        Some(removed)
    }

    pub fn strategy(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies
            .iter()
            .find(|s| s.get_name() == name)
            .map(|s| s.as_ref())
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .iter()
            .map(|s| s.get_name().to_string())
            .collect()
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn weight(&self, name: &str) -> f64 {
        self.weights.get(name).copied().unwrap_or(0.0)
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.active_profile.as_deref()
    }

    pub fn available_profiles() -> Vec<&'static str> {
        ALLOCATION_PROFILES.iter().map(|p| p.name).collect()
    }

    /// Replace the weights. Nothing changes when a weight is negative or not
    /// finite, or when the weights do not sum to a positive value.
    pub fn set_weights(&mut self, weights: &HashMap<String, f64>) -> EngineResult<()> {
        self.weights = Self::normalized(weights.iter().map(|(k, v)| (k.as_str(), *v)))?;
        self.active_profile = None;
        Ok(())
    }

    pub fn load_profile(&mut self, name: &str) -> EngineResult<()> {
        let profile = ALLOCATION_PROFILES
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| EngineError::UnknownProfile(name.to_string()))?;
        self.weights = Self::normalized(profile.weights.iter().copied())?;
        self.active_profile = Some(profile.name.to_string());
        info!("Loaded allocation profile {}", profile.name);
        Ok(())
    }

    /// Scale the current weights by the regime's multipliers and renormalize.
    /// Repeated calls compound.
    pub fn rebalance_for_market_conditions(&mut self, regime: &str) -> EngineResult<MarketRegime> {
        let regime: MarketRegime = regime.parse()?;
        let scaled: Vec<(String, f64)> = self
            .weights
            .iter()
            .map(|(name, weight)| (name.clone(), weight * regime.multiplier_for(name)))
            .collect();
        self.weights = Self::normalized(scaled.iter().map(|(k, v)| (k.as_str(), *v)))?;
        info!("Rebalanced {} strategy weights for a {} market", self.weights.len(), regime);
        Ok(regime)
    }

    pub fn apply_optimal_combination(&mut self, combination: &OptimalCombination) -> EngineResult<()> {
        self.set_weights(&PerformanceAnalyzer::combination_weights(combination))
    }

    fn normalized<'a, I>(weights: I) -> EngineResult<BTreeMap<String, f64>>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let weights: Vec<(&str, f64)> = weights.into_iter().collect();
        for (name, weight) in &weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::InvalidWeight {
                    strategy: name.to_string(),
                    weight: *weight,
                });
            }
        }
        let total: f64 = weights.iter().map(|(_, weight)| weight).sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(EngineError::NonPositiveWeightSum(total));
        }
        let scale = if (total - 1.0).abs() <= NORMALIZATION_TOLERANCE {
            1.0
        } else {
            total
        };
        Ok(weights
            .into_iter()
            .map(|(name, weight)| (name.to_string(), weight / scale))
            .collect())
    }

    /// Ask every positively weighted strategy about `symbol` and combine the
    /// votes. A failing or missing strategy votes ERROR and its weight counts
    /// toward HOLD.
    pub fn analyze_symbol(&self, symbol: &str, date: AnalysisDate) -> ConsensusResult {
        let mut ordered: Vec<(&str, f64)> = self
            .strategies
            .iter()
            .map(|s| (s.get_name(), self.weight(s.get_name())))
            .collect();
        for (name, weight) in &self.weights {
            if self.strategy(name).is_none() {
                ordered.push((name.as_str(), *weight));
            }
        }

        let mut votes = Vec::new();
        for (name, weight) in ordered.into_iter().filter(|(_, weight)| *weight > 0.0) {
            let vote = match self.strategy(name) {
                None => StrategyVote {
                    strategy: name.to_string(),
                    weight,
                    action: VoteAction::Error,
                    confidence: 0.0,
                    reasoning: "strategy is not registered".to_string(),
                },
                Some(strategy) => match strategy.analyze(symbol, date) {
                    Ok(signal) => StrategyVote {
                        strategy: name.to_string(),
                        weight,
                        action: signal.action.into(),
                        confidence: signal.confidence,
                        reasoning: signal.reasoning,
                    },
                    Err(err) => {
                        warn!("{} failed to analyze {}: {}", name, symbol, err);
                        StrategyVote {
                            strategy: name.to_string(),
                            weight,
                            action: VoteAction::Error,
                            confidence: 0.0,
                            reasoning: err.to_string(),
                        }
                    }
                },
            };
            votes.push(vote);
        }

        let buy_vote_weight: f64 = votes
            .iter()
            .filter(|v| v.action == VoteAction::Buy)
            .map(|v| v.weight)
            .sum();
        let hold_vote_weight: f64 = votes
            .iter()
            .filter(|v| v.action != VoteAction::Buy)
            .map(|v| v.weight)
            .sum();
        let overall_action = if is_majority(buy_vote_weight) {
            SignalAction::Buy
        } else {
            SignalAction::Hold
        };

        ConsensusResult {
            symbol: symbol.to_string(),
            overall_action,
            buy_vote_weight,
            hold_vote_weight,
            consensus: buy_vote_weight.max(hold_vote_weight) * 100.0,
            weighted_confidence: votes.iter().map(|v| v.weight * v.confidence).sum(),
            votes,
        }
    }
}
