use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Profit thresholds are tracked in basis points so `0.1` and `0.1000000001`
/// key the same rung.
pub(crate) fn level_key(threshold: f64) -> i64 {
    (threshold * 10_000.0).round() as i64
}

/// An open simulated long position and its risk-control state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub entry_date: DateTime<Utc>,
    pub entry_price: f64,
    pub shares: u64,
    pub original_shares: u64,
    /// Cost still attributed to the remaining shares, entry commission included.
    pub cost_basis: f64,
    pub highest_price_seen: f64,
    pub trailing_stop_price: Option<f64>,
    pub trailing_stop_active: bool,
    pub profit_levels_taken: BTreeSet<i64>,
    pub confidence: f64,
}

/// Cost basis released by a share reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShareReduction {
    pub shares: u64,
    pub allocated_cost: f64,
}

impl Position {
    pub fn open(
        symbol: &str,
        entry_date: DateTime<Utc>,
        entry_price: f64,
        shares: u64,
        cost_basis: f64,
        confidence: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            entry_date,
            entry_price,
            shares,
            original_shares: shares,
            cost_basis,
            highest_price_seen: entry_price,
            trailing_stop_price: None,
            trailing_stop_active: false,
            profit_levels_taken: BTreeSet::new(),
            confidence,
        }
    }

    pub fn gain_at(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price
    }

    pub fn holding_days(&self, date: DateTime<Utc>) -> i64 {
        (date - self.entry_date).num_days().max(0)
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    pub fn is_level_taken(&self, threshold: f64) -> bool {
        self.profit_levels_taken.contains(&level_key(threshold))
    }

    pub fn mark_level_taken(&mut self, threshold: f64) {
        self.profit_levels_taken.insert(level_key(threshold));
    }

    /// Track the running high and, once the high has gained `activation` over the
    /// entry, ratchet the trailing stop to `high × (1 − distance)`. The stop
    /// never moves down.
    pub fn update_trailing_stop(&mut self, price: f64, enabled: bool, activation: f64, distance: f64) {
        if price > self.highest_price_seen {
            self.highest_price_seen = price;
        }
        if !enabled {
            return;
        }
        if self.gain_at(self.highest_price_seen) >= activation {
            self.trailing_stop_active = true;
            let candidate = self.highest_price_seen * (1.0 - distance);
            self.trailing_stop_price = Some(match self.trailing_stop_price {
                Some(current) => current.max(candidate),
                None => candidate,
            });
        }
    }

    /// Remove up to `shares` from the position, releasing a pro-rata slice of the
    /// remaining cost basis. Selling every share releases the full remainder.
    pub fn reduce(&mut self, shares: u64) -> ShareReduction {
        let sold = shares.min(self.shares);
        if sold == 0 {
            return ShareReduction {
                shares: 0,
                allocated_cost: 0.0,
            };
        }
        let allocated_cost = if sold == self.shares {
            self.cost_basis
        } else {
            self.cost_basis * sold as f64 / self.shares as f64
        };
        self.shares -= sold;
        self.cost_basis -= allocated_cost;
        if self.shares == 0 {
            self.cost_basis = 0.0;
        }
        ShareReduction {
            shares: sold,
            allocated_cost,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shares == 0
    }
}

/// Open positions keyed by symbol, at most one per symbol.
#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: BTreeMap<String, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new position. Returns `false` (and leaves the ledger unchanged)
    /// when the symbol already has one open.
    pub fn open(&mut self, position: Position) -> bool {
        if self.positions.contains_key(&position.symbol) {
            return false;
        }
        self.positions.insert(position.symbol.clone(), position);
        true
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Mark-to-market value of every open position. Positions without a price
    /// are valued at their entry price.
    pub fn market_value<F>(&self, mut price_for: F) -> f64
    where
        F: FnMut(&str) -> Option<f64>,
    {
        self.positions
            .values()
            .map(|position| {
                let price = price_for(&position.symbol).unwrap_or(position.entry_price);
                position.market_value(price)
            })
            .sum()
    }

    pub fn drain(&mut self) -> Vec<Position> {
        std::mem::take(&mut self.positions).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn entry_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
    }

    fn sample_position(shares: u64) -> Position {
        Position::open("AAA", entry_date(), 100.0, shares, 100.0 * shares as f64 + 10.0, 0.8)
    }

    #[test]
    fn ledger_allows_one_position_per_symbol() {
        let mut ledger = PositionLedger::new();
        assert!(ledger.open(sample_position(10)));
        assert!(!ledger.open(sample_position(20)));
        assert_eq!(ledger.count(), 1);
        assert_eq!(ledger.get("AAA").map(|p| p.shares), Some(10));
        assert!(ledger.remove("AAA").is_some());
        assert!(ledger.is_empty());
    }

    #[test]
    fn market_value_falls_back_to_entry_price() {
        let mut ledger = PositionLedger::new();
        ledger.open(sample_position(10));
        let mut other = sample_position(5);
        other.symbol = "BBB".to_string();
        ledger.open(other);
        let value = ledger.market_value(|symbol| (symbol == "AAA").then_some(110.0));
        assert!((value - (10.0 * 110.0 + 5.0 * 100.0)).abs() < 1e-9);
    }

    #[test]
    fn reduce_releases_pro_rata_cost_and_full_remainder() {
        let mut position = sample_position(10);
        let first = position.reduce(3);
        assert_eq!(first.shares, 3);
        assert!((first.allocated_cost - 1010.0 * 0.3).abs() < 1e-9);
        let rest = position.reduce(50);
        assert_eq!(rest.shares, 7);
        assert!((first.allocated_cost + rest.allocated_cost - 1010.0).abs() < 1e-9);
        assert!(position.is_closed());
        assert_eq!(position.cost_basis, 0.0);
        assert_eq!(position.original_shares, 10);
    }

    #[test]
    fn trailing_stop_activates_and_tracks_high() {
        let mut position = sample_position(10);
        position.update_trailing_stop(104.0, true, 0.05, 0.10);
        assert!(!position.trailing_stop_active);
        position.update_trailing_stop(105.0, true, 0.05, 0.10);
        assert!(position.trailing_stop_active);
        assert!((position.trailing_stop_price.unwrap() - 94.5).abs() < 1e-9);
        position.update_trailing_stop(130.0, true, 0.05, 0.10);
        assert!((position.trailing_stop_price.unwrap() - 117.0).abs() < 1e-9);
        position.update_trailing_stop(116.0, true, 0.05, 0.10);
        assert!((position.trailing_stop_price.unwrap() - 117.0).abs() < 1e-9);
        assert_eq!(position.highest_price_seen, 130.0);
    }

    #[test]
    fn level_keys_ignore_float_noise() {
        let mut position = sample_position(10);
        position.mark_level_taken(0.1);
        assert!(position.is_level_taken(0.1 + 1e-12));
        assert!(!position.is_level_taken(0.2));
        assert_eq!(position.holding_days(entry_date() + Duration::days(9)), 9);
    }

    proptest! {
        #[test]
        fn trailing_stop_never_decreases(path in proptest::collection::vec(50.0f64..200.0, 1..60)) {
            let mut position = sample_position(10);
            let mut previous: Option<f64> = None;
            for price in path {
                position.update_trailing_stop(price, true, 0.05, 0.10);
                if let (Some(before), Some(after)) = (previous, position.trailing_stop_price) {
                    prop_assert!(after >= before);
                }
                previous = position.trailing_stop_price.or(previous);
            }
        }

        #[test]
        fn shares_never_increase(cuts in proptest::collection::vec(0u64..8, 1..10)) {
            let mut position = sample_position(20);
            let mut last = position.shares;
            for cut in cuts {
                position.reduce(cut);
                prop_assert!(position.shares <= last);
                last = position.shares;
            }
        }
    }
}
