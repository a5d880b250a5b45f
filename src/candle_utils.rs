use crate::models::Bar;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// Groups owned bars keyed by symbol, each series sorted ascending by date.
pub fn group_bars_by_symbol(bars: &[Bar]) -> HashMap<String, Vec<Bar>> {
    group_bars_for_symbols(bars, None)
}

/// Groups bars keyed by symbol, optionally restricted to a known set.
pub fn group_bars_for_symbols(bars: &[Bar], symbols: Option<&[String]>) -> HashMap<String, Vec<Bar>> {
    let mut grouped: HashMap<String, Vec<Bar>> = HashMap::new();
    for bar in bars {
        if let Some(list) = symbols {
            if !list.iter().any(|symbol| symbol == &bar.symbol) {
                continue;
            }
        }
        grouped.entry(bar.symbol.clone()).or_default().push(bar.clone());
    }
    for series in grouped.values_mut() {
        sort_and_dedup(series);
    }
    grouped
}

/// Sorts a single series ascending and drops repeated dates (last bar wins).
pub fn sort_and_dedup(series: &mut Vec<Bar>) {
    series.sort_by(|a, b| a.date.cmp(&b.date));
    let mut deduped: Vec<Bar> = Vec::with_capacity(series.len());
    for bar in series.drain(..) {
        match deduped.last_mut() {
            Some(last) if last.date == bar.date => *last = bar,
            _ => deduped.push(bar),
        }
    }
    *series = deduped;
}

/// Sorted union of every date present in the grouped series.
pub fn union_dates(bars_by_symbol: &HashMap<String, Vec<Bar>>) -> Vec<DateTime<Utc>> {
    bars_by_symbol
        .values()
        .flat_map(|series| series.iter().map(|bar| bar.date))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
