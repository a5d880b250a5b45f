use std::collections::HashMap;

/// Get a parameter value with a default fallback
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Get a parameter as usize with a minimum value
pub fn get_usize_param_min(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Finite, strictly positive parameter or `None` (absent, zero and negative all disable).
pub fn get_positive_param(params: &HashMap<String, f64>, key: &str) -> Option<f64> {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
}
