use crate::models::{Signal, SignalAction};

/// Create a hold signal (default action when no trade signal is generated)
pub fn hold_signal(reasoning: impl Into<String>) -> Signal {
    Signal::new(SignalAction::Hold, 0.0, reasoning)
}

/// Create a buy signal with the given confidence
pub fn buy_signal(confidence: f64, reasoning: impl Into<String>) -> Signal {
    Signal::new(SignalAction::Buy, confidence, reasoning)
}

/// Create a sell signal with the given confidence
pub fn sell_signal(confidence: f64, reasoning: impl Into<String>) -> Signal {
    Signal::new(SignalAction::Sell, confidence, reasoning)
}

/// Check if confidence meets the minimum threshold
pub fn meets_confidence_threshold(confidence: f64, min_confidence: f64) -> bool {
    confidence >= min_confidence - 1e-6
}
