//! Anomaly scoring of location estimates.

use serde::{Deserialize, Serialize};

use crate::models::{AlertSeverity, AnomalyReason, AnomalyScore, EstimatedLocation};

/// Scores a new estimate against the asset's recent history.
///
/// Implementations must be cheap and side-effect free; the anomaly processor
/// calls them once per consumed estimate.
pub trait AnomalyScorer: Send + Sync {
    /// `history` holds the asset's previous estimates, oldest first, and
    /// never includes `current`.
    fn score(&self, history: &[EstimatedLocation], current: &EstimatedLocation) -> AnomalyScore;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Fastest plausible movement for a tracked asset.
    pub max_speed_mps: f64,
    /// Displacement treated as a jump when it happens within `jump_window_secs`.
    pub jump_distance_m: f64,
    pub jump_window_secs: f64,
    /// Confidence points below the recent average that count as a drop.
    pub confidence_drop: f64,
    /// RSSI variance (dBm^2) above which the signal is unstable.
    pub max_rssi_variance: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            max_speed_mps: 10.0,
            jump_distance_m: 100.0,
            jump_window_secs: 10.0,
            confidence_drop: 40.0,
            max_rssi_variance: 150.0,
        }
    }
}

/// Rule-based scorer combining speed, displacement, confidence and signal
/// checks. The overall score is the strongest single indicator.
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnomalyScorer {
    config: AnomalyConfig,
}

impl HeuristicAnomalyScorer {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    fn speed_component(&self, current: &EstimatedLocation) -> f64 {
        match current.speed_mps {
            Some(speed) if speed > self.config.max_speed_mps => {
                let excess = speed / self.config.max_speed_mps - 1.0;
                0.5 + 0.5 * excess.min(1.0)
            }
            _ => 0.0,
        }
    }

    fn jump_component(
        &self,
        previous: Option<&EstimatedLocation>,
        current: &EstimatedLocation,
    ) -> f64 {
        let (Some(previous), Some(moved)) = (previous, current.distance_moved_m) else {
            return 0.0;
        };
        let elapsed =
            (current.estimated_at - previous.estimated_at).num_milliseconds() as f64 / 1000.0;
        if moved <= self.config.jump_distance_m || elapsed > self.config.jump_window_secs {
            return 0.0;
        }
        let excess = moved / self.config.jump_distance_m - 1.0;
        0.7 + 0.3 * excess.min(1.0)
    }

    fn confidence_component(
        &self,
        history: &[EstimatedLocation],
        current: &EstimatedLocation,
    ) -> f64 {
        if history.is_empty() {
            return 0.0;
        }
        let mean = history.iter().map(|l| l.confidence).sum::<f64>() / history.len() as f64;
        if mean - current.confidence >= self.config.confidence_drop {
            0.4
        } else {
            0.0
        }
    }

    fn signal_component(&self, current: &EstimatedLocation) -> f64 {
        if current.rssi_variance > self.config.max_rssi_variance {
            let excess = current.rssi_variance / self.config.max_rssi_variance - 1.0;
            0.3 + 0.2 * excess.min(1.0)
        } else {
            0.0
        }
    }
}

impl AnomalyScorer for HeuristicAnomalyScorer {
    fn score(&self, history: &[EstimatedLocation], current: &EstimatedLocation) -> AnomalyScore {
        AnomalyScore::normal()
            .with_component(AnomalyReason::ImplausibleSpeed, self.speed_component(current))
            .with_component(
                AnomalyReason::PositionJump,
                self.jump_component(history.last(), current),
            )
            .with_component(
                AnomalyReason::ConfidenceDrop,
                self.confidence_component(history, current),
            )
            .with_component(AnomalyReason::SignalInstability, self.signal_component(current))
    }
}

/// Severity of an anomaly alert for a given score.
pub fn severity_for(score: &AnomalyScore) -> AlertSeverity {
    if score.score >= 0.9 {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    }
}
