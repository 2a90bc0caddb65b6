//! Anomaly score model.

use serde::{Deserialize, Serialize};

/// Why a location estimate looked abnormal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    ImplausibleSpeed,
    PositionJump,
    ConfidenceDrop,
    SignalInstability,
}

impl AnomalyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyReason::ImplausibleSpeed => "implausible_speed",
            AnomalyReason::PositionJump => "position_jump",
            AnomalyReason::ConfidenceDrop => "confidence_drop",
            AnomalyReason::SignalInstability => "signal_instability",
        }
    }
}

/// Score in `[0, 1]` plus the contributing reasons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub score: f64,
    pub reasons: Vec<AnomalyReason>,
}

impl AnomalyScore {
    pub fn normal() -> Self {
        Self::default()
    }

    /// Folds one component into the score; the overall score is the maximum
    /// component score.
    pub fn with_component(mut self, reason: AnomalyReason, score: f64) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if score > 0.0 {
            self.reasons.push(reason);
            self.score = self.score.max(score);
        }
        self
    }

    pub fn exceeds(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}
