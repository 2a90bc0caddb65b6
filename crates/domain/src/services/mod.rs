//! Location pipeline services.
//!
//! Leaf to root: signal model, trilateration, movement analysis, geofence
//! evaluation and alert generation, plus the anomaly scoring seam.

pub mod alert;
pub mod anomaly;
pub mod geodesy;
pub mod geofence;
pub mod movement;
pub mod retry;
pub mod signal;
pub mod trilateration;

pub use alert::{AlertError, AlertGenerator, AlertOutcome};
pub use anomaly::{AnomalyConfig, AnomalyScorer, HeuristicAnomalyScorer};
pub use geofence::{containment, Containment, EvaluationOutcome, GeofenceEvaluator};
pub use movement::MovementAnalyzer;
pub use retry::RetryPolicy;
pub use signal::{PathLossModel, SignalModelError};
pub use trilateration::{Sighting, TrilaterationConfig, TrilaterationEngine, TrilaterationError};
