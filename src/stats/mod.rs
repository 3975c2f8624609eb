pub mod running_stats;
pub mod score_gate;

pub use running_stats::RunningStats;
pub use score_gate::{ScoreGate, Z_THRESHOLD};
