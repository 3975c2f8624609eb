//! Online anomaly detection on streams of numeric vectors.
//!
//! Each observation is scored as it arrives, in bounded time and memory, by one of:
//!
//! - [`anomaly::half_space_tree::HalfSpaceTree`]: randomized half-space trees with
//!   windowed mass counts.
//! - [`anomaly::rs_hash::RsHash`]: randomized grid hashing with time-decayed counts.
//!
//! Both implement [`anomaly::AnomalyDetector`] and report a score of 0 unless the raw
//! score is an outlier of the detector's own score history (see [`stats::ScoreGate`]).

pub mod anomaly;
pub mod common;
pub mod error;
pub mod stats;
pub mod stream;

pub use error::{DetectorError, Result};
