//! Chart pattern detectors
//!
//! Every detector reads a [`PatternData`](crate::pattern_data::PatternData)
//! snapshot of the current tick window and returns candidate ranges plus the
//! reasons candidates were rejected.
//!
//! # Detectors
//!
//! - **Ranges**: triangles, channels and TKE from pairs of same-side extrema
//! - **Head-shoulder**: tops and inverse bottoms from three consecutive extrema
//! - **Fibonacci**: 5-wave impulses and ABC corrections

pub mod fibonacci;
pub mod head_shoulder;
pub mod helpers;
pub mod range;

pub use fibonacci::{FibonacciWave, FibonacciWaveTree, WaveComponent, WaveKey, WaveKind};
pub use head_shoulder::HeadShoulderDetector;
pub use range::{PatternRangeDetector, RangeDetection, RejectedCandidate};
