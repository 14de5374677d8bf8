//! Conflict detection and resolution for matched record pairs.

pub mod detector;
pub mod resolver;

pub use detector::{ConflictDetector, DependencyIndex, Detection, DetectionContext};
pub use resolver::{merge_content, ConflictConfig, ConflictResolver, TieBreak};
