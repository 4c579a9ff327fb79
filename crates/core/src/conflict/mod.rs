//! Conflict detection, three-way merging, and resolution management.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- grouping each side's changes and finding overlapping edits.
//! 2. **Merging** -- applying both sides' changes where they do not collide.
//! 3. **Resolution** -- turning a conflict and a strategy into replacement content.

pub mod detector;
pub mod merger;
pub mod metadata;
pub mod resolver;

pub use detector::{ChangeGroup, ConflictDetector};
pub use merger::{
    ConflictRegion, MergeLabels, MergeResult, MergeStrategy, PartialMerge, ThreeWayMerger,
};
pub use metadata::{Metadata, MetadataConflictDetector};
pub use resolver::ConflictResolver;
