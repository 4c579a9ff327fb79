//! Tokenization and Myers diffing.
//!
//! - [`tokenizer`] splits content into line, word or character tokens.
//! - [`myers`] computes minimal edit scripts between token sequences.
//! - [`apply`] replays an edit script onto its base.
//! - [`render`] formats a diff as a unified patch.
//! - [`delta`] stores a version as copy/insert ops against another.

pub mod apply;
pub mod cancel;
pub mod delta;
pub mod myers;
pub mod render;
pub mod tokenizer;

pub use apply::apply_changes;
pub use cancel::CancellationToken;
pub use delta::{Delta, DeltaOp};
pub use myers::MyersDiffEngine;
pub use render::render_unified;
pub use tokenizer::Tokenizer;
