//! Core domain types for Weft.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the engine.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod dirty;
mod ids;
mod text;

pub use dirty::{Capabilities, DirtyFlags};
pub use ids::{BlockId, LineId};
pub use text::{escape_html, is_blank_markup, trim_leading_whitespace, trim_trailing_whitespace};

use serde::Deserialize;

// ============================================================================
// Content Mode
// ============================================================================

/// How same-named block instances combine within one renderer.
///
/// In `Replace` mode a later instance supersedes visibility of the earlier
/// one without merging content. In `Push` mode sibling instances concatenate
/// in declaration order, each wrapped in its own container element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    #[default]
    Replace,
    Push,
}

impl ContentMode {
    #[must_use]
    pub fn is_push(self) -> bool {
        matches!(self, ContentMode::Push)
    }
}

#[cfg(test)]
mod tests {
    use super::ContentMode;

    #[test]
    fn default_mode_is_replace() {
        assert_eq!(ContentMode::default(), ContentMode::Replace);
        assert!(!ContentMode::Replace.is_push());
        assert!(ContentMode::Push.is_push());
    }
}
