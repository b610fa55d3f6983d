//! Per-line dirty flags and the capability set they are derived from.
//!
//! Every line gets a fixed capability set at construction. From it we compute,
//! once, which dirty bits the line can ever carry; marking is then a cheap
//! masked bit-set. Dirty bits are monotonic within one render pass: the
//! scheduler clears them only after the corresponding work has settled.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// What a line is able to do, decided at construction.
///
/// This replaces duck-typed capability probing: a line either carries the
/// capability bit or it does not, and the set never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// The line exposes a pre-processing hook run only during a genuine
    /// assembly pass.
    pub const PRE_ASSEMBLE: Capabilities = Capabilities(1 << 0);
    /// The line can produce deferred content (placeholder resolver, element
    /// with deferred-content hook).
    pub const RESOLVE_CONTENT: Capabilities = Capabilities(1 << 1);
    /// The line owns child lines the scheduler must recurse into.
    pub const HAS_CHILDREN: Capabilities = Capabilities(1 << 2);
    /// The line is a nested block that must be assembled.
    pub const NESTED_BLOCK: Capabilities = Capabilities(1 << 3);

    #[must_use]
    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}

/// Bitset marking which async work a line (or its subtree) still needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyFlags(u8);

impl DirtyFlags {
    pub const CLEAN: DirtyFlags = DirtyFlags(0);
    /// The line's own content needs (re-)rendering.
    pub const NEEDS_RENDER: DirtyFlags = DirtyFlags(1 << 0);
    /// Some descendant of the line is dirty.
    pub const HAS_DIRTY_CHILDREN: DirtyFlags = DirtyFlags(1 << 1);
    /// The line is an un-assembled nested block.
    pub const NEEDS_ASSEMBLY: DirtyFlags = DirtyFlags(1 << 2);

    /// Compute which dirty bits a line with the given capabilities can ever
    /// carry. Evaluated once at line creation and cached.
    #[must_use]
    pub fn applicable_to(caps: Capabilities) -> DirtyFlags {
        let mut flags = DirtyFlags::CLEAN;
        if caps.contains(Capabilities::RESOLVE_CONTENT)
            || caps.contains(Capabilities::PRE_ASSEMBLE)
        {
            flags |= DirtyFlags::NEEDS_RENDER;
        }
        if caps.contains(Capabilities::HAS_CHILDREN) {
            flags |= DirtyFlags::HAS_DIRTY_CHILDREN;
        }
        if caps.contains(Capabilities::NESTED_BLOCK) {
            flags |= DirtyFlags::NEEDS_ASSEMBLY;
        }
        flags
    }

    #[must_use]
    pub fn contains(self, other: DirtyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn is_clean(self) -> bool {
        self.0 == 0
    }

    /// Set `bits`, masked by the line's applicable set.
    pub fn mark(&mut self, bits: DirtyFlags, applicable: DirtyFlags) {
        self.0 |= bits.0 & applicable.0;
    }

    /// Set `bits` unconditionally (used for `HAS_DIRTY_CHILDREN` propagation,
    /// where applicability is decided by the caller walking parent links).
    pub fn set(&mut self, bits: DirtyFlags) {
        self.0 |= bits.0;
    }

    pub fn clear(&mut self, bits: DirtyFlags) {
        self.0 &= !bits.0;
    }
}

impl BitOr for DirtyFlags {
    type Output = DirtyFlags;

    fn bitor(self, rhs: DirtyFlags) -> DirtyFlags {
        DirtyFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DirtyFlags {
    fn bitor_assign(&mut self, rhs: DirtyFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for DirtyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.contains(DirtyFlags::NEEDS_RENDER) {
            parts.push("needs_render");
        }
        if self.contains(DirtyFlags::HAS_DIRTY_CHILDREN) {
            parts.push("has_dirty_children");
        }
        if self.contains(DirtyFlags::NEEDS_ASSEMBLY) {
            parts.push("needs_assembly");
        }
        if parts.is_empty() {
            write!(f, "clean")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Capabilities, DirtyFlags};

    #[test]
    fn applicable_bits_follow_capabilities() {
        assert_eq!(
            DirtyFlags::applicable_to(Capabilities::NONE),
            DirtyFlags::CLEAN
        );
        assert_eq!(
            DirtyFlags::applicable_to(Capabilities::RESOLVE_CONTENT),
            DirtyFlags::NEEDS_RENDER
        );
        assert_eq!(
            DirtyFlags::applicable_to(Capabilities::NESTED_BLOCK),
            DirtyFlags::NEEDS_ASSEMBLY
        );
        let elem = DirtyFlags::applicable_to(Capabilities::HAS_CHILDREN);
        assert!(elem.contains(DirtyFlags::HAS_DIRTY_CHILDREN));
        assert!(!elem.contains(DirtyFlags::NEEDS_RENDER));
    }

    #[test]
    fn mark_is_masked_by_applicable_set() {
        let mut flags = DirtyFlags::CLEAN;
        flags.mark(DirtyFlags::NEEDS_RENDER, DirtyFlags::CLEAN);
        assert!(flags.is_clean());

        flags.mark(DirtyFlags::NEEDS_RENDER, DirtyFlags::NEEDS_RENDER);
        assert!(flags.contains(DirtyFlags::NEEDS_RENDER));
    }

    #[test]
    fn clear_removes_only_requested_bits() {
        let mut flags = DirtyFlags::NEEDS_RENDER | DirtyFlags::HAS_DIRTY_CHILDREN;
        flags.clear(DirtyFlags::NEEDS_RENDER);
        assert!(!flags.contains(DirtyFlags::NEEDS_RENDER));
        assert!(flags.contains(DirtyFlags::HAS_DIRTY_CHILDREN));
    }

    #[test]
    fn display_names_set_bits() {
        let flags = DirtyFlags::NEEDS_RENDER | DirtyFlags::NEEDS_ASSEMBLY;
        assert_eq!(flags.to_string(), "needs_render|needs_assembly");
        assert_eq!(DirtyFlags::CLEAN.to_string(), "clean");
    }
}
