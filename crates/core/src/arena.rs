//! Scratch arena - bump allocation for per-expression temporaries
//!
//! Uses bumpalo for fast bump allocation of Form trees and analysis
//! temporaries. The arena is owned by the evaluation driver and reset at
//! every top-level expression boundary; nothing allocated here may survive
//! that reset. Values that must outlive the expression (var roots, closure
//! environments, chunk constants) are converted to owned data at the moment
//! they cross out of the arena.

use bumpalo::Bump;

/// Scratch allocator with byte accounting.
///
/// Reset happens at top-level expression boundaries, so a single very large
/// form can still grow the arena; `allocated_bytes` lets the driver observe
/// that growth.
pub struct Scratch {
    bump: Bump,
}

impl Scratch {
    pub fn new() -> Self {
        Scratch { bump: Bump::new() }
    }

    /// The underlying bump allocator, for allocating Forms and slices.
    pub fn bump(&self) -> &Bump {
        &self.bump
    }

    /// Bytes currently allocated in the arena.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Drop every allocation. Callers must not hold references into the
    /// arena across this call; the borrow checker enforces that because
    /// reset takes `&mut self`.
    pub fn reset(&mut self) {
        self.bump.reset();
    }

    /// Copy a string into the arena.
    pub fn alloc_str<'a>(&'a self, s: &str) -> &'a str {
        self.bump.alloc_str(s)
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_releases_bytes() {
        let mut scratch = Scratch::new();
        scratch.alloc_str("some temporary text");
        assert!(scratch.allocated_bytes() > 0);
        scratch.reset();
        // Bump keeps its largest chunk around but the cursor rewinds.
        let after = scratch.allocated_bytes();
        scratch.alloc_str("x");
        assert!(scratch.allocated_bytes() >= after);
    }

    #[test]
    fn test_alloc_str_roundtrip() {
        let scratch = Scratch::new();
        let s = scratch.alloc_str("hello");
        assert_eq!(s, "hello");
    }
}
