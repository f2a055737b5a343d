//! Coordinates in the global (all-streams) event log.

use serde::{Deserialize, Serialize};

/// A point in the global log.
///
/// Positions are totally ordered (commit first, then prepare) and strictly
/// increase along the log. They are opaque to consumers beyond ordering and
/// persistence.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GlobalPosition {
    pub commit: u64,
    pub prepare: u64,
}

impl GlobalPosition {
    pub const fn new(commit: u64, prepare: u64) -> Self {
        Self { commit, prepare }
    }
}

impl core::fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "C:{}/P:{}", self.commit, self.prepare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_commit_then_prepare() {
        let a = GlobalPosition::new(10, 10);
        let b = GlobalPosition::new(10, 12);
        let c = GlobalPosition::new(11, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.max(c), c);
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(GlobalPosition::new(3, 4).to_string(), "C:3/P:4");
    }
}
