// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Batch completion fences.
//!
//! Every submitted batch is stamped with a monotonically increasing 32-bit
//! sequence number. A fence signals once the device's completed sequence has
//! reached it. Comparisons tolerate wrap-around.

/// Completion token for all GPU work up to a submission point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fence(pub u32);

impl Fence {
    /// Fence that is signalled before any submission.
    pub const NONE: Self = Self(0);

    pub fn seqno(self) -> u32 {
        self.0
    }

    /// Whether this fence has signalled given the device's completed seqno.
    pub fn passed(self, completed: u32) -> bool {
        seqno_reached(completed, self.0)
    }

    /// The later of two fences.
    pub fn max(self, other: Fence) -> Fence {
        if seqno_reached(self.0, other.0) {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fence#{}", self.0)
    }
}

/// Check if a sequence value has reached a threshold, handling wrap-around.
/// Uses signed comparison: `(value - threshold) as i32 >= 0`.
pub fn seqno_reached(value: u32, threshold: u32) -> bool {
    (value.wrapping_sub(threshold) as i32) >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_passed() {
        assert!(Fence(3).passed(3));
        assert!(Fence(3).passed(5));
        assert!(!Fence(3).passed(2));
        assert!(Fence::NONE.passed(0));
    }

    #[test]
    fn test_seqno_wraparound() {
        assert!(seqno_reached(0, u32::MAX));
        assert!(seqno_reached(2, u32::MAX - 1));
        assert!(!seqno_reached(u32::MAX, 1));
    }

    #[test]
    fn test_fence_max() {
        assert_eq!(Fence(4).max(Fence(9)), Fence(9));
        assert_eq!(Fence(9).max(Fence(4)), Fence(9));
        assert_eq!(Fence(1).max(Fence(u32::MAX)), Fence(1));
    }
}
