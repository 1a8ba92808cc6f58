//! Per-field change masks.

use std::ops::{BitOr, BitOrAssign};

/// One bit per mutable field, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FieldMask(u64);

impl FieldMask {
    /// Maximum number of fields a mask can address.
    pub const MAX_FIELDS: usize = 64;

    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// A mask with the first `count` bits set.
    #[must_use]
    pub const fn full(count: usize) -> Self {
        if count >= Self::MAX_FIELDS {
            Self(u64::MAX)
        } else {
            Self((1u64 << count) - 1)
        }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, index: usize) -> bool {
        index < Self::MAX_FIELDS && self.0 & (1u64 << index) != 0
    }

    pub fn set(&mut self, index: usize) {
        assert!(index < Self::MAX_FIELDS, "field index {index} out of mask range");
        self.0 |= 1u64 << index;
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterates set bit indices in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..Self::MAX_FIELDS).filter(move |i| self.contains(*i))
    }
}

impl BitOr for FieldMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
