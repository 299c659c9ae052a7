// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register address ranges.

/// A _Modbus_ register address is represented by 16 bit (from `0` to `65535`).
pub type Address = u16;

/// Number of registers to process (`0` - `65535`).
pub type Quantity = u16;

/// A half-open range of registers in a _Modbus_ address space.
///
/// `address` is the inclusive start; the ceiling `address + quantity` is
/// exclusive. Two indexes are equal if both fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Index {
    address: Address,
    quantity: Quantity,
}

impl Index {
    /// Creates a new index covering `quantity` registers starting at `address`.
    #[must_use]
    pub const fn new(address: Address, quantity: Quantity) -> Self {
        Self { address, quantity }
    }

    /// Returns the inclusive starting address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Returns the number of registers covered.
    #[must_use]
    pub const fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// Returns the exclusive upper bound of the range.
    ///
    /// Computed in `u32` so a range touching the top of the 16-bit address
    /// space does not wrap.
    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.address as u32 + self.quantity as u32
    }

    /// Determines whether two indexes overlap in at least one register.
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        !(self.ceiling() <= other.address as u32 || other.ceiling() <= self.address as u32)
    }

    /// Determines whether `other` lies entirely within this index.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        self.address <= other.address && other.ceiling() <= self.ceiling()
    }
}

/// Combines all overlapping indexes into their least common cover.
///
/// The result is sorted by address, disjoint and covers exactly the same
/// registers as the input. For instance:
///
/// ```
/// use tokio_sunspec::Index;
///
/// let merged = tokio_sunspec::merge(vec![
///     Index::new(0, 4),
///     Index::new(3, 3),
///     Index::new(8, 2),
/// ]);
/// assert_eq!(merged, vec![Index::new(0, 6), Index::new(8, 2)]);
/// ```
#[must_use]
pub fn merge(mut indexes: Vec<Index>) -> Vec<Index> {
    if indexes.is_empty() {
        return indexes;
    }
    indexes.sort_by_key(Index::address);
    let mut merged = Vec::new();
    let mut curr = indexes[0];
    for idx in &indexes[1..] {
        if curr.intersects(idx) {
            let ceiling = curr.ceiling().max(idx.ceiling());
            curr.quantity = (ceiling - u32::from(curr.address)) as Quantity;
        } else {
            merged.push(curr);
            curr = *idx;
        }
    }
    merged.push(curr);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_does_not_wrap() {
        let idx = Index::new(u16::MAX, 1);
        assert_eq!(idx.ceiling(), 0x1_0000);
    }

    #[test]
    fn intersection() {
        let a = Index::new(0, 4);
        let b = Index::new(3, 3);
        let c = Index::new(8, 2);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        // ranges that merely touch do not intersect
        assert!(!Index::new(0, 4).intersects(&Index::new(4, 1)));
    }

    #[test]
    fn merge_is_sorted_disjoint_and_covering() {
        let merged = merge(vec![Index::new(8, 2), Index::new(3, 3), Index::new(0, 4)]);
        assert_eq!(merged, vec![Index::new(0, 6), Index::new(8, 2)]);

        // per-register cover equality with the input
        let input = [Index::new(8, 2), Index::new(3, 3), Index::new(0, 4)];
        let covered = |ranges: &[Index], reg: u32| {
            ranges
                .iter()
                .any(|idx| u32::from(idx.address()) <= reg && reg < idx.ceiling())
        };
        for reg in 0..16 {
            assert_eq!(covered(&input, reg), covered(&merged, reg), "register {reg}");
        }
    }

    #[test]
    fn merge_keeps_disjoint_ranges() {
        let merged = merge(vec![Index::new(10, 2), Index::new(0, 2)]);
        assert_eq!(merged, vec![Index::new(0, 2), Index::new(10, 2)]);
    }

    #[test]
    fn merge_handles_nested_ranges() {
        let merged = merge(vec![Index::new(0, 10), Index::new(2, 3)]);
        assert_eq!(merged, vec![Index::new(0, 10)]);
    }
}
