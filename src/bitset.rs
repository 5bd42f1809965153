//! Bit vector with logarithmic "next set bit" queries
//!
//! [`LiveBits`] tracks which physical slots in the retention window hold live
//! data. The compactor asks "what is the first live slot at or after this
//! position, wrapping" on every write, so the query has to be cheap: the bits
//! are stored as the leaves of an implicit binary tree in which every
//! internal node is the OR of its two children, and the search walks at most
//! O(log n) nodes.
//!
//! Leaf `i` lives at tree index `n + i`; the root is index 1. Out-of-range
//! indices are a caller bug and panic.

pub struct LiveBits {
    size: usize,
    bits: Vec<u8>,
}

impl LiveBits {
    pub fn new(size: usize) -> Self {
        LiveBits {
            size,
            bits: vec![0u8; (2 * size).div_ceil(8)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Set bit `i` and refresh the OR summaries on the path to the root.
    pub fn set(&mut self, i: usize, value: bool) {
        assert!(i < self.size);
        let mut node = i + self.size;
        self.set_node(node, value);
        while node > 1 {
            node /= 2;
            let or = self.node(2 * node) | self.node(2 * node + 1);
            self.set_node(node, or);
        }
    }

    pub fn get(&self, i: usize) -> bool {
        assert!(i < self.size);
        self.node(i + self.size)
    }

    /// First index `j >= start` with a set bit, wrapping to 0 past the end.
    ///
    /// Returns the capacity when no bit is set at all (checked at the root).
    pub fn find_set(&self, start: usize) -> usize {
        assert!(start < self.size);
        if !self.node(1) {
            return self.size;
        }
        // Climb until a subtree to the right of `start` contains a set bit.
        let mut node = start + self.size;
        while !self.node(node) {
            if node & (node + 1) == 0 {
                // Right edge of the tree: wrap by restarting at the root.
                node = 1;
            } else if node & 1 == 1 {
                node += 1;
            } else {
                node /= 2;
            }
        }
        // Descend to the leftmost set leaf of that subtree.
        while node < self.size {
            node *= 2;
            if !self.node(node) {
                node += 1;
            }
        }
        node - self.size
    }

    fn set_node(&mut self, node: usize, value: bool) {
        let mask = 1u8 << (node % 8);
        if value {
            self.bits[node / 8] |= mask;
        } else {
            self.bits[node / 8] &= !mask;
        }
    }

    /// Tree-node bit. Indices just past the last leaf can be probed while
    /// walking the right edge of a non-power-of-two tree; they read as unset.
    fn node(&self, node: usize) -> bool {
        match self.bits.get(node / 8) {
            Some(byte) => byte & (1u8 << (node % 8)) != 0,
            None => false,
        }
    }
}
