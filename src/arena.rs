//! Fixed-capacity power-of-two buddy allocator.
//!
//! All section and fragment bytes held by the processor live in one
//! [`BuddyArena`], so a long-running stream never goes back to the system
//! allocator per packet. The free-list is a complete binary tree stored in an
//! array: every node records the largest free level (`order - min_order`)
//! anywhere in its subtree, which makes both allocation and release
//! O(max_order - order).

use crate::{Result, TsError};

/// Largest arena this allocator accepts: 1 GiB.
pub const MAX_ARENA_ORDER: u8 = 30;

/// Tree value for "nothing free below this node".
const FULL: u8 = u8::MAX;

/// Handle to a block owned by a [`BuddyArena`].
///
/// Move-only: handing it back to [`BuddyArena::free`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    offset: usize,
    order: u8,
    len: usize,
}

impl Block {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    /// Bytes requested by the caller.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes actually reserved (a power of two).
    pub fn capacity(&self) -> usize {
        1 << self.order
    }
}

#[derive(Debug)]
pub struct BuddyArena {
    max_order: u8,
    min_order: u8,
    tree: Vec<u8>,
    allocated: Vec<bool>,
    storage: Vec<u8>,
    live: usize,
}

impl BuddyArena {
    /// Creates an arena of `2^max_order` bytes handing out blocks no smaller
    /// than `2^min_order`.
    pub fn new(max_order: u8, min_order: u8) -> Result<Self> {
        if min_order == 0 || min_order >= max_order || max_order > MAX_ARENA_ORDER {
            return Err(TsError::InvalidArenaOrders {
                max: max_order,
                min: min_order,
            });
        }

        let top = max_order - min_order;
        let nodes = (1usize << (top as u32 + 1)) - 1;
        let mut arena = Self {
            max_order,
            min_order,
            tree: vec![0u8; nodes],
            allocated: vec![false; nodes],
            storage: vec![0u8; 1usize << max_order],
            live: 0,
        };
        arena.clear();
        Ok(arena)
    }

    /// Releases every block at once. Outstanding handles become stale and
    /// must be dropped rather than freed.
    pub fn clear(&mut self) {
        let top = self.top_level();
        for depth in 0..=top {
            let first = (1usize << depth) - 1;
            let count = 1usize << depth;
            self.tree[first..first + count].fill(top - depth);
        }
        self.allocated.fill(false);
        self.live = 0;
    }

    /// Total bytes managed by the arena.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Size of the largest block that could currently be allocated.
    pub fn largest_free(&self) -> usize {
        match self.tree[0] {
            FULL => 0,
            level => 1usize << (level + self.min_order),
        }
    }

    /// True when every block has been released and buddies coalesced back
    /// into the root.
    pub fn is_pristine(&self) -> bool {
        self.tree[0] == self.top_level()
    }

    /// Number of blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.live
    }

    fn top_level(&self) -> u8 {
        self.max_order - self.min_order
    }

    fn order_for(&self, size: usize) -> Option<u8> {
        let order = (size.max(1).checked_next_power_of_two()?.trailing_zeros() as u8)
            .max(self.min_order);
        (order <= self.max_order).then_some(order)
    }

    /// Allocates a block of at least `size` bytes. Returns `None` when no
    /// free block of the required order exists.
    pub fn alloc(&mut self, size: usize) -> Option<Block> {
        let order = self.order_for(size)?;
        let want = order - self.min_order;
        if !fits(self.tree[0], want) {
            return None;
        }

        let mut node = 0usize;
        let mut level = self.top_level();
        while level > want {
            let left = 2 * node + 1;
            node = if fits(self.tree[left], want) { left } else { left + 1 };
            level -= 1;
        }

        self.tree[node] = FULL;
        self.allocated[node] = true;
        self.update_ancestors(node, level);
        self.live += 1;

        let depth = (self.top_level() - level) as u32;
        let index = node + 1 - (1usize << depth);
        Some(Block {
            offset: index << order,
            order,
            len: size,
        })
    }

    /// Allocates a block and fills it with `data`.
    pub fn alloc_copy(&mut self, data: &[u8]) -> Option<Block> {
        let block = self.alloc(data.len())?;
        self.bytes_mut(&block).copy_from_slice(data);
        Some(block)
    }

    /// Releases a block and merges it with its buddy where possible.
    pub fn free(&mut self, block: Block) -> Result<()> {
        let Block { offset, order, .. } = block;
        let unknown = TsError::UnknownBlock { offset, order };
        if order < self.min_order || order > self.max_order {
            return Err(unknown);
        }
        if offset & ((1usize << order) - 1) != 0 || offset >= self.capacity() {
            return Err(unknown);
        }

        let depth = (self.max_order - order) as u32;
        let node = (1usize << depth) - 1 + (offset >> order);
        if !self.allocated[node] {
            return Err(unknown);
        }

        let level = order - self.min_order;
        self.allocated[node] = false;
        self.tree[node] = level;
        self.update_ancestors(node, level);
        self.live -= 1;
        Ok(())
    }

    /// Copies the bytes of `from` into `to` starting at byte `at` of `to`.
    pub fn copy_between(&mut self, from: &Block, to: &Block, at: usize) {
        debug_assert!(at + from.len <= to.len);
        self.storage
            .copy_within(from.offset..from.offset + from.len, to.offset + at);
    }

    pub fn bytes(&self, block: &Block) -> &[u8] {
        &self.storage[block.offset..block.offset + block.len]
    }

    pub fn bytes_mut(&mut self, block: &Block) -> &mut [u8] {
        &mut self.storage[block.offset..block.offset + block.len]
    }

    fn update_ancestors(&mut self, mut node: usize, mut level: u8) {
        while node > 0 {
            node = (node - 1) / 2;
            level += 1;
            let left = self.tree[2 * node + 1];
            let right = self.tree[2 * node + 2];
            self.tree[node] = if left == level - 1 && right == level - 1 {
                level
            } else {
                larger_free(left, right)
            };
        }
    }
}

fn fits(value: u8, want: u8) -> bool {
    value != FULL && value >= want
}

fn larger_free(a: u8, b: u8) -> u8 {
    match (a, b) {
        (FULL, FULL) => FULL,
        (FULL, v) | (v, FULL) => v,
        (a, b) => a.max(b),
    }
}
