//! Free-list snapshots for diagnostics.

use core::fmt;

use crate::{BUDDY_MAX_ORDER, HumanSize, arch};

/// A snapshot of the allocator's free lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyStats {
    free_blocks: [usize; BUDDY_MAX_ORDER],
    total_pages: usize,
}

impl BuddyStats {
    pub(crate) const fn new(free_blocks: [usize; BUDDY_MAX_ORDER], total_pages: usize) -> Self {
        Self {
            free_blocks,
            total_pages,
        }
    }

    /// Returns the number of free blocks of the given order, or 0 past the top order.
    pub fn free_blocks(&self, order: usize) -> usize {
        self.free_blocks.get(order).copied().unwrap_or(0)
    }

    /// Returns the number of free frames across all orders.
    pub fn free_pages(&self) -> usize {
        self.free_blocks
            .iter()
            .enumerate()
            .map(|(order, count)| count << order)
            .sum()
    }

    /// Returns the free memory in bytes.
    pub fn free_bytes(&self) -> usize {
        self.free_pages() * arch::PAGE_SIZE
    }

    /// Returns the free memory in KiB, rounded down.
    pub fn free_kib(&self) -> usize {
        self.free_bytes() / 1024
    }

    /// Returns the number of usable frames the allocator manages.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Returns the number of usable frames not on a free list.
    pub fn allocated_pages(&self) -> usize {
        self.total_pages.saturating_sub(self.free_pages())
    }
}

impl fmt::Display for BuddyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "buddy allocator:")?;
        for (order, count) in self.free_blocks.iter().enumerate() {
            writeln!(f, "  order #{} blocks={}", order, count)?;
        }
        write!(
            f,
            "  free: {} kiB ({} of {})",
            self.free_kib(),
            HumanSize::from(self.free_bytes()),
            HumanSize::from(self.total_pages * arch::PAGE_SIZE)
        )
    }
}
