//! Physical page allocator using a buddy system.
//!
//! This module provides the kernel's physical page allocator, based on the classic buddy
//! design also used by Linux. Every physical frame has a descriptor in a [`FrameTable`]; free
//! memory is kept as power-of-two blocks on one intrusive free list per order, where order n
//! represents a block of 2^n contiguous frames.
//!
//! Allocation takes the first block from the smallest non-empty list at or above the
//! requested order and halves it until it has the requested order, putting each upper half
//! back on the list below. Freeing a block repeatedly merges it with its buddy (the other
//! half of the enclosing block, found by flipping one address bit) for as long as that buddy
//! is itself a free block of the same order.
//!
//! # Ownership and reference counts
//!
//! The allocator never sets reference counts on the blocks it hands out. Callers decide how
//! many references a new block starts with ([`PageAllocator::page_incref`]), and a block
//! returns to the pool when [`PageAllocator::page_decref`] drops the count to zero.
//! [`PageRef`] wraps that protocol in a type that must be handed back exactly once.
//!
//! # Concurrency
//!
//! Nothing here is synchronized internally; every method takes `&mut self`. Shared use goes
//! through one lock held for the whole call, see [`crate::LockedPageAllocator`].

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ptr;

use bitflags::bitflags;

use crate::buddy::{self, BASE_ORDER, BUDDY_MAX_ORDER, HUGE_ORDER, TOP_ORDER};
use crate::free_list::FreeList;
use crate::{
    BootMemoryRegion, BuddyStats, FrameNumber, FrameTable, HumanAddress, HumanSize, Page,
    PageFlag, PageInfo, PageRef, PhysicalAddress, VirtualAddress, arch,
};

bitflags! {
    /// Options for [`PageAllocator::page_alloc`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocFlags: u32 {
        /// Fill the whole block with zero bytes before returning it.
        const ZERO = 1 << 0;
        /// Allocate a huge page (order [`HUGE_ORDER`]) instead of a single base page.
        const HUGE = 1 << 1;
    }
}

/// Errors that can occur during page allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No free block of the requested order or larger is available.
    OutOfMemory,
    /// The requested order is not below `BUDDY_MAX_ORDER`.
    OrderTooLarge,
    /// The shared allocator was used before it was initialized.
    Uninitialized,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocError::OutOfMemory => "out of physical memory",
            AllocError::OrderTooLarge => "requested block order is too large",
            AllocError::Uninitialized => "page allocator is not initialized",
        })
    }
}

impl core::error::Error for AllocError {}

/// Physical page allocator using a buddy system.
///
/// Owns the descriptor table for every frame and one free list per order:
/// - Order 0: single base pages
/// - Order 1: 2 contiguous pages
/// - ...
/// - Order [`TOP_ORDER`]: 512 pages, a 2 MiB huge page on x86_64
pub struct PageAllocator {
    table: FrameTable,
    free_lists: [FreeList; BUDDY_MAX_ORDER],
    total_frames: usize,
}

impl PageAllocator {
    /// Creates an allocator over the given table with every free list empty.
    ///
    /// Memory becomes allocatable once it is handed over with [`Self::release_range`].
    pub fn new(table: FrameTable) -> Self {
        let total_frames = table.usable_frame_count();

        Self {
            table,
            free_lists: [const { FreeList::new() }; BUDDY_MAX_ORDER],
            total_frames,
        }
    }

    /// Builds the frame table from a boot memory map and releases every usable frame.
    pub fn from_boot_map<R: BootMemoryRegion>(boot_map: &[R]) -> Self {
        let mut allocator = Self::new(FrameTable::from_boot_map(boot_map));

        let runs: Vec<(FrameNumber, usize)> = allocator.table.usable_runs().collect();
        for (start, count) in runs {
            allocator.release_range(start, count);
        }

        log::debug!(
            "page allocator ready: {} frames, {} free",
            allocator.table.len(),
            HumanSize::from(allocator.count_total_free_pages() * arch::PAGE_SIZE)
        );

        allocator
    }

    /// Hands `count` frames starting at `start` to the allocator.
    ///
    /// The range is carved into the largest naturally aligned blocks that fit, each of which
    /// is merged with any free buddies already in the pool.
    ///
    /// # Panics
    ///
    /// Panics if the range leaves the table, covers reserved frames, or starts on a frame
    /// that is already free. The range must not overlap memory that is already free or
    /// allocated.
    pub fn release_range(&mut self, start: FrameNumber, count: usize) {
        let end = start.as_usize() + count;
        assert!(
            end <= self.table.len(),
            "frame range {}..{} exceeds the frame table ({} frames)",
            start,
            end,
            self.table.len()
        );

        let mut frame = start;
        while frame.as_usize() < end {
            let remaining = end - frame.as_usize();
            let order = (BASE_ORDER..=TOP_ORDER)
                .rev()
                .find(|&order| {
                    frame.is_aligned_to_order(order) && buddy::order_frames(order) <= remaining
                })
                .unwrap_or(BASE_ORDER);

            self.release_block(frame, order);
            frame = frame + buddy::order_frames(order);
        }

        self.verify();
    }

    fn release_block(&mut self, head: FrameNumber, order: usize) {
        for offset in 0..buddy::order_frames(order) {
            assert!(
                !self.table[head + offset].is_reserved(),
                "cannot release reserved frame {}",
                head + offset
            );
        }

        let info = &mut self.table[head];
        assert!(!info.is_free(), "frame {} released twice", head);
        assert!(!info.is_allocated(), "frame {} released while allocated", head);
        info.set_order(order);
        self.merge(head);
    }

    /// Allocates a single page, or a huge page if [`AllocFlags::HUGE`] is set.
    ///
    /// With [`AllocFlags::ZERO`] the whole block is cleared through the direct map. The
    /// returned block has a reference count of zero; the caller takes its first reference.
    pub fn page_alloc(&mut self, flags: AllocFlags) -> Result<Page, AllocError> {
        let order = if flags.contains(AllocFlags::HUGE) {
            HUGE_ORDER
        } else {
            BASE_ORDER
        };
        self.alloc_order(order, flags)
    }

    /// Allocates a block of 2^order contiguous frames.
    ///
    /// [`AllocFlags::HUGE`] is ignored here; [`AllocFlags::ZERO`] clears the block.
    pub fn alloc_order(&mut self, order: usize, flags: AllocFlags) -> Result<Page, AllocError> {
        if order >= BUDDY_MAX_ORDER {
            return Err(AllocError::OrderTooLarge);
        }

        let Some(head) = self.find(order) else {
            log::debug!(
                "no free block for order {} ({})",
                order,
                HumanSize::from(buddy::order_size(order))
            );
            return Err(AllocError::OutOfMemory);
        };
        self.table[head].flags.set(PageFlag::Allocated);
        let page = Page::new(head);

        if flags.contains(AllocFlags::ZERO) {
            let size = buddy::order_size(order);
            let virt = VirtualAddress::direct_mapped_range(page.address(), size);
            // SAFETY: the block was just taken off the free lists, so nothing else refers to
            // it, and the translator has checked that the direct map covers all of it.
            unsafe {
                ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, size);
            }
        }

        self.verify();
        Ok(page)
    }

    /// Allocates like [`Self::page_alloc`] and takes the first reference to the block.
    pub fn alloc_ref(&mut self, flags: AllocFlags) -> Result<PageRef, AllocError> {
        let page = self.page_alloc(flags)?;
        Ok(self.page_ref(page))
    }

    /// Returns a block to the free lists, merging it with free buddies.
    ///
    /// # Panics
    ///
    /// Panics if `page` does not head an allocated block (a double free, or a frame inside
    /// some other block), if the block is still referenced, or if it is not usable memory.
    pub fn page_free(&mut self, page: Page) {
        let head = page.frame_number();
        let info = self.info_mut(page);
        assert!(!info.is_reserved(), "freeing reserved frame {}", head);
        assert!(
            info.is_allocated(),
            "double free of frame {}: it does not head an allocated block",
            head
        );
        assert!(
            info.ref_count() == 0,
            "freeing frame {} with {} outstanding references",
            head,
            info.ref_count()
        );
        info.flags.clear(PageFlag::Allocated);

        let merged = self.merge(head);
        log::trace!(
            "freed {} into order-{} block at {}",
            page,
            self.table[merged].order(),
            HumanAddress::from(merged.start().as_usize())
        );

        self.verify();
    }

    /// Adds a reference to an allocated block.
    ///
    /// # Panics
    ///
    /// Panics if `page` does not head an allocated block.
    pub fn page_incref(&mut self, page: Page) {
        let info = self.info_mut(page);
        assert!(
            info.is_allocated(),
            "taking a reference to unallocated frame {}",
            page.frame_number()
        );
        info.inc_ref();
    }

    /// Drops a reference to an allocated block, freeing it when the last one goes.
    ///
    /// # Panics
    ///
    /// Panics if `page` does not head an allocated block, or the block has no references.
    pub fn page_decref(&mut self, page: Page) {
        let info = self.info_mut(page);
        assert!(
            info.is_allocated(),
            "dropping a reference to unallocated frame {}",
            page.frame_number()
        );
        if info.dec_ref() == 0 {
            self.page_free(page);
        }
    }

    /// Takes an additional reference to `page`, returned as an owned handle.
    pub fn page_ref(&mut self, page: Page) -> PageRef {
        self.page_incref(page);
        PageRef::new(page)
    }

    /// Gives back a reference taken with [`Self::page_ref`] or [`Self::alloc_ref`].
    pub fn page_unref(&mut self, page: PageRef) {
        self.page_decref(page.into_page());
    }

    /// Returns the descriptor of the frame heading `page`.
    ///
    /// # Panics
    ///
    /// Panics if the page lies outside the frame table.
    pub fn page_info(&self, page: Page) -> &PageInfo {
        self.table.get(page.frame_number()).unwrap_or_else(|| {
            panic!("frame {} is outside the frame table", page.frame_number())
        })
    }

    /// Returns the order of the block headed by `page`.
    pub fn order_of(&self, page: Page) -> usize {
        self.page_info(page).order()
    }

    /// Returns the size in bytes of the block headed by `page`.
    pub fn block_size(&self, page: Page) -> usize {
        buddy::order_size(self.order_of(page))
    }

    /// Returns the page for the frame containing `addr`, if the table covers it.
    pub fn page_at(&self, addr: PhysicalAddress) -> Option<Page> {
        let frame = addr.frame_number();
        self.table.get(frame).map(|_| Page::new(frame))
    }

    /// Returns the number of free blocks of the given order.
    pub fn count_free_pages(&self, order: usize) -> usize {
        self.free_lists.get(order).map_or(0, FreeList::len)
    }

    /// Returns the number of free frames across all orders.
    pub fn count_total_free_pages(&self) -> usize {
        self.free_lists
            .iter()
            .enumerate()
            .map(|(order, list)| list.len() << order)
            .sum()
    }

    /// Returns the amount of free memory in KiB.
    pub fn free_kib(&self) -> usize {
        self.count_total_free_pages() * arch::PAGE_SIZE / 1024
    }

    /// Returns the number of usable frames managed by this allocator.
    pub fn total_pages(&self) -> usize {
        self.total_frames
    }

    /// Returns the number of usable frames not currently on a free list.
    pub fn allocated_pages(&self) -> usize {
        self.total_frames.saturating_sub(self.count_total_free_pages())
    }

    /// Takes a snapshot of the free lists.
    pub fn stats(&self) -> BuddyStats {
        let mut free_blocks = [0; BUDDY_MAX_ORDER];
        for (count, list) in free_blocks.iter_mut().zip(&self.free_lists) {
            *count = list.len();
        }
        BuddyStats::new(free_blocks, self.total_frames)
    }

    /// Walks every free list and panics on the first broken invariant.
    ///
    /// Checks that each listed block is flagged free, carries the list's order, is aligned
    /// to it, is unreferenced and correctly linked; that no free block's buddy is a free
    /// block of the same order; that free blocks are disjoint, lie in usable memory and
    /// never add up to more than the pool; and that no unlisted frame is flagged free.
    pub fn check_invariants(&self) {
        let mut listed = 0;
        let mut covered = vec![false; self.table.len()];
        let mut covered_frames = 0;

        for (order, list) in self.free_lists.iter().enumerate() {
            let mut count = 0;
            let mut prev = None;

            for head in list.iter(&self.table) {
                let info = &self.table[head];
                assert!(
                    count < self.table.len(),
                    "order-{} free list is cyclic",
                    order
                );
                assert!(info.is_free(), "listed frame {} is not flagged free", head);
                assert!(!info.is_reserved(), "reserved frame {} is on a free list", head);
                assert!(!info.is_allocated(), "allocated frame {} is on a free list", head);
                assert!(
                    info.order() == order,
                    "frame {} has order {} but sits on the order-{} list",
                    head,
                    info.order(),
                    order
                );
                assert!(
                    head.is_aligned_to_order(order),
                    "frame {} is misaligned for order {}",
                    head,
                    order
                );
                assert!(info.ref_count() == 0, "free frame {} is referenced", head);
                assert!(info.prev == prev, "broken back link at frame {}", head);

                if order < TOP_ORDER {
                    let buddy = buddy::buddy_frame(head, order);
                    if let Some(other) = self.table.get(buddy) {
                        assert!(
                            !(other.is_free() && other.order() == order),
                            "free buddies {} and {} were not merged at order {}",
                            head,
                            buddy,
                            order
                        );
                    }
                }

                let end = head.as_usize() + buddy::order_frames(order);
                assert!(
                    end <= self.table.len(),
                    "order-{} block at frame {} runs past the frame table",
                    order,
                    head
                );
                for frame in head.as_usize()..end {
                    assert!(
                        !covered[frame],
                        "frame {} is covered by more than one free block",
                        frame
                    );
                    assert!(
                        !self.table[FrameNumber::new(frame)].is_reserved(),
                        "free block at frame {} covers reserved frame {}",
                        head,
                        frame
                    );
                    covered[frame] = true;
                }
                covered_frames += end - head.as_usize();

                prev = Some(head);
                count += 1;
            }

            assert!(
                count == list.len(),
                "order-{} list holds {} blocks but counts {}",
                order,
                count,
                list.len()
            );
            listed += count;
        }

        assert!(
            covered_frames <= self.total_frames,
            "{} frames are free but the pool only has {}",
            covered_frames,
            self.total_frames
        );

        let flagged = (0..self.table.len())
            .filter(|&frame| self.table[FrameNumber::new(frame)].is_free())
            .count();
        assert!(
            flagged == listed,
            "{} frames are flagged free but {} are listed",
            flagged,
            listed
        );
    }

    /// Runs the invariant checker when the `invariant-checks` feature is on.
    #[inline]
    fn verify(&self) {
        if cfg!(feature = "invariant-checks") {
            self.check_invariants();
        }
    }

    fn info_mut(&mut self, page: Page) -> &mut PageInfo {
        let frame = page.frame_number();
        self.table
            .get_mut(frame)
            .unwrap_or_else(|| panic!("frame {} is outside the frame table", frame))
    }

    /// Takes a block of exactly `req_order` off the free lists, splitting a larger one if
    /// needed. Returns `None` when every list from `req_order` up is empty.
    fn find(&mut self, req_order: usize) -> Option<FrameNumber> {
        let order = (req_order..BUDDY_MAX_ORDER).find(|&order| !self.free_lists[order].is_empty())?;
        let head = self.free_lists[order].pop(&mut self.table)?;

        log::trace!(
            "found order-{} block at {} for an order-{} request",
            order,
            HumanAddress::from(head.start().as_usize()),
            req_order
        );

        if order > req_order {
            Some(self.split(head, req_order))
        } else {
            Some(head)
        }
    }

    /// Halves the unlinked block at `head` down to `target_order`, freeing each upper half.
    fn split(&mut self, head: FrameNumber, target_order: usize) -> FrameNumber {
        let mut order = self.table[head].order();
        assert!(
            target_order < order,
            "cannot split order-{} block at frame {} down to order {}",
            order,
            head,
            target_order
        );

        while order > target_order {
            order -= 1;
            let buddy = buddy::buddy_frame(head, order);

            self.table[head].set_order(order);
            self.table[buddy].set_order(order);
            self.free_lists[order].push(&mut self.table, buddy);
        }

        log::trace!("split frame {} down to order {}", head, target_order);
        head
    }

    /// Links the just-freed block at `head` into the free lists, first merging it with its
    /// buddy for as long as the buddy is a free block of the same order.
    ///
    /// The lower-addressed half always survives a merge: it is the one aligned to the next
    /// order, which keeps the buddy relation valid one level up. Returns the final head.
    fn merge(&mut self, mut head: FrameNumber) -> FrameNumber {
        let mut order = self.table[head].order();

        while order < TOP_ORDER {
            let buddy = buddy::buddy_frame(head, order);
            match self.table.get(buddy) {
                Some(info) if info.is_free() && info.order() == order => {}
                _ => break,
            }

            self.free_lists[order].remove(&mut self.table, buddy);
            log::trace!("merging order-{} buddies {} and {}", order, head, buddy);
            head = head.min(buddy);
            order += 1;
            self.table[head].set_order(order);
        }

        self.free_lists[order].push(&mut self.table, head);
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, RegionKind};

    const MAX_BLOCK: usize = 1 << TOP_ORDER;

    /// Installs emulated memory covering the whole emulated physical address space.
    fn setup_memory() {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(0x1_0000));
        }
    }

    /// An allocator over `frames` usable frames, all released.
    fn pool(frames: usize) -> PageAllocator {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(frames));
        allocator.release_range(FrameNumber::new(0), frames);
        allocator
    }

    fn fill(page: Page, len: usize, byte: u8) {
        unsafe { ptr::write_bytes(page.virtual_address().as_mut_ptr::<u8>(), byte, len) }
    }

    fn bytes(page: Page, len: usize) -> &'static [u8] {
        unsafe { core::slice::from_raw_parts(page.virtual_address().as_ptr::<u8>(), len) }
    }

    struct TestRegion(usize, usize, RegionKind);

    impl BootMemoryRegion for TestRegion {
        fn base(&self) -> PhysicalAddress {
            PhysicalAddress::new(self.0)
        }

        fn size(&self) -> usize {
            self.1
        }

        fn kind(&self) -> RegionKind {
            self.2
        }
    }

    #[test]
    fn creates_empty_allocator() {
        let allocator = PageAllocator::new(FrameTable::with_frames(64));

        assert_eq!(allocator.count_total_free_pages(), 0);
        assert_eq!(allocator.total_pages(), 64);
        assert_eq!(allocator.allocated_pages(), 64);
        allocator.check_invariants();
    }

    #[test]
    fn release_carves_largest_aligned_blocks() {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(MAX_BLOCK * 2));

        // 3..16 is 1 + 4 + 8 frames at orders 0, 2, 3.
        allocator.release_range(FrameNumber::new(3), 13);
        assert_eq!(allocator.count_free_pages(0), 1);
        assert_eq!(allocator.count_free_pages(1), 0);
        assert_eq!(allocator.count_free_pages(2), 1);
        assert_eq!(allocator.count_free_pages(3), 1);
        assert_eq!(allocator.count_total_free_pages(), 13);

        // Filling in 0..3 coalesces everything into one order-4 block.
        allocator.release_range(FrameNumber::new(0), 3);
        assert_eq!(allocator.count_free_pages(4), 1);
        assert_eq!(allocator.count_total_free_pages(), 16);
        allocator.check_invariants();
    }

    #[test]
    fn release_never_exceeds_top_order() {
        let allocator = pool(MAX_BLOCK * 4);

        assert_eq!(allocator.count_free_pages(TOP_ORDER), 4);
        assert_eq!(allocator.count_total_free_pages(), MAX_BLOCK * 4);
        allocator.check_invariants();
    }

    #[test]
    fn from_boot_map_skips_reserved_frames() {
        let page = arch::PAGE_SIZE;
        let boot_map = [
            TestRegion(0, page * 64, RegionKind::Free),
            TestRegion(page * 8, page * 4, RegionKind::Reserved),
            TestRegion(page * 40, page, RegionKind::Bad),
        ];
        let mut allocator = PageAllocator::from_boot_map(&boot_map);

        assert_eq!(allocator.total_pages(), 64 - 5);
        assert_eq!(allocator.count_total_free_pages(), 64 - 5);
        allocator.check_invariants();

        // Drain the pool; no reserved frame may ever be handed out.
        let mut seen = vec![];
        while let Ok(page) = allocator.page_alloc(AllocFlags::empty()) {
            let frame = page.frame_number().as_usize();
            assert!(!(8..12).contains(&frame) && frame != 40);
            seen.push(frame);
        }
        assert_eq!(seen.len(), 64 - 5);
    }

    #[test]
    fn splits_larger_blocks() {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(16));
        allocator.release_range(FrameNumber::new(0), 4);

        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
        assert_eq!(page.frame_number(), FrameNumber::new(0));
        assert_eq!(allocator.order_of(page), 0);

        // One order-2 block became an order-0 allocation plus order-0 and order-1 halves.
        assert_eq!(allocator.count_free_pages(0), 1);
        assert_eq!(allocator.count_free_pages(1), 1);
        assert_eq!(allocator.count_total_free_pages(), 3);
        allocator.check_invariants();
    }

    #[test]
    fn coalesces_buddies() {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(16));

        allocator.release_range(FrameNumber::new(0), 1);
        allocator.release_range(FrameNumber::new(1), 1);

        assert_eq!(allocator.count_free_pages(0), 0);
        assert_eq!(allocator.count_free_pages(1), 1);
        assert_eq!(allocator.count_total_free_pages(), 2);
    }

    #[test]
    fn does_not_coalesce_neighbours_that_are_not_buddies() {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(16));

        // Frames 1 and 2 are adjacent but belong to different order-1 pairs.
        allocator.release_range(FrameNumber::new(1), 1);
        allocator.release_range(FrameNumber::new(2), 1);

        assert_eq!(allocator.count_free_pages(0), 2);
        assert_eq!(allocator.count_free_pages(1), 0);
        allocator.check_invariants();
    }

    #[test]
    fn split_then_merge_restores_block() {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(32));
        allocator.release_range(FrameNumber::new(8), 8);
        let before = allocator.stats();

        for order in 1..=3 {
            let head = allocator.find(3).unwrap();
            allocator.table[head].set_order(3);
            let half = allocator.split(head, order - 1);
            assert_eq!(allocator.table[half].order(), order - 1);
            assert_eq!(allocator.merge(half), FrameNumber::new(8));
            assert_eq!(allocator.stats(), before);
            allocator.check_invariants();
        }
    }

    #[test]
    #[should_panic(expected = "cannot split order-2 block")]
    fn split_to_same_order_panics() {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(4));
        allocator.release_range(FrameNumber::new(0), 4);
        let head = allocator.find(2).unwrap();
        allocator.split(head, 2);
    }

    #[test]
    fn find_fails_only_when_all_larger_lists_are_empty() {
        let mut allocator = PageAllocator::new(FrameTable::with_frames(64));
        allocator.release_range(FrameNumber::new(0), 2);
        allocator.release_range(FrameNumber::new(8), 8);

        // Orders 1 and 3 are populated; 4 and up are empty.
        assert!(allocator.find(4).is_none());
        assert!(allocator.find(TOP_ORDER).is_none());
        assert_eq!(allocator.count_total_free_pages(), 10);

        // Order 2 is served from the order-3 block, leaving its upper half behind.
        assert_eq!(allocator.find(2), Some(FrameNumber::new(8)));
        assert_eq!(allocator.find(3), None);
        assert_eq!(allocator.count_free_pages(2), 1);

        // Order 0 takes the smallest block that fits: the order-1 block at frame 0.
        assert_eq!(allocator.find(0), Some(FrameNumber::new(0)));
        assert_eq!(allocator.count_free_pages(0), 1);
        allocator.check_invariants();
    }

    #[test]
    fn rejects_orders_past_the_top() {
        let mut allocator = pool(MAX_BLOCK);

        assert_eq!(
            allocator.alloc_order(BUDDY_MAX_ORDER, AllocFlags::empty()),
            Err(AllocError::OrderTooLarge)
        );
        assert_eq!(allocator.count_free_pages(9), 1);
        assert_eq!(allocator.count_free_pages(BUDDY_MAX_ORDER), 0);
    }

    #[test]
    fn alloc_free_merge_round_trip() {
        let mut allocator = pool(MAX_BLOCK);
        assert_eq!(allocator.count_free_pages(TOP_ORDER), 1);
        let free_before = allocator.count_total_free_pages();

        let pages: Vec<Page> = (0..4)
            .map(|_| {
                let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
                allocator.page_incref(page);
                page
            })
            .collect();

        let mut frames: Vec<_> = pages.iter().map(|p| p.frame_number()).collect();
        frames.sort();
        frames.dedup();
        assert_eq!(frames.len(), 4, "allocations overlap");
        assert!(pages.iter().all(|&p| allocator.block_size(p) == arch::PAGE_SIZE));
        assert_eq!(allocator.count_total_free_pages(), free_before - 4);
        allocator.check_invariants();

        for page in pages {
            allocator.page_decref(page);
        }

        assert_eq!(allocator.count_total_free_pages(), free_before);
        assert_eq!(allocator.count_free_pages(TOP_ORDER), 1);
        for order in 0..TOP_ORDER {
            assert_eq!(allocator.count_free_pages(order), 0);
        }
        let head = allocator.find(TOP_ORDER).unwrap();
        assert_eq!(head, FrameNumber::new(0));
    }

    #[test]
    fn huge_zeroed_allocation() {
        setup_memory();
        let mut allocator = pool(MAX_BLOCK);

        // Dirty the pool so zero-fill is observable.
        let scratch = allocator.page_alloc(AllocFlags::HUGE).unwrap();
        fill(scratch, arch::HUGE_PAGE_SIZE, 0xAA);
        allocator.page_free(scratch);

        let page = allocator
            .page_alloc(AllocFlags::HUGE | AllocFlags::ZERO)
            .unwrap();

        assert_eq!(allocator.order_of(page), HUGE_ORDER);
        assert_eq!(allocator.block_size(page), arch::PAGE_SIZE << HUGE_ORDER);
        assert!(bytes(page, arch::HUGE_PAGE_SIZE).iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_fill_stays_inside_the_block() {
        setup_memory();
        let mut allocator = pool(4);

        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
        let neighbour = allocator.page_alloc(AllocFlags::empty()).unwrap();
        fill(neighbour, arch::PAGE_SIZE, 0x55);
        fill(page, arch::PAGE_SIZE, 0xAA);
        allocator.page_free(page);

        let page = allocator.page_alloc(AllocFlags::ZERO).unwrap();
        assert!(bytes(page, arch::PAGE_SIZE).iter().all(|&b| b == 0));
        assert!(bytes(neighbour, arch::PAGE_SIZE).iter().all(|&b| b == 0x55));
    }

    #[test]
    fn partial_exhaustion() {
        let mut allocator = pool(2);
        assert_eq!(allocator.count_free_pages(1), 1);

        let first = allocator.page_alloc(AllocFlags::empty()).unwrap();
        let second = allocator.page_alloc(AllocFlags::empty()).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            allocator.page_alloc(AllocFlags::empty()),
            Err(AllocError::OutOfMemory)
        );
        assert_eq!(allocator.page_alloc(AllocFlags::HUGE), Err(AllocError::OutOfMemory));

        allocator.page_free(second);
        let third = allocator.page_alloc(AllocFlags::empty()).unwrap();
        assert_eq!(third, second);
        assert_eq!(
            allocator.page_alloc(AllocFlags::empty()),
            Err(AllocError::OutOfMemory)
        );
        allocator.check_invariants();
    }

    #[test]
    fn buddy_outside_the_table_is_never_merged() {
        // Three frames: frame 2's buddy is frame 3, which the table does not cover, so
        // frame 2 stays an order-0 block next to the order-1 block at frame 0.
        let mut allocator = pool(3);
        assert_eq!(allocator.count_free_pages(1), 1);
        assert_eq!(allocator.count_free_pages(0), 1);
        allocator.check_invariants();

        let pages: Vec<Page> = (0..3)
            .map(|_| allocator.page_alloc(AllocFlags::empty()).unwrap())
            .collect();
        for page in pages {
            allocator.page_free(page);
        }
        assert_eq!(allocator.count_free_pages(1), 1);
        assert_eq!(allocator.count_free_pages(0), 1);
        allocator.check_invariants();
    }

    #[test]
    fn reference_counting_defers_free() {
        let mut allocator = pool(8);
        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
        assert_eq!(allocator.page_info(page).ref_count(), 0);

        allocator.page_incref(page);
        allocator.page_incref(page);
        allocator.page_decref(page);
        assert!(!allocator.page_info(page).is_free());
        assert_eq!(allocator.count_total_free_pages(), 7);

        allocator.page_decref(page);
        assert_eq!(allocator.count_total_free_pages(), 8);
        assert_eq!(allocator.count_free_pages(3), 1);
    }

    #[test]
    fn owned_references() {
        let mut allocator = pool(8);

        let first = allocator.alloc_ref(AllocFlags::empty()).unwrap();
        let page = first.page();
        let second = allocator.page_ref(page);
        assert_eq!(allocator.page_info(page).ref_count(), 2);

        allocator.page_unref(first);
        assert_eq!(allocator.count_total_free_pages(), 7);
        allocator.page_unref(second);
        assert_eq!(allocator.count_total_free_pages(), 8);
    }

    #[test]
    #[should_panic(expected = "outstanding references")]
    fn freeing_referenced_page_panics() {
        let mut allocator = pool(4);
        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
        allocator.page_incref(page);
        allocator.page_free(page);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut allocator = pool(4);
        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
        allocator.page_free(page);
        allocator.page_free(page);
    }

    #[test]
    #[should_panic(expected = "dropping a reference to unallocated frame")]
    fn decref_of_free_page_panics() {
        let mut allocator = pool(4);
        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
        allocator.page_free(page);
        allocator.page_decref(page);
    }

    #[test]
    #[should_panic(expected = "double free of frame 1")]
    fn double_free_after_merge_panics() {
        let mut allocator = pool(4);
        let a = allocator.page_alloc(AllocFlags::empty()).unwrap();
        let b = allocator.page_alloc(AllocFlags::empty()).unwrap();
        assert_eq!(b.frame_number(), FrameNumber::new(1));

        // Once both are free they coalesce and frame 1 is no longer a listed head.
        allocator.page_free(b);
        allocator.page_free(a);
        assert_eq!(allocator.count_free_pages(2), 1);

        allocator.page_free(b);
    }

    #[test]
    #[should_panic(expected = "taking a reference to unallocated frame 6")]
    fn incref_of_free_interior_frame_panics() {
        let mut allocator = pool(8);
        let interior = allocator
            .page_at(PhysicalAddress::new(arch::PAGE_SIZE * 6))
            .unwrap();
        allocator.page_incref(interior);
    }

    #[test]
    #[should_panic(expected = "dropping a reference to unallocated frame 3")]
    fn decref_of_frame_inside_allocated_block_panics() {
        let mut allocator = pool(8);
        let page = allocator.alloc_order(2, AllocFlags::empty()).unwrap();
        allocator.page_incref(page);

        let interior = allocator.page_at(page.address() + arch::PAGE_SIZE * 3).unwrap();
        allocator.page_decref(interior);
    }

    #[test]
    fn freed_block_can_be_reallocated() {
        let mut allocator = pool(4);
        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();
        assert!(allocator.page_info(page).is_allocated());

        allocator.page_free(page);
        assert!(!allocator.page_info(page).is_allocated());

        let again = allocator.page_alloc(AllocFlags::empty()).unwrap();
        assert_eq!(again, page);
        allocator.page_free(again);
        allocator.check_invariants();
    }

    #[test]
    #[should_panic(expected = "covered by more than one free block")]
    fn overlapping_free_blocks_are_detected() {
        let mut allocator = pool(4);
        assert_eq!(allocator.count_free_pages(2), 1);

        // Link frame 1 at order 0 while it is still inside the free order-2 block.
        let frame = FrameNumber::new(1);
        allocator.table[frame].set_order(0);
        allocator.free_lists[0].push(&mut allocator.table, frame);

        allocator.check_invariants();
    }

    #[test]
    #[should_panic(expected = "physical range out of bounds")]
    fn zero_fill_past_emulated_memory_panics() {
        AddressTranslator::set_current(AddressTranslator::emulated(arch::PAGE_SIZE * 4));
        let mut allocator = pool(8);
        let _ = allocator.alloc_order(3, AllocFlags::ZERO);
    }

    #[test]
    #[should_panic(expected = "cannot release reserved frame")]
    fn releasing_reserved_frames_panics() {
        let mut table = FrameTable::with_frames(4);
        table[FrameNumber::new(2)].flags.set(PageFlag::Reserved);
        let mut allocator = PageAllocator::new(table);
        allocator.release_range(FrameNumber::new(0), 4);
    }

    #[test]
    fn mixed_workload_preserves_invariants_and_conservation() {
        let total = MAX_BLOCK * 2;
        let mut allocator = pool(total);
        let mut live: Vec<Page> = vec![];

        // Deterministic xorshift so the sequence is reproducible.
        let mut state: u32 = 0x2545_F491;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };

        for _ in 0..2000 {
            let roll = next();
            if live.is_empty() || roll % 3 != 0 {
                let order = (next() % 6) as usize;
                if let Ok(page) = allocator.alloc_order(order, AllocFlags::empty()) {
                    assert_eq!(allocator.order_of(page), order);
                    assert!(page.frame_number().is_aligned_to_order(order));
                    allocator.page_incref(page);
                    live.push(page);
                }
            } else {
                let victim = live.swap_remove(next() as usize % live.len());
                allocator.page_decref(victim);
            }

            let outstanding: usize = live
                .iter()
                .map(|&p| buddy::order_frames(allocator.order_of(p)))
                .sum();
            assert_eq!(allocator.count_total_free_pages() + outstanding, total);
            assert_eq!(allocator.allocated_pages(), outstanding);
        }
        allocator.check_invariants();

        for page in live.drain(..) {
            allocator.page_decref(page);
        }
        assert_eq!(allocator.count_free_pages(TOP_ORDER), 2);
        assert_eq!(allocator.count_total_free_pages(), total);
        allocator.check_invariants();
    }

    #[test]
    fn page_lookup_by_address() {
        setup_memory();
        let mut allocator = pool(16);
        let page = allocator.page_alloc(AllocFlags::empty()).unwrap();

        assert_eq!(allocator.page_at(page.address()), Some(page));
        assert_eq!(allocator.page_at(PhysicalAddress::new(arch::PAGE_SIZE * 16)), None);

        let virt = VirtualAddress::from_ptr(page.virtual_address().as_ptr::<u8>());
        assert_eq!(Page::containing(virt), page);
    }

    #[test]
    fn diagnostics() {
        let mut allocator = pool(MAX_BLOCK);
        let _ = allocator.page_alloc(AllocFlags::empty()).unwrap();

        // 511 free frames: one block at each order below the top.
        for order in 0..TOP_ORDER {
            assert_eq!(allocator.count_free_pages(order), 1);
        }
        assert_eq!(allocator.count_free_pages(TOP_ORDER), 0);
        assert_eq!(allocator.count_total_free_pages(), MAX_BLOCK - 1);
        assert_eq!(allocator.free_kib(), (MAX_BLOCK - 1) * arch::PAGE_SIZE / 1024);

        let stats = allocator.stats();
        assert_eq!(stats.free_pages(), MAX_BLOCK - 1);
        assert_eq!(stats.allocated_pages(), 1);
    }
}
