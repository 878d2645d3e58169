//! Per-frame descriptors.

use crate::FrameNumber;

/// Metadata for one physical frame.
///
/// Modeled after Linux's `struct page`: the table holds one of these per frame and they are
/// never created or destroyed individually. Only the descriptor heading a block (its
/// lowest-address frame) carries authoritative `order`/free state; the rest of the block's
/// descriptors are ignored until a split or merge makes them heads again.
#[derive(Debug, Default)]
pub struct PageInfo {
    pub(crate) flags: PageFlags,
    order: u8,
    ref_count: u32,
    /// Free-list linkage, valid only while `PageFlag::Free` is set.
    pub(crate) prev: Option<FrameNumber>,
    pub(crate) next: Option<FrameNumber>,
}

impl PageInfo {
    /// Returns the order of the block this frame heads.
    pub fn order(&self) -> usize {
        self.order as usize
    }

    pub(crate) fn set_order(&mut self, order: usize) {
        self.order = order as u8;
    }

    /// Returns true if this frame heads a block sitting on a free list.
    pub fn is_free(&self) -> bool {
        self.flags.test(PageFlag::Free)
    }

    /// Returns true if this frame heads a block handed out by the allocator.
    pub fn is_allocated(&self) -> bool {
        self.flags.test(PageFlag::Allocated)
    }

    /// Returns true if this frame is not backed by usable memory.
    pub fn is_reserved(&self) -> bool {
        self.flags.test(PageFlag::Reserved)
    }

    /// Returns the number of outstanding references to the block this frame heads.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub(crate) fn inc_ref(&mut self) -> u32 {
        self.ref_count = self
            .ref_count
            .checked_add(1)
            .expect("page reference count overflow");
        self.ref_count
    }

    pub(crate) fn dec_ref(&mut self) -> u32 {
        self.ref_count = self
            .ref_count
            .checked_sub(1)
            .expect("page reference count underflow");
        self.ref_count
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PageFlag {
    /// Frame heads a block linked into a free list.
    Free = 1 << 0,
    /// Frame is not usable memory and never enters the allocator.
    Reserved = 1 << 1,
    /// Frame heads a block owned by a caller.
    Allocated = 1 << 2,
}

/// Flags for a physical frame descriptor.
///
/// Mutation goes through `&mut`: the whole table is serialized by whoever owns the allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(u8);

impl PageFlags {
    /// Sets the given flag.
    pub fn set(&mut self, flag: PageFlag) {
        self.0 |= flag as u8;
    }

    /// Clears the given flag.
    pub fn clear(&mut self, flag: PageFlag) {
        self.0 &= !(flag as u8);
    }

    /// Tests if the given flag is set.
    pub fn test(&self, flag: PageFlag) -> bool {
        (self.0 & flag as u8) != 0
    }
}
