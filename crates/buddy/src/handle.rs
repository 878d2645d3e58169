//! Handles to allocated blocks.

use core::fmt;

use crate::{FrameNumber, HumanAddress, PhysicalAddress, VirtualAddress};

/// A block of physical memory, identified by the frame heading it.
///
/// `Page` is a plain value: copying it does not take a reference, and the allocator keeps
/// the block's order and reference count in its frame table. Use [`PageRef`] to hold a
/// counted reference.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Page(FrameNumber);

impl Page {
    pub(crate) const fn new(frame: FrameNumber) -> Self {
        Self(frame)
    }

    /// Returns the frame heading this block.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        self.0
    }

    /// Returns the physical address of the start of the block.
    #[inline]
    pub const fn address(self) -> PhysicalAddress {
        self.0.start()
    }

    /// Returns where the block appears in the kernel's direct map.
    ///
    /// # Panics
    ///
    /// Panics if the address translator has not been set.
    #[inline]
    pub fn virtual_address(self) -> VirtualAddress {
        VirtualAddress::direct_mapped(self.address())
    }

    /// Returns the page for the frame containing a direct-mapped address.
    ///
    /// The result heads a block only if `virt` points into a block's first frame.
    pub fn containing(virt: VirtualAddress) -> Self {
        Self(PhysicalAddress::from_direct_mapped(virt).frame_number())
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}", HumanAddress::from(self.address().as_usize()))
    }
}

/// One counted reference to an allocated block.
///
/// Created by [`crate::PageAllocator::alloc_ref`] or [`crate::PageAllocator::page_ref`] and
/// given back with [`crate::PageAllocator::page_unref`]. It cannot be cloned, so every
/// reference is returned at most once. Dropping it instead leaks the reference.
#[must_use = "dropping a PageRef leaks its reference; pass it to page_unref"]
#[derive(Debug, PartialEq, Eq)]
pub struct PageRef(Page);

impl PageRef {
    pub(crate) const fn new(page: Page) -> Self {
        Self(page)
    }

    /// Returns the referenced block.
    #[inline]
    pub const fn page(&self) -> Page {
        self.0
    }

    pub(crate) const fn into_page(self) -> Page {
        self.0
    }
}
