#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Buddy page allocator
//!
//! The physical page allocator of the Polaris kernel. It manages every frame of physical
//! memory through a descriptor table and hands out naturally aligned blocks of 2^order
//! contiguous frames, from single base pages up to huge pages.
//!
//! - [`FrameTable`]: one [`PageInfo`] per frame, built from the boot memory map.
//! - [`PageAllocator`]: per-order free lists, block splitting and buddy coalescing, and
//!   reference-counted freeing.
//! - [`LockedPageAllocator`]: the same allocator behind a spin lock, for a kernel `static`.
//!
//! Under `cfg(test)` or the `software-emulation` feature, the crate builds against a scaled
//! down architecture with 16-byte pages and host-backed physical memory.

extern crate alloc;

mod address;
mod arch;
mod buddy;
mod frame_table;
mod free_list;
mod handle;
mod human_address;
mod human_size;
mod locked;
mod numbers;
mod page;
mod page_allocator;
mod stats;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use buddy::{
    BASE_ORDER, BUDDY_MAX_ORDER, HUGE_ORDER, TOP_ORDER, buddy_address, buddy_frame,
    order_frames, order_size,
};
pub use frame_table::{BootMemoryRegion, FrameTable, RegionKind, UsableRuns};
pub use handle::{Page, PageRef};
pub use human_address::HumanAddress;
pub use human_size::HumanSize;
pub use locked::LockedPageAllocator;
pub use numbers::FrameNumber;
pub use page::PageInfo;
pub use page_allocator::{AllocError, AllocFlags, PageAllocator};
pub use stats::BuddyStats;

pub(crate) use page::PageFlag;

pub use arch::{HUGE_PAGE_SIZE, PAGE_SIZE};
