//! Buddy arithmetic.
//!
//! Everything here is pure: no descriptors, no lists. A block of order `o` spans
//! `1 << o` frames and starts at an address aligned to its own size; its buddy is the
//! other half of the enclosing order `o + 1` block.

use crate::{FrameNumber, PhysicalAddress, arch};

/// Number of buddy orders. Valid orders are `0..BUDDY_MAX_ORDER`.
pub const BUDDY_MAX_ORDER: usize = 10;

/// Largest order a block can reach.
pub const TOP_ORDER: usize = BUDDY_MAX_ORDER - 1;

/// Order of a single base page.
pub const BASE_ORDER: usize = 0;

/// Order of a huge page (2 MiB on x86_64).
pub const HUGE_ORDER: usize = (arch::HUGE_PAGE_SIZE / arch::PAGE_SIZE).trailing_zeros() as usize;

const _: () = assert!(arch::HUGE_PAGE_SIZE.is_power_of_two());
const _: () = assert!(HUGE_ORDER <= TOP_ORDER, "huge pages must fit in the top order");

/// Returns the size in bytes of a block of the given order.
#[inline]
pub const fn order_size(order: usize) -> usize {
    arch::PAGE_SIZE << order
}

/// Returns the number of frames in a block of the given order.
#[inline]
pub const fn order_frames(order: usize) -> usize {
    1 << order
}

/// Returns the address of the buddy of the order-`order` block at `addr`.
///
/// Applying it twice yields `addr` again. The lower of the two addresses is the one aligned
/// to `order_size(order + 1)`.
#[inline]
pub const fn buddy_address(addr: PhysicalAddress, order: usize) -> PhysicalAddress {
    PhysicalAddress::new(addr.as_usize() ^ order_size(order))
}

/// Returns the frame heading the buddy of the order-`order` block headed by `frame`.
#[inline]
pub const fn buddy_frame(frame: FrameNumber, order: usize) -> FrameNumber {
    buddy_address(frame.start(), order).frame_number()
}
