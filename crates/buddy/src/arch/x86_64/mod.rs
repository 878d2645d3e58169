//! x86_64 architecture-specific constants.
//!
//! Page sizes come straight from the `x86_64` crate so the buddy orders line up with the
//! frame sizes the paging hardware actually supports.

use x86_64::structures::paging::{PageSize, Size2MiB, Size4KiB};

/// Maximum number of bits in a physical address on x86_64.
/// This is typically 52 bits on modern CPUs, but we use 48 as a conservative default.
pub const MAX_PHYSICAL_BITS: usize = 48;

/// Maximum number of bits in a virtual address on x86_64 with 4-level paging.
pub const MAX_VIRTUAL_BITS: usize = 48;

/// Base page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = Size4KiB::SIZE as usize;

/// Huge page size in bytes (2 MiB, a level-1 page directory entry).
pub const HUGE_PAGE_SIZE: usize = Size2MiB::SIZE as usize;

/// Validates a physical address for x86_64.
///
/// Physical addresses must not exceed the maximum physical address width.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    let max_addr = (1usize << MAX_PHYSICAL_BITS) - 1;
    addr <= max_addr
}

/// Validates a virtual address for x86_64.
///
/// Virtual addresses must be canonical (bits 47-63 must be sign-extended from bit 47).
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    let low_mask = (1usize << MAX_VIRTUAL_BITS) - 1;
    let canonical = if addr & (1 << (MAX_VIRTUAL_BITS - 1)) != 0 {
        addr | !low_mask
    } else {
        addr & low_mask
    };
    canonical == addr
}
