//! Software emulation implementation for testing and development.
//!
//! This module provides a software-emulated architecture that can run on any host.
//! It's designed for testing the allocator without requiring actual hardware access.
//!
//! The software-emulated architecture is a "scale model" of x86_64:
//! - 16-bit addresses (vs 48-bit on x86_64)
//! - 16-byte pages (vs 4 KiB on x86_64)
//! - huge pages span 2^9 base pages, exactly like 2 MiB pages on x86_64
//!
//! This keeps every buddy order reachable while keeping host memory usage minimal.

/// Maximum number of bits in a physical address for software emulation.
pub const MAX_PHYSICAL_BITS: usize = 16;

/// Maximum number of bits in a virtual address for software emulation.
pub const MAX_VIRTUAL_BITS: usize = 16;

/// Page size in bytes (16 bytes = 2^4).
pub const PAGE_SIZE: usize = 16;

/// Huge page size in bytes (512 base pages, 8 KiB).
pub const HUGE_PAGE_SIZE: usize = PAGE_SIZE << 9;

/// Validates a physical address for software emulation.
///
/// Physical addresses must fit within 16 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr < 1 << MAX_PHYSICAL_BITS
}

/// Validates a virtual address for software emulation.
///
/// Virtual addresses must be canonical (bits 16-63 must be sign-extended from bit 15).
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

/// Emulated physical memory for software simulation.
///
/// Stands in for the kernel's direct map: a physical address is simply an offset into the
/// buffer, so zero-filling a block on the host touches real bytes that tests can inspect.
pub struct EmulatedMemory {
    /// The underlying memory buffer.
    memory: Vec<u8>,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region of the specified size.
    pub fn new(size: usize) -> Self {
        Self {
            memory: alloc::vec![0u8; size],
        }
    }

    /// Translates a physical address to a virtual address (pointer into the buffer).
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.memory.len(), "physical address out of bounds");
        unsafe { self.memory.as_ptr().add(phys) as *mut u8 }
    }

    /// Translates the start of `phys..phys + len`, which must lie entirely in the buffer.
    pub fn translate_range(&self, phys: usize, len: usize) -> *mut u8 {
        assert!(
            phys.checked_add(len)
                .is_some_and(|end| end <= self.memory.len() && phys < self.memory.len()),
            "physical range out of bounds"
        );
        unsafe { self.memory.as_ptr().add(phys) as *mut u8 }
    }

    /// Translates a virtual address (pointer) back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let offset = unsafe { ptr.offset_from(self.memory.as_ptr()) };
        assert!(offset >= 0, "pointer not within emulated memory");
        assert!(
            (offset as usize) < self.memory.len(),
            "pointer not within emulated memory"
        );
        offset as usize
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.memory.len()
    }
}
