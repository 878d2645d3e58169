//! The page descriptor table.
//!
//! One [`PageInfo`] per physical frame, indexed by frame number starting at frame 0. Keeping
//! frame 0 at physical address 0 means every block's buddy can be found by flipping a single
//! address bit.
//!
//! # Building a Frame Table
//!
//! Implement the [`BootMemoryRegion`] trait on your bootloader's memory map entry type, then
//! call [`FrameTable::from_boot_map`]:
//!
//! ```ignore
//! struct MyBootEntry { /* ... */ }
//!
//! impl BootMemoryRegion for MyBootEntry {
//!     fn base(&self) -> PhysicalAddress { /* ... */ }
//!     fn size(&self) -> usize { /* ... */ }
//!     fn kind(&self) -> RegionKind { /* ... */ }
//! }
//!
//! let boot_entries: &[MyBootEntry] = /* ... */;
//! let table = FrameTable::from_boot_map(boot_entries);
//! ```

use alloc::boxed::Box;
use core::fmt;
use core::ops::{Index, IndexMut};

use crate::{FrameNumber, HumanSize, PageFlag, PageInfo, PhysicalAddress, arch};

/// The kind of memory a boot map region describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// RAM the kernel may allocate.
    Free,
    /// Firmware or device memory.
    Reserved,
    /// ACPI tables, reclaimable once parsed.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// Defective RAM.
    Bad,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegionKind::Free => "free",
            RegionKind::Reserved => "reserved",
            RegionKind::AcpiReclaimable => "ACPI",
            RegionKind::AcpiNvs => "ACPI NVS",
            RegionKind::Bad => "bad",
        })
    }
}

/// Represents a single entry in a boot-time memory map.
///
/// Implement this trait on bootloader-specific memory map entry types so the frame table
/// can be built straight from the boot map.
pub trait BootMemoryRegion {
    /// Returns the base physical address of this region.
    fn base(&self) -> PhysicalAddress;

    /// Returns the size of this region in bytes.
    fn size(&self) -> usize;

    /// Returns what kind of memory this region holds.
    fn kind(&self) -> RegionKind;

    /// Returns whether this region contains memory the allocator may hand out.
    fn is_usable(&self) -> bool {
        self.kind() == RegionKind::Free
    }
}

/// One descriptor per physical frame, from frame 0 to the last usable frame.
pub struct FrameTable {
    frames: Box<[PageInfo]>,
}

impl FrameTable {
    /// Creates a table of `count` frames, all usable.
    pub fn with_frames(count: usize) -> Self {
        Self {
            frames: (0..count).map(|_| PageInfo::default()).collect(),
        }
    }

    /// Constructs a frame table from a boot-time memory map.
    ///
    /// The table covers every frame up to the end of the highest usable region. A frame is
    /// usable when it lies entirely within a usable region; regions are applied in order,
    /// so a later region overrides an earlier one. Frames touched by a non-usable region, or
    /// by no region at all, are marked reserved and never reach the free lists.
    pub fn from_boot_map<R: BootMemoryRegion>(boot_map: &[R]) -> Self {
        let frame_count = boot_map
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| (r.base().as_usize() + r.size()) / arch::PAGE_SIZE)
            .max()
            .unwrap_or(0);

        log::trace!(
            "building frame table with {} frames for {} of memory",
            frame_count,
            HumanSize::from(frame_count * arch::PAGE_SIZE)
        );

        let frames: Box<[PageInfo]> = (0..frame_count)
            .map(|frame_idx| {
                let mut info = PageInfo::default();
                if !Self::is_frame_usable(frame_idx, boot_map) {
                    info.flags.set(PageFlag::Reserved);
                }
                info
            })
            .collect();

        Self { frames }
    }

    /// Returns the number of frames covered by the table.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns true if the table covers no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns the number of frames backed by usable memory.
    pub fn usable_frame_count(&self) -> usize {
        self.frames.iter().filter(|f| !f.is_reserved()).count()
    }

    /// Returns a reference to the descriptor of the given frame.
    pub fn get(&self, frame: FrameNumber) -> Option<&PageInfo> {
        self.frames.get(frame.as_usize())
    }

    /// Returns a mutable reference to the descriptor of the given frame.
    pub(crate) fn get_mut(&mut self, frame: FrameNumber) -> Option<&mut PageInfo> {
        self.frames.get_mut(frame.as_usize())
    }

    /// Iterates over maximal runs of usable frames as `(first frame, frame count)`.
    pub fn usable_runs(&self) -> UsableRuns<'_> {
        UsableRuns {
            frames: &self.frames,
            cursor: 0,
        }
    }

    /// Determines if a frame is usable based on the boot map.
    fn is_frame_usable<R: BootMemoryRegion>(frame_idx: usize, boot_map: &[R]) -> bool {
        let frame_start = frame_idx * arch::PAGE_SIZE;
        let frame_end = frame_start + arch::PAGE_SIZE;
        let mut usable = false;

        for region in boot_map {
            let region_start = region.base().as_usize();
            let region_end = region_start + region.size();

            if region.is_usable() {
                // Free memory only counts for frames it covers completely.
                if region_start <= frame_start && frame_end <= region_end {
                    usable = true;
                }
            } else if region_start < frame_end && frame_start < region_end {
                // Anything else claims every frame it touches.
                usable = false;
            }
        }

        usable
    }
}

impl Index<FrameNumber> for FrameTable {
    type Output = PageInfo;

    fn index(&self, frame: FrameNumber) -> &PageInfo {
        &self.frames[frame.as_usize()]
    }
}

impl IndexMut<FrameNumber> for FrameTable {
    fn index_mut(&mut self, frame: FrameNumber) -> &mut PageInfo {
        &mut self.frames[frame.as_usize()]
    }
}

/// Iterator over runs of usable frames, see [`FrameTable::usable_runs`].
pub struct UsableRuns<'a> {
    frames: &'a [PageInfo],
    cursor: usize,
}

impl Iterator for UsableRuns<'_> {
    type Item = (FrameNumber, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.frames[self.cursor..];
        let skip = rest.iter().position(|f| !f.is_reserved())?;
        let start = self.cursor + skip;
        let count = self.frames[start..]
            .iter()
            .take_while(|f| !f.is_reserved())
            .count();
        self.cursor = start + count;
        Some((FrameNumber::new(start), count))
    }
}
