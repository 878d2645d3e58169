//! Intrusive free lists.
//!
//! Each order has one doubly-linked list threaded through the `prev`/`next` fields of the
//! descriptors themselves, so linking and unlinking never allocate and removing an arbitrary
//! block (needed when merging with a buddy) is O(1).

use crate::{FrameNumber, FrameTable, PageFlag};

/// Free list for a specific order.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: Option<FrameNumber>,
    len: usize,
}

impl FreeList {
    /// Creates an empty free list.
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Links `frame` at the head of the list and marks it free.
    pub(crate) fn push(&mut self, table: &mut FrameTable, frame: FrameNumber) {
        let old_head = self.head;
        {
            let info = &mut table[frame];
            debug_assert!(!info.is_free(), "frame {frame} is already on a free list");
            info.prev = None;
            info.next = old_head;
            info.flags.set(PageFlag::Free);
        }
        if let Some(old_head) = old_head {
            table[old_head].prev = Some(frame);
        }
        self.head = Some(frame);
        self.len += 1;
    }

    /// Unlinks and returns the head of the list, clearing its free flag.
    pub(crate) fn pop(&mut self, table: &mut FrameTable) -> Option<FrameNumber> {
        let frame = self.head?;
        self.remove(table, frame);
        Some(frame)
    }

    /// Unlinks `frame` from this list, clearing its free flag.
    pub(crate) fn remove(&mut self, table: &mut FrameTable, frame: FrameNumber) {
        let (prev, next) = {
            let info = &mut table[frame];
            assert!(info.is_free(), "frame {frame} is not on a free list");
            info.flags.clear(PageFlag::Free);
            (info.prev.take(), info.next.take())
        };

        match prev {
            Some(prev) => table[prev].next = next,
            None => {
                debug_assert_eq!(self.head, Some(frame), "unlinked frame was not the head");
                self.head = next;
            }
        }
        if let Some(next) = next {
            table[next].prev = prev;
        }
        self.len -= 1;
    }

    /// Returns the number of blocks in this free list.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns true if this free list is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Iterates over the heads of the blocks on this list.
    pub(crate) fn iter<'a>(&self, table: &'a FrameTable) -> Iter<'a> {
        Iter {
            table,
            next: self.head,
        }
    }
}

pub(crate) struct Iter<'a> {
    table: &'a FrameTable,
    next: Option<FrameNumber>,
}

impl Iterator for Iter<'_> {
    type Item = FrameNumber;

    fn next(&mut self) -> Option<FrameNumber> {
        let frame = self.next?;
        self.next = self.table[frame].next;
        Some(frame)
    }
}
