//! The shared, lock-protected page allocator.
//!
//! The kernel keeps one [`LockedPageAllocator`] in a `static`. It starts out empty, is
//! initialized once the boot memory map has been read, and serializes every operation
//! behind a single spin lock.

use crate::{AllocError, AllocFlags, BuddyStats, Page, PageAllocator, PageRef};

/// A [`PageAllocator`] behind a spin lock, usable from a `static`.
///
/// ```ignore
/// static PAGES: LockedPageAllocator = LockedPageAllocator::new();
///
/// PAGES.init(PageAllocator::from_boot_map(boot_map));
/// let page = PAGES.page_alloc(AllocFlags::ZERO)?;
/// ```
pub struct LockedPageAllocator {
    inner: spin::Mutex<Option<PageAllocator>>,
}

impl LockedPageAllocator {
    /// Creates an uninitialized allocator. Allocations fail until [`Self::init`] is called.
    pub const fn new() -> Self {
        Self {
            inner: spin::Mutex::new(None),
        }
    }

    /// Installs the allocator that serves every later call.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn init(&self, allocator: PageAllocator) {
        let mut inner = self.inner.lock();
        assert!(inner.is_none(), "page allocator already initialized");
        log::info!(
            "page allocator online: {} of {} pages free",
            allocator.count_total_free_pages(),
            allocator.total_pages()
        );
        *inner = Some(allocator);
    }

    /// Returns true once [`Self::init`] has been called.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Runs `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut PageAllocator) -> R) -> Result<R, AllocError> {
        let mut inner = self.inner.lock();
        let allocator = inner.as_mut().ok_or(AllocError::Uninitialized)?;
        Ok(f(allocator))
    }

    /// See [`PageAllocator::page_alloc`].
    pub fn page_alloc(&self, flags: AllocFlags) -> Result<Page, AllocError> {
        self.with(|allocator| allocator.page_alloc(flags))?
    }

    /// See [`PageAllocator::alloc_order`].
    pub fn alloc_order(&self, order: usize, flags: AllocFlags) -> Result<Page, AllocError> {
        self.with(|allocator| allocator.alloc_order(order, flags))?
    }

    /// See [`PageAllocator::alloc_ref`].
    pub fn alloc_ref(&self, flags: AllocFlags) -> Result<PageRef, AllocError> {
        self.with(|allocator| allocator.alloc_ref(flags))?
    }

    /// See [`PageAllocator::page_free`].
    pub fn page_free(&self, page: Page) {
        self.initialized(|allocator| allocator.page_free(page));
    }

    /// See [`PageAllocator::page_incref`].
    pub fn page_incref(&self, page: Page) {
        self.initialized(|allocator| allocator.page_incref(page));
    }

    /// See [`PageAllocator::page_decref`].
    pub fn page_decref(&self, page: Page) {
        self.initialized(|allocator| allocator.page_decref(page));
    }

    /// See [`PageAllocator::page_unref`].
    pub fn page_unref(&self, page: PageRef) {
        self.initialized(|allocator| allocator.page_unref(page));
    }

    /// Takes a snapshot of the free lists, if initialized.
    pub fn stats(&self) -> Option<BuddyStats> {
        self.with(|allocator| allocator.stats()).ok()
    }

    /// Releasing a page implies one was allocated, so an empty allocator here is a bug.
    fn initialized<R>(&self, f: impl FnOnce(&mut PageAllocator) -> R) -> R {
        match self.with(f) {
            Ok(result) => result,
            Err(_) => panic!("page allocator used before initialization"),
        }
    }
}

impl Default for LockedPageAllocator {
    fn default() -> Self {
        Self::new()
    }
}
