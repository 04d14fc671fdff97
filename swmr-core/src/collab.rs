//! The four external collaborators a host application supplies around this
//! crate's coordination core. Production-grade implementations of these (the
//! real page buffer, metadata cache, free-space manager, and primary-file
//! driver) are out of scope here; this crate defines the interfaces the
//! engines in [`crate::writer`] and [`crate::reader`] are generic over, plus
//! one minimal concrete implementation of each in [`crate::testkit`] for its
//! own tests and the reference binary.

use swmr_index::ShadowIndex;
use swmr_wire::{Header, IndexBlock};

/// Opaque handle into the page buffer's storage for an unflushed page image.
/// The writer engine never interprets this itself; it only passes it back to
/// [`PageBuffer::read_image`].
pub type EntryPtr = u64;

/// One page the tick list reports as dirty, ready for the per-EOT update loop.
#[derive(Debug, Clone, Copy)]
pub struct DirtyPage {
    pub page: u32,
    pub entry_ptr: EntryPtr,
    pub length: u32,
}

/// Counts and payload returned by reconciling the page buffer's tick list
/// against the current index.
#[derive(Debug, Clone, Default)]
pub struct TickListReport {
    /// Pages with a non-null `entry_ptr`: new or modified since the last EOT.
    pub dirty: Vec<DirtyPage>,
    pub added: usize,
    pub modified: usize,
    pub not_in_tick_list: usize,
    pub not_in_tick_list_flushed: usize,
}

/// The in-memory holding area for not-yet-flushed metadata page images.
pub trait PageBuffer {
    /// Record the tick that will be assigned to anything written from now on.
    fn set_tick(&mut self, tick: u64);

    /// Flush the primary file's raw-data caches, if any are held here.
    fn flush_raw_data(&mut self);

    /// Reconcile this buffer's tick list against `index`, returning the
    /// dirty pages and bookkeeping counts for this EOT.
    fn update_index(&mut self, index: &ShadowIndex, tick: u64) -> TickListReport;

    /// Read back the unflushed image behind a [`DirtyPage::entry_ptr`].
    fn read_image(&self, ptr: EntryPtr) -> &[u8];

    /// Drop this tick's tick-list bookkeeping after it has been applied.
    fn release_tick_list(&mut self);

    /// Drop any per-page deadline bookkeeping whose protection window has
    /// now passed. A write itself is never gated on this: it's whatever a
    /// rewrite of the same page before the deadline would be gated on.
    fn release_delayed_writes(&mut self, tick: u64);

    /// Drop any cached state for a page at shadow-file address `addr`
    /// (invoked when that range is reclaimed).
    fn remove_entry(&mut self, addr: u64);

    /// Number of pages still under an open delayed-write protection window.
    fn dwl_len(&self) -> usize;
}

/// The metadata cache sitting in front of the page buffer.
pub trait MetadataCache {
    /// Flush every dirty cached entry into the page buffer, early in EOT.
    fn flush(&mut self, pages: &mut dyn PageBuffer);

    /// Evict or refresh every cache entry backed by shadow page `page`,
    /// following a reader's reconciliation diff.
    fn evict_or_refresh_all_entries_in_page(&mut self, page: u32, tick: u64);
}

/// Allocates and frees ranges of the shadow file.
pub trait ShadowAllocator {
    /// Allocate `size` bytes, returning a page-aligned shadow-file offset.
    fn alloc(&mut self, size: u32) -> std::io::Result<u64>;

    /// Release a previously allocated range back to the free-space pool.
    fn free(&mut self, addr: u64, size: u32);

    /// Release any resources held for the file this allocator serves.
    fn close(&mut self);
}

/// The primary file's low-level driver, which also owns the raw shadow-file
/// I/O primitives (header/index/page-image read and write, and primary-file
/// truncation) that this crate's invariants are built on top of.
pub trait FileDriver {
    /// Truncate the primary file to its current logical size. `closing` is
    /// set during teardown, where some drivers skip work they'd otherwise do.
    fn truncate(&mut self, closing: bool) -> std::io::Result<()>;

    /// Size the shadow file to exactly `bytes`, called once at writer open
    /// to establish `md_pages_reserved * page_size`.
    fn reserve_shadow_space(&mut self, bytes: u64) -> std::io::Result<()>;

    /// Read the shadow file's header and, unless `want_header_only`, its
    /// index block too. Returns `None` if the shadow file does not exist yet
    /// (a fresh writer-opened file with no primary ever attached).
    fn get_tick_and_index(
        &mut self,
        want_header_only: bool,
    ) -> std::io::Result<Option<(Header, Option<IndexBlock>)>>;

    fn write_index(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()>;
    fn write_header(&mut self, bytes: &[u8]) -> std::io::Result<()>;
    fn write_page_image(&mut self, addr: u64, bytes: &[u8]) -> std::io::Result<()>;
    fn read_page_image(&mut self, addr: u64, len: u32) -> std::io::Result<Vec<u8>>;
}
