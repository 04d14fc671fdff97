//! Minimal concrete implementations of the four external collaborators,
//! enough to exercise the engines in tests and the reference binary. None of
//! these are production-grade: a real page buffer, metadata cache,
//! free-space manager, and file driver are each substantial systems of their
//! own and out of scope here.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

use swmr_index::ShadowIndex;
use swmr_wire::{Header, IndexBlock};

use crate::collab::{DirtyPage, EntryPtr, FileDriver, MetadataCache, PageBuffer, ShadowAllocator, TickListReport};

/// An in-memory page buffer: a tick-list of freshly dirtied pages plus a
/// deadline map of pages whose shadow location is protected against a
/// further rewrite until `until`.
#[derive(Debug, Default)]
pub struct MemoryPageBuffer {
    tick: u64,
    dirty: HashMap<u32, Vec<u8>>,
    protected: HashMap<u32, u64>,
}

impl MemoryPageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the application writing `image` to `page` this tick. The
    /// write always lands in the tick list and is reconciled into the index
    /// on the next EOT; `until`, whatever
    /// [`crate::writer::Writer::check_delayed_write`] returned for this
    /// page, only gates a *further* write to the same page, which is why it
    /// is recorded here rather than used to decide whether this write lands
    /// at all.
    pub fn write_page(&mut self, page: u32, image: Vec<u8>, until: u64) {
        self.dirty.insert(page, image);
        if until == 0 {
            self.protected.remove(&page);
        } else {
            self.protected.insert(page, until);
        }
    }
}

impl PageBuffer for MemoryPageBuffer {
    fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    fn flush_raw_data(&mut self) {}

    fn update_index(&mut self, index: &ShadowIndex, _tick: u64) -> TickListReport {
        let mut report = TickListReport::default();
        for (&page, image) in &self.dirty {
            if index.get(page).is_some() {
                report.modified += 1;
            } else {
                report.added += 1;
            }
            report.dirty.push(DirtyPage { page, entry_ptr: EntryPtr::from(page), length: image.len() as u32 });
        }
        report
    }

    fn read_image(&self, ptr: EntryPtr) -> &[u8] {
        let page = u32::try_from(ptr).expect("entry_ptr is a page number in this testkit");
        self.dirty.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    fn release_tick_list(&mut self) {
        self.dirty.clear();
    }

    fn release_delayed_writes(&mut self, tick: u64) {
        self.protected.retain(|_, &mut until| until > tick);
    }

    fn remove_entry(&mut self, _addr: u64) {}

    fn dwl_len(&self) -> usize {
        self.protected.len()
    }
}

/// A metadata cache that just records what it was asked to refresh, useful
/// for asserting reconciliation order in tests.
#[derive(Debug, Default)]
pub struct RecordingMetadataCache {
    pub refreshed: Vec<(u32, u64)>,
}

impl RecordingMetadataCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataCache for RecordingMetadataCache {
    fn flush(&mut self, _pages: &mut dyn PageBuffer) {}

    fn evict_or_refresh_all_entries_in_page(&mut self, page: u32, tick: u64) {
        self.refreshed.push((page, tick));
    }
}

/// A bump allocator over page-aligned shadow-file regions, with an exact-fit
/// free list. Good enough to exercise allocation and reclamation without a
/// real free-space manager.
#[derive(Debug)]
pub struct BumpAllocator {
    page_size: u32,
    next: u64,
    freed: Vec<(u64, u32)>,
}

impl BumpAllocator {
    pub fn new(page_size: u32) -> Self {
        BumpAllocator { page_size, next: 0, freed: Vec::new() }
    }
}

impl ShadowAllocator for BumpAllocator {
    fn alloc(&mut self, size: u32) -> std::io::Result<u64> {
        if let Some(pos) = self.freed.iter().position(|&(_, len)| len >= size) {
            let (addr, _) = self.freed.remove(pos);
            return Ok(addr);
        }

        let pages = (u64::from(size) + u64::from(self.page_size) - 1) / u64::from(self.page_size);
        let addr = self.next;
        self.next += pages * u64::from(self.page_size);
        Ok(addr)
    }

    fn free(&mut self, addr: u64, size: u32) {
        self.freed.push((addr, size));
    }

    fn close(&mut self) {
        self.freed.clear();
    }
}

/// A `File`-backed shadow-file driver using positioned reads/writes
/// (`pread`/`pwrite` via [`FileExt`]) so concurrent readers never race a
/// `seek`.
pub struct FileBackedDriver {
    primary: std::fs::File,
    shadow: std::fs::File,
}

impl FileBackedDriver {
    /// Open (creating if needed) the primary/shadow file pair. Sizing the
    /// shadow file to `md_pages_reserved * page_size` is the writer's job
    /// alone, done once via [`FileDriver::reserve_shadow_space`] — a reader
    /// must never resize the file out from under the writer.
    pub fn create(primary_path: &Path, shadow_path: &Path) -> std::io::Result<Self> {
        let primary = OpenOptions::new().read(true).write(true).create(true).open(primary_path)?;
        let shadow = OpenOptions::new().read(true).write(true).create(true).open(shadow_path)?;
        Ok(FileBackedDriver { primary, shadow })
    }
}

impl FileDriver for FileBackedDriver {
    fn truncate(&mut self, closing: bool) -> std::io::Result<()> {
        if closing {
            return Ok(());
        }
        let len = self.primary.metadata()?.len();
        self.primary.set_len(len)
    }

    fn reserve_shadow_space(&mut self, bytes: u64) -> std::io::Result<()> {
        self.shadow.set_len(bytes)
    }

    fn get_tick_and_index(
        &mut self,
        want_header_only: bool,
    ) -> std::io::Result<Option<(Header, Option<IndexBlock>)>> {
        // The header-only poll is the reader's hot path (once per tick per
        // open file); an mmap avoids a syscall per poll beyond the initial
        // page-in.
        if want_header_only {
            if self.shadow.metadata()?.len() < swmr_wire::HEADER_SIZE as u64 {
                return Ok(None);
            }
            let mmap = unsafe { memmap2::Mmap::map(&self.shadow)? };
            return Ok(Header::decode(&mmap[..swmr_wire::HEADER_SIZE]).ok().map(|h| (h, None)));
        }

        let mut header_bytes = vec![0u8; swmr_wire::HEADER_SIZE];
        let read = self.shadow.read_at(&mut header_bytes, 0)?;
        if read < swmr_wire::HEADER_SIZE {
            return Ok(None);
        }

        let header = match Header::decode(&header_bytes) {
            Ok(header) => header,
            Err(_) => return Ok(None),
        };

        let mut index_bytes = vec![0u8; header.index_length as usize];
        self.shadow.read_at(&mut index_bytes, header.index_offset)?;
        match IndexBlock::decode(&index_bytes) {
            Ok(block) => Ok(Some((header, Some(block)))),
            Err(_) => Ok(Some((header, None))),
        }
    }

    fn write_index(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        self.shadow.write_at(bytes, offset)
    }

    fn write_header(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.shadow.write_at(bytes, 0)
    }

    fn write_page_image(&mut self, addr: u64, bytes: &[u8]) -> std::io::Result<()> {
        self.shadow.write_at(bytes, addr)
    }

    fn read_page_image(&mut self, addr: u64, len: u32) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.shadow.read_at(&mut buf, addr)?;
        Ok(buf)
    }
}
