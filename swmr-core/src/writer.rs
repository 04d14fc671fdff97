//! The writer's end-of-tick engine plus the writer half of open/close.

use std::collections::HashMap;
use std::time::Instant;

use swmr_index::{ReclaimQueue, ShadowIndex};
use swmr_sched::{self, Entry, FileId, Role};
use swmr_wire::{Header, IndexBlock, IndexRecord};

use crate::collab::{FileDriver, MetadataCache, PageBuffer, ShadowAllocator};
use crate::config::SwmrConfig;
use crate::error::{Result, SwmrError};
use crate::oracle;

/// The single writer of an SWMR shadow file.
///
/// Generic over its four external collaborators: a shadow [`ShadowAllocator`],
/// the primary file's [`FileDriver`], the metadata [`PageBuffer`], and an
/// optional front-line [`MetadataCache`].
pub struct Writer<FD, SA, PB, MC> {
    file_id: FileId,
    driver: FD,
    allocator: SA,
    page_buffer: PB,
    metadata_cache: Option<MC>,
    config: SwmrConfig,
    index: ShadowIndex,
    delayed_flush: HashMap<u32, u64>,
    reclaim: ReclaimQueue,
    tick: u64,
    index_offset: u64,
}

impl<FD, SA, PB, MC> Writer<FD, SA, PB, MC>
where
    FD: FileDriver,
    SA: ShadowAllocator,
    PB: PageBuffer,
    MC: MetadataCache,
{
    /// Open as the writer: reserve the header and initial index pages,
    /// publish an empty index at tick 1, and join the process-wide
    /// scheduler.
    ///
    /// `existing_primary` distinguishes attaching to an already-populated
    /// primary file (publish an empty index immediately so readers can
    /// attach) from a brand-new one (defer publication to the first EOT).
    pub fn open(
        file_id: FileId,
        config: SwmrConfig,
        mut driver: FD,
        mut allocator: SA,
        mut page_buffer: PB,
        metadata_cache: Option<MC>,
        existing_primary: bool,
    ) -> Result<Self> {
        config.validate()?;

        let tick = 1;
        page_buffer.set_tick(tick);

        let header_addr = allocator.alloc(config.page_size)?;
        if header_addr != 0 {
            return Err(SwmrError::Consistency(
                "shadow allocator must hand out the header as shadow page 0".into(),
            ));
        }
        let index_addr = allocator.alloc(config.page_size)?;
        if index_addr != u64::from(config.page_size) {
            return Err(SwmrError::Consistency(
                "shadow allocator must hand out the initial index as shadow page 1".into(),
            ));
        }

        driver.reserve_shadow_space(u64::from(config.md_pages_reserved) * u64::from(config.page_size))?;

        let mut writer = Writer {
            file_id,
            driver,
            allocator,
            page_buffer,
            metadata_cache,
            config,
            index: ShadowIndex::with_capacity(0),
            delayed_flush: HashMap::new(),
            reclaim: ReclaimQueue::new(),
            tick,
            index_offset: index_addr,
        };

        if existing_primary {
            writer.publish(&[])?;
        }

        let deadline = Instant::now() + writer.config.tick_len();
        swmr_sched::insert(Entry { file: file_id, role: Role::Writer, tick, end_of_tick: deadline });

        tracing::debug!(file = file_id, tick, "writer opened");
        Ok(writer)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn index(&self) -> &ShadowIndex {
        &self.index
    }

    /// Direct access to the page buffer, for whatever out-of-scope write
    /// path (public API, test harness) actually dirties pages.
    pub fn page_buffer_mut(&mut self) -> &mut PB {
        &mut self.page_buffer
    }

    fn publish(&mut self, entries: &[IndexRecord]) -> Result<()> {
        let block = IndexBlock { tick: self.tick, entries: entries.to_vec() };
        let bytes = block.encode();
        self.driver.write_index(self.index_offset, &bytes)?;

        let header = Header {
            page_size: self.config.page_size,
            tick: self.tick,
            index_offset: self.index_offset,
            index_length: bytes.len() as u64,
        };
        self.driver.write_header(&header.encode())?;
        Ok(())
    }

    /// Consult the delayed-write oracle for `page`, updating the writer-side
    /// deadline bookkeeping to match the decision.
    pub fn check_delayed_write(&mut self, page: u32) -> Result<u64> {
        let until = oracle::until_for_write(&self.index, &self.delayed_flush, self.tick, self.config.max_lag, page)?;
        if until == 0 {
            self.delayed_flush.remove(&page);
        } else {
            self.delayed_flush.insert(page, until);
        }
        Ok(until)
    }

    fn grow_index_once(&mut self) -> Result<()> {
        let new_capacity = self.index.doubled_capacity();
        let new_size = IndexBlock::encoded_len(new_capacity as usize) as u32;
        let new_addr = self.allocator.alloc(new_size)?;
        if new_addr % u64::from(self.config.page_size) != 0 {
            return Err(SwmrError::Consistency(
                "shadow allocator returned a non-page-aligned index region".into(),
            ));
        }

        let old_offset = self.index_offset;
        let old_len = IndexBlock::encoded_len(self.index.capacity() as usize) as u32;

        self.index.grow_to(new_capacity);
        self.index_offset = new_addr;

        // Reclaim the OLD region on doubling, not the freshly allocated one:
        // the new region is what readers will see once published.
        self.reclaim.defer(old_offset, old_len, self.tick);
        Ok(())
    }

    fn ensure_index_capacity(&mut self, additional: usize) -> Result<()> {
        while (self.index.len() + additional) as u32 > self.index.capacity() {
            self.grow_index_once()?;
        }
        Ok(())
    }

    /// Run one end-of-tick cycle: flush caches, truncate, reconcile dirty
    /// pages into the shadow index and file, publish, then release and
    /// reclaim.
    pub fn eot(&mut self) -> Result<()> {
        // Flush raw-data caches / release file-space aggregators.
        if self.config.flush_raw_data {
            self.page_buffer.flush_raw_data();
        }

        // Flush the metadata cache into the page buffer, if present.
        if let Some(cache) = self.metadata_cache.as_mut() {
            cache.flush(&mut self.page_buffer);
        }

        // Truncate the underlying file driver to its current logical size.
        self.driver.truncate(false)?;

        // Reconcile the page buffer's tick list against the index.
        let mut report = self.page_buffer.update_index(&self.index, self.tick);
        report.dirty.sort_by_key(|d| d.page);

        // Apply every dirty page to the shadow index and file.
        let additions = report.dirty.iter().filter(|d| self.index.get(d.page).is_none()).count();
        self.ensure_index_capacity(additions)?;

        for dirty in &report.dirty {
            if let Some(previous) = self.index.get(dirty.page).copied() {
                self.reclaim.defer(
                    u64::from(previous.shadow_page) * u64::from(self.config.page_size),
                    previous.length,
                    self.tick,
                );
            }

            let addr = self.allocator.alloc(dirty.length)?;
            if addr % u64::from(self.config.page_size) != 0 {
                return Err(SwmrError::Consistency(
                    "shadow allocator returned a non-page-aligned page region".into(),
                ));
            }

            let image = self.page_buffer.read_image(dirty.entry_ptr).to_vec();
            let checksum = crc32fast::hash(&image);
            let shadow_page = addr / u64::from(self.config.page_size);
            let shadow_page = u32::try_from(shadow_page)
                .map_err(|_| SwmrError::ResourceExhaustion("shadow page number exceeds u32".into()))?;

            self.index.upsert(IndexRecord {
                page: dirty.page,
                shadow_page,
                length: dirty.length,
                checksum,
            });
            self.driver.write_page_image(addr, &image)?;
        }

        if !self.index.is_strictly_ascending() {
            return Err(SwmrError::Consistency("shadow index lost sort order during EOT".into()));
        }

        // Publish: index first, header second. A reader that sees the new
        // header always finds an index at least as fresh.
        let entries = self.index.entries().to_vec();
        self.publish(&entries)?;

        // Release this tick's tick-list bookkeeping.
        self.page_buffer.release_tick_list();

        // Release any page-buffer delayed writes whose deadline passed.
        self.page_buffer.release_delayed_writes(self.tick);

        // Run the reclamation walk now that the new index/header are durable.
        let mut released_count = 0u32;
        for released in self.reclaim.release_due(self.tick, self.config.max_lag) {
            self.allocator.free(released.shadow_offset, released.length);
            released_count += 1;
        }

        tracing::debug!(
            file = self.file_id,
            tick = self.tick,
            dirty = report.dirty.len(),
            released = released_count,
            entries = self.index.len(),
            "writer EOT complete"
        );

        // Advance the tick and reschedule.
        self.tick += 1;
        self.page_buffer.set_tick(self.tick);
        let deadline = Instant::now() + self.config.tick_len();
        swmr_sched::reinsert(self.file_id, Role::Writer, self.tick, deadline);

        Ok(())
    }

    /// Drain the page buffer: run one EOT to clear the tick list, then
    /// repeatedly wait a tick and run another EOT until no delayed writes
    /// remain.
    pub fn flush(&mut self) -> Result<()> {
        self.eot()?;
        while self.page_buffer.dwl_len() > 0 {
            std::thread::sleep(self.config.tick_len());
            self.eot()?;
        }
        Ok(())
    }

    /// Teardown: drain pending writes, publish an empty index and header,
    /// advance the tick one final time, then truncate the shadow file and
    /// release the scheduler slot and the allocator.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;

        self.publish(&[])?;
        self.tick += 1;

        self.driver.truncate(true)?;
        for released in self.reclaim.drain() {
            self.allocator.free(released.shadow_offset, released.length);
        }
        self.allocator.close();
        swmr_sched::remove(self.file_id);
        tracing::debug!(file = self.file_id, tick = self.tick, "writer closed");
        Ok(())
    }
}
