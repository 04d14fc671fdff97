//! The reader's end-of-tick engine plus the reader half of open/close.

use std::time::Instant;

use swmr_index::{diff_sorted, PageChange, ShadowIndex};
use swmr_sched::{self, Entry, FileId, Role};
use swmr_wire::{check_twin_tick, IndexBlock};

use crate::collab::{FileDriver, MetadataCache, PageBuffer};
use crate::config::SwmrConfig;
use crate::error::Result;

/// What a reader's EOT poll actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EotOutcome {
    /// The header tick had not advanced, or the read was torn; nothing changed.
    NoChange,
    /// The reader adopted a new tick and reconciled its cache against it.
    Advanced { tick: u64 },
}

/// A single reader attached to an SWMR shadow file.
pub struct Reader<FD, PB, MC> {
    file_id: FileId,
    driver: FD,
    page_buffer: PB,
    metadata_cache: Option<MC>,
    config: SwmrConfig,
    index: ShadowIndex,
    tick: u64,
}

impl<FD, PB, MC> Reader<FD, PB, MC>
where
    FD: FileDriver,
    PB: PageBuffer,
    MC: MetadataCache,
{
    /// Open as a reader: allocate an empty index buffer, ask the shadow-file
    /// driver for the current tick and initial index, seed local state, and
    /// join the scheduler.
    pub fn open(
        file_id: FileId,
        config: SwmrConfig,
        mut driver: FD,
        page_buffer: PB,
        metadata_cache: Option<MC>,
    ) -> Result<Self> {
        config.validate()?;

        let mut index = ShadowIndex::with_capacity(0);
        let mut tick = 0;

        // A torn read here is non-fatal: leave the index empty and tick at
        // 0, which the first `eot` poll will resolve.
        if let Some((header, Some(block))) = driver.get_tick_and_index(false)? {
            if check_twin_tick(&header, &block).is_ok() {
                let capacity = u32::try_from(block.entries.len()).unwrap_or(u32::MAX);
                index.replace_with(block.entries, capacity);
                tick = header.tick;
            }
        }

        let reader = Reader {
            file_id,
            driver,
            page_buffer,
            metadata_cache,
            config,
            index,
            tick,
        };

        let deadline = Instant::now() + reader.config.tick_len();
        swmr_sched::insert(Entry { file: file_id, role: Role::Reader, tick, end_of_tick: deadline });

        Ok(reader)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn index(&self) -> &ShadowIndex {
        &self.index
    }

    /// Run one reader EOT poll.
    pub fn eot(&mut self) -> Result<EotOutcome> {
        // 1. Poll for the current header tick only, cheaply.
        let Some((header, _)) = self.driver.get_tick_and_index(true)? else {
            return Ok(EotOutcome::NoChange);
        };
        if header.tick == self.tick {
            return Ok(EotOutcome::NoChange);
        }

        // Load the full new index and validate the twin-tick check. A torn
        // read (bad checksum, or header/index tick mismatch) is non-fatal:
        // abandon this tick and retry on the next poll.
        let Some((header, Some(block))) = self.driver.get_tick_and_index(false)? else {
            return Ok(EotOutcome::NoChange);
        };
        if check_twin_tick(&header, &block).is_err() {
            return Ok(EotOutcome::NoChange);
        }

        self.reconcile(block);

        let deadline = Instant::now() + self.config.tick_len();
        swmr_sched::reinsert(self.file_id, Role::Reader, self.tick, deadline);

        tracing::debug!(file = self.file_id, tick = self.tick, entries = self.index.len(), "reader advanced");
        Ok(EotOutcome::Advanced { tick: self.tick })
    }

    /// Diff old vs. new, swap the index in, then evict before refreshing.
    fn reconcile(&mut self, new: IndexBlock) {
        let old_entries = self.index.entries().to_vec();
        let changes = diff_sorted(&old_entries, &new.entries);

        let new_tick = new.tick;
        let new_capacity = u32::try_from(new.entries.len()).unwrap_or(u32::MAX);

        // Swap in the new index first (no copy — old entries were already
        // captured above for the diff).
        self.index.replace_with(new.entries, new_capacity);

        // Page-buffer eviction for every changed page, strictly before any
        // metadata-cache refresh of the same page: a refresh that races an
        // eviction could repopulate the cache from a stale image.
        for change in &changes {
            match change {
                PageChange::Updated(page) | PageChange::Removed(page) => {
                    self.page_buffer.remove_entry(u64::from(*page) * u64::from(self.config.page_size));
                }
                PageChange::Added(_) => {}
            }
        }

        if let Some(cache) = self.metadata_cache.as_mut() {
            for change in &changes {
                match change {
                    PageChange::Updated(page) | PageChange::Removed(page) => {
                        cache.evict_or_refresh_all_entries_in_page(*page, new_tick);
                    }
                    PageChange::Added(_) => {}
                }
            }
        }

        self.tick = new_tick;
        self.page_buffer.set_tick(new_tick);
    }

    /// Teardown: simply leave the scheduler; a reader owns no shadow-file
    /// storage and performs no other cleanup.
    pub fn close(self) {
        tracing::debug!(file = self.file_id, tick = self.tick, "reader closed");
        swmr_sched::remove(self.file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{EntryPtr, TickListReport};
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;
    use swmr_wire::IndexRecord;

    type EventLog = Rc<RefCell<Vec<String>>>;

    struct NullDriver;
    impl FileDriver for NullDriver {
        fn truncate(&mut self, _closing: bool) -> std::io::Result<()> {
            unreachable!("reconcile never touches the driver")
        }
        fn reserve_shadow_space(&mut self, _bytes: u64) -> std::io::Result<()> {
            unreachable!()
        }
        fn get_tick_and_index(
            &mut self,
            _want_header_only: bool,
        ) -> std::io::Result<Option<(swmr_wire::Header, Option<IndexBlock>)>> {
            unreachable!()
        }
        fn write_index(&mut self, _offset: u64, _bytes: &[u8]) -> std::io::Result<()> {
            unreachable!()
        }
        fn write_header(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
            unreachable!()
        }
        fn write_page_image(&mut self, _addr: u64, _bytes: &[u8]) -> std::io::Result<()> {
            unreachable!()
        }
        fn read_page_image(&mut self, _addr: u64, _len: u32) -> std::io::Result<Vec<u8>> {
            unreachable!()
        }
    }

    struct OrderPageBuffer(EventLog);
    impl PageBuffer for OrderPageBuffer {
        fn set_tick(&mut self, _tick: u64) {}
        fn flush_raw_data(&mut self) {}
        fn update_index(&mut self, _index: &ShadowIndex, _tick: u64) -> TickListReport {
            TickListReport::default()
        }
        fn read_image(&self, _ptr: EntryPtr) -> &[u8] {
            &[]
        }
        fn release_tick_list(&mut self) {}
        fn release_delayed_writes(&mut self, _tick: u64) {}
        fn remove_entry(&mut self, addr: u64) {
            self.0.borrow_mut().push(format!("evict:{addr}"));
        }
        fn dwl_len(&self) -> usize {
            0
        }
    }

    struct OrderMetadataCache(EventLog);
    impl MetadataCache for OrderMetadataCache {
        fn flush(&mut self, _pages: &mut dyn PageBuffer) {}
        fn evict_or_refresh_all_entries_in_page(&mut self, page: u32, _tick: u64) {
            self.0.borrow_mut().push(format!("refresh:{page}"));
        }
    }

    fn rec(page: u32, shadow_page: u32) -> IndexRecord {
        IndexRecord { page, shadow_page, length: 64, checksum: 0 }
    }

    fn test_config() -> SwmrConfig {
        SwmrConfig {
            md_file_path: PathBuf::from("/dev/null"),
            tick_len_tenths: 1,
            max_lag: 3,
            md_pages_reserved: 2,
            writer: false,
            flush_raw_data: false,
            page_size: 64,
        }
    }

    #[test]
    fn evicts_before_refreshing_every_changed_page() {
        let log: EventLog = Rc::new(RefCell::new(Vec::new()));

        let mut index = ShadowIndex::with_capacity(4);
        index.upsert(rec(3, 7));
        index.upsert(rec(4, 8));

        let mut reader = Reader {
            file_id: 1,
            driver: NullDriver,
            page_buffer: OrderPageBuffer(log.clone()),
            metadata_cache: Some(OrderMetadataCache(log.clone())),
            config: test_config(),
            index,
            tick: 8,
        };

        let new = IndexBlock { tick: 10, entries: vec![rec(3, 9), rec(5, 11)] };
        reader.reconcile(new);

        assert_eq!(reader.tick(), 10);
        let events = log.borrow();
        assert_eq!(*events, vec!["evict:192", "evict:256", "refresh:3", "refresh:4"]);
    }
}
