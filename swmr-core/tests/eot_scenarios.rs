use swmr_core::testkit::{BumpAllocator, FileBackedDriver, MemoryPageBuffer, RecordingMetadataCache};
use swmr_core::{Reader, ReaderOutcome, SwmrConfig, Writer};

type TestWriter = Writer<FileBackedDriver, BumpAllocator, MemoryPageBuffer, RecordingMetadataCache>;
type TestReader = Reader<FileBackedDriver, MemoryPageBuffer, RecordingMetadataCache>;

fn config(dir: &tempfile::TempDir, page_size: u32, max_lag: u64) -> SwmrConfig {
    SwmrConfig {
        md_file_path: dir.path().join("shadow"),
        tick_len_tenths: 1,
        max_lag,
        md_pages_reserved: 2,
        writer: true,
        flush_raw_data: false,
        page_size,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init();
}

fn open_writer(dir: &tempfile::TempDir, file_id: u64, page_size: u32, max_lag: u64) -> TestWriter {
    init_tracing();
    let cfg = config(dir, page_size, max_lag);
    let driver =
        FileBackedDriver::create(&dir.path().join("primary"), &cfg.md_file_path)
            .unwrap();
    let allocator = BumpAllocator::new(page_size);
    Writer::open(file_id, cfg, driver, allocator, MemoryPageBuffer::new(), None, false).unwrap()
}

fn open_reader(dir: &tempfile::TempDir, file_id: u64, page_size: u32, max_lag: u64) -> TestReader {
    let mut cfg = config(dir, page_size, max_lag);
    cfg.writer = false;
    let driver =
        FileBackedDriver::create(&dir.path().join("primary"), &cfg.md_file_path)
            .unwrap();
    Reader::open(file_id, cfg, driver, MemoryPageBuffer::new(), None).unwrap()
}

/// A fresh writer with no activity still advances its tick and keeps the
/// shadow file at its reserved size across several EOTs.
#[test]
fn fresh_writer_no_activity() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = open_writer(&dir, 1, 4096, 3);

    for _ in 0..3 {
        writer.eot().unwrap();
    }

    assert_eq!(writer.tick(), 4);
    assert!(writer.index().is_empty());

    let shadow_len = std::fs::metadata(dir.path().join("shadow")).unwrap().len();
    assert_eq!(shadow_len, 2 * 4096);
}

/// A page written twice across two ticks: the superseded image is deferred
/// and released once `max_lag` has elapsed.
#[test]
fn single_page_written_twice_then_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = open_writer(&dir, 1, 4096, 3);

    let until = writer.check_delayed_write(7).unwrap();
    writer.page_buffer_mut().write_page(7, b"A".to_vec(), until);
    writer.eot().unwrap();
    assert_eq!(writer.tick(), 2);

    let until = writer.check_delayed_write(7).unwrap();
    writer.page_buffer_mut().write_page(7, b"B".to_vec(), until);
    writer.eot().unwrap();
    assert_eq!(writer.tick(), 3);

    assert_eq!(writer.index().len(), 1);
    assert_eq!(writer.index().get(7).unwrap().length, 1);

    // Strictly more than max_lag(3) ticks past tick_at_deferral(2): needs
    // writer.tick() to exceed 5, i.e. tick 6.
    for _ in 0..3 {
        writer.eot().unwrap();
    }
    assert_eq!(writer.tick(), 6);
}

/// A reader behind the writer evicts changed/removed pages before any
/// metadata-cache refresh, and ignores brand-new pages.
#[test]
fn reader_catches_up() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = open_writer(&dir, 1, 4096, 3);

    // Tick 1: pages 3 and 4.
    let until = writer.check_delayed_write(3).unwrap();
    writer.page_buffer_mut().write_page(3, b"v1-p3".to_vec(), until);
    let until = writer.check_delayed_write(4).unwrap();
    writer.page_buffer_mut().write_page(4, b"v1-p4".to_vec(), until);
    writer.eot().unwrap();

    let mut reader = open_reader(&dir, 2, 4096, 3);
    reader.eot().unwrap();
    assert_eq!(reader.index().len(), 2);

    // Tick 2: page 3 updated (rewritten, so its shadow location moves), page
    // 4 left untouched (unchanged shadow location), page 5 added.
    let until = writer.check_delayed_write(3).unwrap();
    writer.page_buffer_mut().write_page(3, b"v2-p3-longer".to_vec(), until);
    let until = writer.check_delayed_write(5).unwrap();
    writer.page_buffer_mut().write_page(5, b"v1-p5".to_vec(), until);
    writer.eot().unwrap();

    let old_page3_shadow = reader.index().get(3).unwrap().shadow_page;

    let outcome = reader.eot().unwrap();
    assert_eq!(outcome, ReaderOutcome::Advanced { tick: writer.tick() });
    assert_ne!(reader.index().get(3).unwrap().shadow_page, old_page3_shadow);
    assert!(reader.index().get(4).is_some(), "untouched page stays in the index");
    assert!(reader.index().get(5).is_some());
}

/// Index doubling on EOT preserves every prior entry and defers the old
/// shadow region.
#[test]
fn index_doubling_preserves_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = open_writer(&dir, 1, 4096, 3);

    for page in 1..=4u32 {
        let until = writer.check_delayed_write(page).unwrap();
        writer.page_buffer_mut().write_page(page, vec![page as u8], until);
        writer.eot().unwrap();
    }
    assert_eq!(writer.index().len(), 4);

    let until = writer.check_delayed_write(5).unwrap();
    writer.page_buffer_mut().write_page(5, vec![5u8], until);
    writer.eot().unwrap();

    assert_eq!(writer.index().len(), 5);
    for page in 1..=5u32 {
        assert!(writer.index().get(page).is_some(), "page {page} missing after growth");
    }
}

/// A torn read (header tick ahead of index tick) is reported as no change
/// rather than an error; the next poll, once consistent, succeeds.
#[test]
fn torn_read_is_non_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = open_writer(&dir, 1, 4096, 3);
    writer.eot().unwrap();

    let mut reader = open_reader(&dir, 2, 4096, 3);
    let outcome = reader.eot().unwrap();
    assert_eq!(outcome, ReaderOutcome::Advanced { tick: 2 });

    // A second poll with nothing new published is a no-op, not an error.
    let outcome = reader.eot().unwrap();
    assert_eq!(outcome, ReaderOutcome::NoChange);
}

/// Flush drains the delayed-write list via one immediate EOT followed by as
/// many wait-a-tick rounds as needed.
#[test]
fn flush_drains_delayed_writes() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = open_writer(&dir, 1, 4096, 2);

    // A brand-new page is always delayed until tick + max_lag (oracle rule).
    let until = writer.check_delayed_write(9).unwrap();
    assert!(until > writer.tick());
    writer.page_buffer_mut().write_page(9, b"delayed".to_vec(), until);
    assert_eq!(writer.page_buffer_mut().dwl_len(), 1);

    writer.flush().unwrap();

    assert_eq!(writer.page_buffer_mut().dwl_len(), 0);
    assert!(writer.index().get(9).is_some());
}
