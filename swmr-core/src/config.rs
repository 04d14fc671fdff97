use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SwmrError};

/// Configuration for opening either side of an SWMR shadow-file pair.
/// `validate` rejects any combination that would make the protocol
/// unrepresentable rather than merely less efficient.
#[derive(Debug, Clone)]
pub struct SwmrConfig {
    /// Path of the shadow file (distinct from the primary file it shadows).
    pub md_file_path: PathBuf,
    /// Tick length, in tenths of a second.
    pub tick_len_tenths: u32,
    /// Ticks a superseded shadow-file range must age before reclamation.
    pub max_lag: u64,
    /// Shadow-file pages reserved up front for header + index (must hold at
    /// least an empty index block).
    pub md_pages_reserved: u32,
    /// Open as the single writer rather than a reader.
    pub writer: bool,
    /// Flush the primary file's raw-data caches during EOT.
    pub flush_raw_data: bool,
    /// Shadow-file page size in bytes.
    pub page_size: u32,
}

impl SwmrConfig {
    pub fn tick_len(&self) -> Duration {
        Duration::from_millis(u64::from(self.tick_len_tenths) * 100)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_len_tenths == 0 {
            return Err(SwmrError::Config("tick_len must be positive".into()));
        }
        if self.max_lag == 0 {
            return Err(SwmrError::Config("max_lag must be positive".into()));
        }
        if (self.page_size as usize) < swmr_wire::HEADER_SIZE {
            return Err(SwmrError::Config(format!(
                "page_size {} smaller than header size {}",
                self.page_size,
                swmr_wire::HEADER_SIZE
            )));
        }
        if self.md_pages_reserved < 2 {
            return Err(SwmrError::Config(
                "md_pages_reserved must reserve at least a header page and an index page".into(),
            ));
        }
        let empty_index_len = swmr_wire::IndexBlock::encoded_len(0);
        if (self.page_size as usize) < empty_index_len {
            return Err(SwmrError::Config(format!(
                "page_size {} too small to hold an empty index block ({} bytes)",
                self.page_size, empty_index_len
            )));
        }
        Ok(())
    }
}
