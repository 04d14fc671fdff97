//! The delayed-write oracle: given a page about to be written, decides
//! whether the write must be held back so a reader mid-EOT never observes a
//! page changing shadow location between its index read and its image read.

use std::collections::HashMap;

use swmr_index::ShadowIndex;

use crate::error::{Result, SwmrError};

/// Decide the deadline (if any) before which a write to `page` must not be
/// committed to the shadow file.
///
/// - Not yet in the index: `T + max_lag` (a reader that just cached "page
///   absent" must have time to notice it before the image can move).
/// - Already in the index with a still-current held-over deadline: that
///   deadline is honored unchanged.
/// - Otherwise: `0`, meaning the write may proceed this tick.
///
/// `delayed_flush` is the writer-side, not-persisted per-page deadline map,
/// modeled here as a side map rather than inline on every
/// [`swmr_wire::IndexRecord`] since it is empty for the overwhelming
/// majority of pages.
pub fn until_for_write(
    index: &ShadowIndex,
    delayed_flush: &HashMap<u32, u64>,
    tick: u64,
    max_lag: u64,
    page: u32,
) -> Result<u64> {
    let until = match index.get(page) {
        None => tick + max_lag,
        Some(_) => {
            let existing = delayed_flush.get(&page).copied().unwrap_or(0);
            if existing >= tick {
                existing
            } else {
                0
            }
        }
    };

    if until != 0 && (until < tick || until > tick + max_lag) {
        return Err(SwmrError::Consistency(format!(
            "delayed-write oracle produced out-of-range deadline {until} at tick {tick} (max_lag {max_lag})"
        )));
    }

    Ok(until)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swmr_wire::IndexRecord;

    #[test]
    fn brand_new_page_delays_to_tick_plus_max_lag() {
        let index = ShadowIndex::with_capacity(4);
        let delayed = HashMap::new();
        assert_eq!(until_for_write(&index, &delayed, 10, 3, 7).unwrap(), 13);
    }

    #[test]
    fn existing_page_with_no_deadline_proceeds_immediately() {
        let mut index = ShadowIndex::with_capacity(4);
        index.upsert(IndexRecord { page: 7, shadow_page: 1, length: 4096, checksum: 0 });
        let delayed = HashMap::new();
        assert_eq!(until_for_write(&index, &delayed, 10, 3, 7).unwrap(), 0);
    }

    #[test]
    fn existing_page_with_live_deadline_is_honored() {
        let mut index = ShadowIndex::with_capacity(4);
        index.upsert(IndexRecord { page: 7, shadow_page: 1, length: 4096, checksum: 0 });
        let mut delayed = HashMap::new();
        delayed.insert(7, 12);
        assert_eq!(until_for_write(&index, &delayed, 10, 3, 7).unwrap(), 12);
    }

    #[test]
    fn existing_page_with_expired_deadline_proceeds() {
        let mut index = ShadowIndex::with_capacity(4);
        index.upsert(IndexRecord { page: 7, shadow_page: 1, length: 4096, checksum: 0 });
        let mut delayed = HashMap::new();
        delayed.insert(7, 5);
        assert_eq!(until_for_write(&index, &delayed, 10, 3, 7).unwrap(), 0);
    }
}
