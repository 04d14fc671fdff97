//! In-memory data structures shared by the writer and reader EOT engines: the
//! growable, sorted shadow index and the deferred-reclamation queue. Neither
//! module performs I/O; both are pure data structures acted on by
//! `swmr-core`'s engines.

mod index;
mod reclaim;

pub use index::{PageChange, ShadowIndex};
pub use reclaim::{ReclaimQueue, ReclaimRecord};
pub use swmr_wire::IndexRecord;
