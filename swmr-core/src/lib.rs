//! Single-writer/multiple-reader coordination core for a paged,
//! content-addressed shadow file: the writer and reader end-of-tick engines,
//! the delayed-write oracle, and init/teardown built on top of
//! `swmr-wire`'s codec and `swmr-index`'s in-memory structures.

pub mod collab;
pub mod config;
pub mod error;
pub mod oracle;
pub mod reader;
pub mod testkit;
pub mod writer;

pub use collab::{DirtyPage, EntryPtr, FileDriver, MetadataCache, PageBuffer, ShadowAllocator, TickListReport};
pub use config::SwmrConfig;
pub use error::{Result, SwmrError};
pub use reader::{EotOutcome as ReaderOutcome, Reader};
pub use writer::Writer;
