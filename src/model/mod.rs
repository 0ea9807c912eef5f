//! Data model produced by a scrape.

mod snapshot;

pub use snapshot::{Sample, ScrapeSnapshot};
