//! The direct-extraction pipeline.
//!
//! Four phases, each with a single failure mode: parse headers (abort on
//! encryption), build the page corpus, resolve the target table through
//! the reconstructed catalog, then stream decoded rows into the caller's
//! callback or a [`sink::RowSink`].

pub mod hints;
pub mod memory;
pub mod sink;

mod extractor;

pub use extractor::{
    probe_headers, DirectExtractor, ExtractOptions, ExtractReport, Progress, ProgressFn, RowFn,
    TableInfo,
};
