//! logpi - streaming inverted index over IPv4/IPv6/MAC occurrences
//!
//! logpi scans large plain-text log files for network addresses (IPv4,
//! IPv6, and MAC literals), builds an in-memory inverted index mapping each
//! canonical address to every line/field it occurred at, and emits a
//! deterministically-sorted `<source>.lpi` index file per input.
//!
//! # Architecture
//!
//! A single Reader thread chunks the input file and hands buffers to a pool
//! of Worker threads over a bounded queue. Each worker extracts addresses
//! from its lines and either appends directly to an already-indexed key's
//! own per-worker location slot, or forwards a new-key insertion to a single
//! Indexer thread over a second bounded queue. Once the input is exhausted
//! and both queues have drained, the pipeline walks the index, sorts
//! entries by descending frequency, and writes the merged per-key location
//! lists.
//!
//! ```text
//! ┌────────┐  chunks  ┌─────────────┐  new keys  ┌─────────┐
//! │ Reader │ ───────▶ │ Worker pool │ ─────────▶ │ Indexer │
//! └────────┘          └─────────────┘            └─────────┘
//!                            │                         │
//!                            ▼ (known keys, direct)    ▼
//!                      ┌──────────────────────────────────┐
//!                      │      concurrent address index     │
//!                      └──────────────────────────────────┘
//!                                       │
//!                                       ▼
//!                                  sorted `.lpi` output
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use logpi::{Config, Pipeline};
//! use std::path::Path;
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! let config = Config::builder().build();
//! let pipeline = Pipeline::new(config);
//! let mut output = std::fs::File::create("access.log.lpi")?;
//! let stats = pipeline.run_file(Path::new("access.log"), &mut output, Arc::new(AtomicBool::new(false)))?;
//! println!("indexed {} unique addresses across {} lines", stats.unique_addresses, stats.lines_processed);
//! # Ok::<(), logpi::IndexError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Immutable run configuration (chunk size, worker count, queue capacities).
pub mod config;
/// Error types for the indexing pipeline.
pub mod error;
/// Address extraction and canonicalization.
pub mod extractor;
/// Buffered/gzip-aware file opening for pipeline inputs.
pub mod file_reader;
/// The concurrent address index.
pub mod index;
/// Per-worker location storage and the emitter's merge step.
pub mod location;
/// Reader/Worker-pool/Indexer/Emitter orchestration.
pub mod pipeline;

pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{IndexError, Result};
pub use crate::extractor::{AddressKind, ExtractedAddress, Extractor, ExtractorBuilder};
pub use crate::index::{AddressEntry, AddressIndex, AddressKey};
pub use crate::location::{Location, LocationArray};
pub use crate::pipeline::{Pipeline, RunStats};

impl Config {
    /// Start building a [`Config`] from defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
