//! `ext-dedup` removes duplicate lines from text files that do not fit into memory.
//!
//! The input is read in bounded batches. Every batch is collapsed to its distinct records, sorted and stored
//! on disk as a sorted run. The runs are then merged with a k-way merge that emits every distinct record
//! exactly once, so the output is sorted and duplicate-free while memory use stays bounded by the batch
//! size and the number of runs. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Records:**
//!   a record is one input line with the line terminator and leading/trailing whitespace stripped.
//!   Records are compared byte-wise, which for UTF-8 is code point order.
//! * **Permissive decoding:**
//!   malformed input bytes are substituted rather than rejected, see [`Decoding`].
//! * **Run format agnostic:**
//!   runs are stored as newline terminated text by default, MessagePack runs ([`RmpRun`]) are supported as
//!   well, and custom formats can be plugged in by implementing [`ExternalRun`].
//! * **Multithreading support:**
//!   batch data is sorted in multiple threads.
//! * **Cleanup:**
//!   runs are removed as soon as they are merged and on every failure path; the output is published
//!   atomically.
//!
//! # Example
//!
//! ```no_run
//! use std::path;
//!
//! use ext_dedup::{ExternalDeduplicator, ExternalDeduplicatorBuilder};
//!
//! fn main() {
//!     let deduplicator: ExternalDeduplicator = ExternalDeduplicatorBuilder::new()
//!         .with_tmp_dir(path::Path::new("./tmp"))
//!         .with_batch_size(100_000)
//!         .build()
//!         .unwrap();
//!
//!     let stats = deduplicator
//!         .dedup(path::Path::new("input.txt"), path::Path::new("output.txt"))
//!         .unwrap();
//!     println!("{} distinct lines", stats.unique_lines);
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod dedup;
pub mod merger;
pub mod run;
pub mod source;

pub use buffer::{ChunkBuffer, ChunkBufferBuilder, LimitedBuffer, LimitedBufferBuilder};
pub use chunk::ChunkProcessor;
pub use dedup::{DedupError, DedupStats, ExternalDeduplicator, ExternalDeduplicatorBuilder};
pub use merger::{merge_runs, DedupMerger, MergeError, MergeStats};
pub use run::{ExternalRun, RmpRun, Run, RunError, TextRun};
pub use source::{Batches, Decoding, LineSource};

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
