//! Read counting for CRISPR guide libraries.
//!
//! Reads are collapsed to unique sequences, aligned in parallel chunks against the distinct guide
//! sequences, reduced to one verdict per sequence and then assigned to guides. Dual-guide reads
//! are paired back up and classified before counting.

pub mod aligner;
pub mod collate;
pub mod config;
pub mod counts;
pub mod dispatch;
pub mod error;
pub mod library;
pub mod logging;
pub mod merge;
pub mod pairing;
pub mod reads;
pub mod single;
pub mod spill;
pub mod stats;
pub mod targets;

pub use error::TallyError;
