//! Multi-threaded aggregation of `name;measurement` lines, in the spirit of the
//! One Billion Row Challenge, originally posed by Gunnar Morling for Java.
//!
//! A producer thread cuts the input into newline-aligned chunks and pushes them into a
//! bounded queue. Each worker thread parses the chunks it pulls into a private
//! fixed-capacity table; the tables are merged once all workers are done.
//!
//! ```no_run
//! use brc_pipeline::{aggregate_mapped_file, format_stations, CancelToken, Config};
//!
//! let config = Config::default();
//! let outcome = aggregate_mapped_file("measurements.txt", &config, &CancelToken::new())?;
//! println!("{}", format_stations(&outcome.stations));
//! # Ok::<(), brc_pipeline::BrcError>(())
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod format;
pub mod merge;
pub mod parse;
pub mod pipeline;
pub mod pool;
pub mod source;
pub mod station;
pub mod table;
pub mod worker;

pub use cancel::CancelToken;
pub use config::{Config, OverflowPolicy, SlotPolicy, ValueParsing};
pub use error::BrcError;
pub use format::{format_stations, write_stations};
pub use merge::{merge_tables, Stations};
pub use pipeline::{
    aggregate, aggregate_bytes, aggregate_mapped_file, aggregate_reader, Outcome, RunStats,
};
pub use station::Station;
