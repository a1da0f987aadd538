use std::thread;

use crate::error::BrcError;

/// Default size of one chunk, in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Largest accepted chunk size. Every pooled buffer is this big, plus one byte.
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

/// Prime, keeps the load factor low for ~10k distinct keys
pub const DEFAULT_TABLE_CAPACITY: usize = 65537;

/// How a worker's table resolves a key that lands on an occupied slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SlotPolicy {
    /// Compare the stored key and linear-probe on mismatch.
    #[default]
    Probe,
    /// Treat whatever sits in the direct slot as the key's station, without comparing keys.
    /// Only correct while distinct keys never share a slot, i.e. for inputs with a key
    /// cardinality far below the table capacity.
    FirstWriterWins,
}

/// Which fixed-point parser the workers use on the measurement field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ValueParsing {
    /// Reject anything but `-?\d+\.\d`, and values outside the i16 range.
    #[default]
    Validated,
    /// No shape checks, arithmetic wraps on overflow.
    Unchecked,
}

/// What a worker does with a well-formed value that doesn't fit in 16 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    #[default]
    Fail,
    /// Drop the record and count it in [crate::RunStats::skipped]
    Skip,
}

#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of parsing threads
    pub workers: usize,
    /// Size of the buffers chunks are read into, and the upper bound on a chunk's length
    pub chunk_size: usize,
    /// Chunks that may wait in the queue before the producer blocks
    pub queue_capacity: usize,
    /// Slots in each worker's aggregate table
    pub table_capacity: usize,
    pub slot_policy: SlotPolicy,
    pub value_parsing: ValueParsing,
    pub overflow: OverflowPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let workers = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            workers,
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: workers,
            table_capacity: DEFAULT_TABLE_CAPACITY,
            slot_policy: SlotPolicy::default(),
            value_parsing: ValueParsing::default(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl Config {
    /// Default config with `workers` threads, and a queue as deep as the pool
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            queue_capacity: workers,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), BrcError> {
        if self.workers == 0 {
            return Err(BrcError::InvalidConfig("worker count must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(BrcError::InvalidConfig("chunk size must be at least 1 byte"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(BrcError::InvalidConfig("chunk size must be at most 1 GiB"));
        }
        if self.queue_capacity == 0 {
            return Err(BrcError::InvalidConfig("queue capacity must be at least 1"));
        }
        if self.table_capacity == 0 {
            return Err(BrcError::InvalidConfig("table capacity must be at least 1"));
        }
        Ok(())
    }
}
