use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use crate::{
    cancel::CancelToken,
    config::{Config, OverflowPolicy, ValueParsing},
    error::BrcError,
    parse::{parse_fixed_point, parse_fixed_point_unchecked, parse_next_line, ParsedRow, ValueError},
    source::Chunk,
    table::{AggregateTable, TableError},
};

/// How many records go by between two looks at the cancel flag
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Per-worker counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub chunks: u64,
    pub records: u64,
    /// Records dropped under [OverflowPolicy::Skip]
    pub skipped: u64,
}

/// One parsing thread's private state
pub struct Worker {
    id: usize,
    table: AggregateTable,
    stats: WorkerStats,
    value_parsing: ValueParsing,
    overflow: OverflowPolicy,
}

impl Worker {
    pub fn new(id: usize, config: &Config) -> Self {
        Self {
            id,
            table: AggregateTable::new(config.table_capacity, config.slot_policy),
            stats: WorkerStats::default(),
            value_parsing: config.value_parsing,
            overflow: config.overflow,
        }
    }

    /// Consumes chunks until the queue is closed and drained, then hands back the table.
    /// Stops early, without error, when `cancel` is set.
    pub fn run(
        mut self,
        chunks: Receiver<Chunk<'_>>,
        cancel: &CancelToken,
    ) -> Result<(AggregateTable, WorkerStats), BrcError> {
        for chunk in chunks.iter() {
            if cancel.is_cancelled() {
                debug!(worker = self.id, "cancelled");
                break;
            }
            self.process_chunk(&chunk, cancel)?;
            // chunk dropped here: buffer back to the pool, or mapped pages released
        }

        if self.stats.skipped > 0 {
            warn!(
                worker = self.id,
                skipped = self.stats.skipped,
                "dropped records with out-of-range values"
            );
        }
        debug!(
            worker = self.id,
            chunks = self.stats.chunks,
            records = self.stats.records,
            keys = self.table.len(),
            "worker done"
        );
        Ok((self.table, self.stats))
    }

    /// Parses and records every line of `chunk`.
    /// Assumes `chunk` starts at the start of a line and ends right after a newline.
    pub fn process_chunk(
        &mut self,
        chunk: &Chunk<'_>,
        cancel: &CancelToken,
    ) -> Result<(), BrcError> {
        let base = chunk.offset();
        let bytes: &[u8] = chunk;
        let mut rest = bytes;

        while let Some(parse_result) = parse_next_line(rest) {
            let offset = base + (bytes.len() - rest.len()) as u64;
            let ParsedRow {
                key,
                value,
                remainder,
            } = parse_result.map_err(|e| BrcError::MalformedRecord {
                offset,
                reason: e.reason(),
            })?;
            rest = remainder;

            let measurement = match self.value_parsing {
                ValueParsing::Unchecked => parse_fixed_point_unchecked(value),
                ValueParsing::Validated => match parse_fixed_point(value) {
                    Ok(m) => m,
                    Err(ValueError::Malformed) => {
                        return Err(BrcError::MalformedRecord {
                            offset,
                            reason: "measurement is not of the form -?d+.d",
                        })
                    }
                    Err(ValueError::Overflow) => match self.overflow {
                        OverflowPolicy::Skip => {
                            self.stats.skipped += 1;
                            continue;
                        }
                        OverflowPolicy::Fail => {
                            return Err(BrcError::ValueOverflow {
                                offset,
                                value: String::from_utf8_lossy(value).into_owned(),
                            })
                        }
                    },
                },
            };

            self.table.record(key, measurement).map_err(|e| match e {
                TableError::InvalidKey => BrcError::InvalidKey { offset },
                TableError::Full => BrcError::TableFull {
                    capacity: self.table.capacity(),
                },
            })?;

            self.stats.records += 1;
            if self.stats.records % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                break;
            }
        }
        self.stats.chunks += 1;
        Ok(())
    }

    pub fn table(&self) -> &AggregateTable {
        &self.table
    }
}

#[cfg(test)]
mod test {
    use crossbeam_channel::bounded;

    use super::Worker;
    use crate::{
        cancel::CancelToken,
        config::{Config, OverflowPolicy, ValueParsing},
        error::BrcError,
        pool::BufferPool,
        source::{ChunkSource, MappedChunker},
        station::Station,
    };

    fn config() -> Config {
        Config {
            table_capacity: 1024,
            ..Config::with_workers(1)
        }
    }

    /// Runs one worker over `input`, chunked at `chunk_size`
    fn run_one(input: &[u8], chunk_size: usize, config: Config) -> Result<Worker, BrcError> {
        let pool = BufferPool::new(chunk_size, 4);
        let mut source = MappedChunker::from_slice(input, &pool);
        let cancel = CancelToken::new();
        let mut worker = Worker::new(0, &config);
        while let Some(chunk) = source.next_chunk()? {
            worker.process_chunk(&chunk, &cancel)?;
        }
        Ok(worker)
    }

    #[test]
    fn aggregates_records() {
        let worker = run_one(b"A;1.0\nB;-2.5\nA;3.0\n", 8, config()).expect("valid input");
        assert_eq!(
            worker.table().get(b"A"),
            Some(&Station {
                min: 10,
                max: 30,
                sum: 40,
                count: 2,
            })
        );
        assert_eq!(worker.table().get(b"B"), Some(&Station::new(-25)));
        assert_eq!(worker.stats.records, 3);
        assert_eq!(worker.stats.chunks, 3);
    }

    #[test]
    fn malformed_records_report_their_offset() {
        for (input, expected_offset) in [
            ("a;1.0\nb1.0\n", 6),
            ("a;1.0\nb;x.0\n", 6),
            ("a;1.0\nb;1.0\nc;1.05\n", 12),
        ] {
            match run_one(input.as_bytes(), 64, config()) {
                Err(BrcError::MalformedRecord { offset, .. }) => {
                    assert_eq!(offset, expected_offset, "input: `{input:?}`")
                }
                Err(e) => panic!("unexpected error {e} for input `{input:?}`"),
                Ok(_) => panic!("accepted malformed input `{input:?}`"),
            }
        }
    }

    #[test]
    fn overflow_policy() {
        let input = b"a;1.0\na;4000.0\na;2.0\n";

        let failed = run_one(input, 64, config());
        match failed {
            Err(BrcError::ValueOverflow { offset, value }) => {
                assert_eq!(offset, 6);
                assert_eq!(value, "4000.0");
            }
            other => panic!("expected ValueOverflow, got {:?}", other.err()),
        }

        let skipping = Config {
            overflow: OverflowPolicy::Skip,
            ..config()
        };
        let worker = run_one(input, 64, skipping).expect("overflow is skipped");
        assert_eq!(worker.stats.skipped, 1);
        assert_eq!(worker.stats.records, 2);
        assert_eq!(
            worker.table().get(b"a"),
            Some(&Station {
                min: 10,
                max: 20,
                sum: 30,
                count: 2,
            })
        );
    }

    #[test]
    fn unchecked_parsing_trusts_input() {
        let unchecked = Config {
            value_parsing: ValueParsing::Unchecked,
            ..config()
        };
        let worker = run_one(b"a;-3276.7\na;12.3\n", 64, unchecked).expect("valid input");
        assert_eq!(
            worker.table().get(b"a").map(|s| (s.min, s.max)),
            Some((-32767, 123))
        );
    }

    #[test]
    fn run_drains_queue_and_returns_table() {
        let pool = BufferPool::new(16, 4);
        let input = b"x;1.0\ny;2.0\nx;3.0\nz;-1.0\n";
        let mut source = MappedChunker::from_slice(input, &pool);
        let (tx, rx) = bounded(8);
        while let Some(chunk) = source.next_chunk().unwrap() {
            tx.send(chunk).unwrap();
        }
        drop(tx);

        let (table, stats) = Worker::new(0, &config())
            .run(rx, &CancelToken::new())
            .expect("valid input");
        assert_eq!(table.len(), 3);
        assert_eq!(stats.records, 4);
    }

    #[test]
    fn run_stops_when_cancelled() {
        let pool = BufferPool::new(16, 4);
        let mut source = MappedChunker::from_slice(b"x;1.0\ny;2.0\n", &pool);
        let (tx, rx) = bounded(8);
        while let Some(chunk) = source.next_chunk().unwrap() {
            tx.send(chunk).unwrap();
        }
        drop(tx);

        let cancel = CancelToken::new();
        cancel.cancel();
        let (table, stats) = Worker::new(0, &config()).run(rx, &cancel).unwrap();
        assert!(table.is_empty());
        assert_eq!(stats.chunks, 0);
    }
}
