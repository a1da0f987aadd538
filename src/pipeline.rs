//! Producer thread + worker pool, joined by a bounded chunk queue.

use std::{io::Read, path::Path, thread};

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    cancel::CancelToken,
    config::Config,
    error::BrcError,
    merge::{merge_tables, Stations},
    pool::BufferPool,
    source::{Chunk, ChunkSource, MappedChunker, MappedFile, StreamChunker},
    worker::Worker,
};

/// Totals over a whole run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub workers: usize,
    pub chunks: u64,
    pub records: u64,
    pub skipped: u64,
    pub distinct_keys: usize,
}

/// Merged aggregates of a finished run
#[derive(Debug)]
pub struct Outcome {
    pub stations: Stations,
    pub stats: RunStats,
}

/// Buffers the pool keeps idle: enough for a full queue, one per worker, and the producer's two
fn pool_size(config: &Config) -> usize {
    config.queue_capacity + config.workers + 2
}

/// Aggregates everything `reader` yields, reading it sequentially on the producer thread
pub fn aggregate_reader<R: Read + Send>(
    reader: R,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Outcome, BrcError> {
    config.validate()?;
    let pool = BufferPool::new(config.chunk_size, pool_size(config));
    aggregate(StreamChunker::new(reader, &pool), config, cancel)
}

/// Aggregates an in-memory input without copying it
pub fn aggregate_bytes(
    input: &[u8],
    config: &Config,
    cancel: &CancelToken,
) -> Result<Outcome, BrcError> {
    config.validate()?;
    let pool = BufferPool::new(config.chunk_size, pool_size(config));
    aggregate(MappedChunker::from_slice(input, &pool), config, cancel)
}

/// Memory-maps the file at `path` and aggregates it
pub fn aggregate_mapped_file(
    path: impl AsRef<Path>,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Outcome, BrcError> {
    config.validate()?;
    let file = MappedFile::open(path)?;
    let pool = BufferPool::new(config.chunk_size, pool_size(config));
    aggregate(MappedChunker::new(&file, &pool), config, cancel)
}

/// Runs `source` through `config.workers` parsing threads and merges their tables.
/// The first fatal error, from any stage, cancels the rest of the run and is returned.
pub fn aggregate<'a, S: ChunkSource<'a>>(
    source: S,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Outcome, BrcError> {
    config.validate()?;
    let (tx, rx) = bounded::<Chunk<'a>>(config.queue_capacity);
    let processing_error = Mutex::new(None);

    let results = thread::scope(|s| {
        let pe = &processing_error;
        s.spawn(move || {
            if let Err(e) = produce(source, tx, cancel) {
                cancel.cancel();
                pe.lock().get_or_insert(e);
            }
        });

        let handles = (0..config.workers)
            .map(|id| {
                let rx = rx.clone();
                s.spawn(move || match Worker::new(id, config).run(rx, cancel) {
                    Ok(output) => Some(output),
                    Err(e) => {
                        cancel.cancel();
                        pe.lock().get_or_insert(e);
                        None
                    }
                })
            })
            .collect::<Vec<_>>();
        // once every worker is gone, the producer's sends fail and it stops
        drop(rx);

        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(output) => output,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect::<Vec<_>>()
    }); // scope ends, all threads were joined

    if let Some(e) = processing_error.into_inner() {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(BrcError::Cancelled);
    }

    // every worker succeeded, so every result is present
    let mut stats = RunStats {
        workers: config.workers,
        ..RunStats::default()
    };
    let tables = results.into_iter().flatten().map(|(table, worker_stats)| {
        stats.chunks += worker_stats.chunks;
        stats.records += worker_stats.records;
        stats.skipped += worker_stats.skipped;
        table
    });
    let stations = merge_tables(tables);
    stats.distinct_keys = stations.len();

    info!(
        workers = stats.workers,
        chunks = stats.chunks,
        records = stats.records,
        skipped = stats.skipped,
        keys = stats.distinct_keys,
        "merged worker tables"
    );
    Ok(Outcome { stations, stats })
}

/// Pushes chunks into the queue until the source runs dry, blocking while the queue is full.
/// Dropping `tx` on return closes the queue.
fn produce<'a>(
    mut source: impl ChunkSource<'a>,
    tx: Sender<Chunk<'a>>,
    cancel: &CancelToken,
) -> Result<(), BrcError> {
    let mut produced = 0u64;
    while !cancel.is_cancelled() {
        let Some(chunk) = source.next_chunk()? else {
            debug!(chunks = produced, "producer done");
            return Ok(());
        };
        if tx.send(chunk).is_err() {
            // all workers have exited, one of them with the error that stopped the run
            break;
        }
        produced += 1;
    }
    debug!(chunks = produced, "producer stopped early");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{aggregate_bytes, aggregate_reader};
    use crate::{
        cancel::CancelToken, config::Config, error::BrcError, format::format_stations,
        station::Station,
    };

    #[test]
    fn process_small_inputs() {
        for (input, exp_out) in [
            ("a;-1.1", "{a=-1.1/-1.1/-1.1}"),
            (
                "a;1.1\nabc;12.3\na;-2.2\nverylongname12345;-11.0\naaverylongname1234;0.0",
                concat!(
                    "{a=-2.2/-0.6/1.1, aaverylongname1234=0.0/0.0/0.0, ",
                    "abc=12.3/12.3/12.3, verylongname12345=-11.0/-11.0/-11.0}"
                ),
            ),
            ("A;1.0\nB;-2.5\nA;3.0\n", "{A=1.0/2.0/3.0, B=-2.5/-2.5/-2.5}"),
            ("", "{}"),
        ] {
            for workers in [1, 3] {
                let config = Config {
                    chunk_size: 32,
                    table_capacity: 257,
                    ..Config::with_workers(workers)
                };
                let cancel = CancelToken::new();
                let outcome = aggregate_reader(input.as_bytes(), &config, &cancel)
                    .unwrap_or_else(|e| panic!("error `{e}` on valid input: `{input}`"));
                assert_eq!(
                    format_stations(&outcome.stations),
                    exp_out,
                    "bad output for input: `{input}`, workers: {workers}"
                );
            }
        }
    }

    #[test]
    fn stats_add_up() {
        let config = Config {
            chunk_size: 8,
            ..Config::with_workers(2)
        };
        let outcome = aggregate_bytes(b"A;1.0\nB;-2.5\nA;3.0\n", &config, &CancelToken::new())
            .expect("valid input");
        assert_eq!(outcome.stats.records, 3);
        assert_eq!(outcome.stats.chunks, 3);
        assert_eq!(outcome.stats.distinct_keys, 2);
        assert_eq!(
            outcome.stations.get(&b"A"[..]),
            Some(&Station {
                min: 10,
                max: 30,
                sum: 40,
                count: 2,
            })
        );
    }

    #[test]
    fn worker_error_fails_the_run() {
        let mut input = Vec::new();
        for _ in 0..1000 {
            input.extend_from_slice(b"ok;1.0\n");
        }
        input.extend_from_slice(b"bad line\n");
        for _ in 0..1000 {
            input.extend_from_slice(b"ok;1.0\n");
        }
        let config = Config {
            chunk_size: 64,
            queue_capacity: 1,
            ..Config::with_workers(4)
        };
        let result = aggregate_reader(&input[..], &config, &CancelToken::new());
        assert!(
            matches!(result, Err(BrcError::MalformedRecord { offset: 7000, .. })),
            "got {result:?}"
        );
    }

    #[test]
    fn pre_cancelled_run() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = aggregate_bytes(b"a;1.0\n", &Config::with_workers(2), &cancel);
        assert!(matches!(result, Err(BrcError::Cancelled)), "got {result:?}");
    }

    #[test]
    fn invalid_config() {
        let result = aggregate_bytes(b"a;1.0\n", &Config::with_workers(0), &CancelToken::new());
        assert!(matches!(result, Err(BrcError::InvalidConfig(_))), "got {result:?}");
    }
}
