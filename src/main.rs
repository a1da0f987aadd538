use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    time::Instant,
};

use anyhow::{Context, Result};
use brc_pipeline::{
    aggregate_mapped_file, aggregate_reader, config::DEFAULT_CHUNK_SIZE,
    config::DEFAULT_TABLE_CAPACITY, write_stations, CancelToken, Config, OverflowPolicy,
    SlotPolicy, ValueParsing,
};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Io {
    /// Map the whole file into memory
    Mmap,
    /// Read the file sequentially into pooled buffers
    Stream,
}

/// Computes min, mean and max per station over a `name;measurement` file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file
    #[arg(short, long, default_value = "measurements.txt")]
    file: PathBuf,

    /// Number of parsing threads [default: available parallelism]
    #[arg(short = 'n', long)]
    workers: Option<usize>,

    /// Bytes per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Chunks that may wait for a worker [default: number of workers]
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Slots in each worker's table
    #[arg(long, default_value_t = DEFAULT_TABLE_CAPACITY)]
    table_capacity: usize,

    #[arg(long, value_enum, default_value_t = Io::Mmap)]
    io: Io,

    /// Skip key comparison on lookup; only safe when there are far fewer keys than table slots
    #[arg(long)]
    first_writer_wins: bool,

    /// Don't validate measurements
    #[arg(long)]
    unchecked_values: bool,

    /// Drop records whose measurement is out of range instead of failing
    #[arg(long)]
    skip_overflow: bool,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> Config {
        let mut config = match self.workers {
            Some(n) => Config::with_workers(n),
            None => Config::default(),
        };
        if let Some(cap) = self.queue_capacity {
            config.queue_capacity = cap;
        }
        config.chunk_size = self.chunk_size;
        config.table_capacity = self.table_capacity;
        if self.first_writer_wins {
            config.slot_policy = SlotPolicy::FirstWriterWins;
        }
        if self.unchecked_values {
            config.value_parsing = ValueParsing::Unchecked;
        }
        if self.skip_overflow {
            config.overflow = OverflowPolicy::Skip;
        }
        config
    }
}

fn main() -> Result<()> {
    let started = Instant::now();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("brc={0},brc_pipeline={0}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.config();
    info!(
        file = %args.file.display(),
        io = ?args.io,
        workers = config.workers,
        chunk_size = config.chunk_size,
        "starting"
    );

    let cancel = CancelToken::new();
    let outcome = match args.io {
        Io::Mmap => aggregate_mapped_file(&args.file, &config, &cancel),
        Io::Stream => {
            let file = File::open(&args.file)
                .with_context(|| format!("opening {}", args.file.display()))?;
            aggregate_reader(file, &config, &cancel)
        }
    }
    .with_context(|| format!("aggregating {}", args.file.display()))?;

    let mut buffered_stdout = BufWriter::with_capacity(2 * 1024 * 1024, std::io::stdout());
    write_stations(&mut buffered_stdout, &outcome.stations).context("writing results")?;
    writeln!(buffered_stdout).context("writing results")?;
    buffered_stdout.flush().context("writing results")?;

    info!(
        records = outcome.stats.records,
        keys = outcome.stats.distinct_keys,
        "took {:.3}s",
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::{Args, Io};
    use brc_pipeline::{OverflowPolicy, SlotPolicy, ValueParsing};

    #[test]
    fn flags_map_onto_config() {
        let args = Args::parse_from([
            "brc",
            "-f",
            "data.txt",
            "-n",
            "3",
            "--chunk-size",
            "4096",
            "--io",
            "stream",
            "--first-writer-wins",
            "--skip-overflow",
        ]);
        assert_eq!(args.io, Io::Stream);
        let config = args.config();
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.slot_policy, SlotPolicy::FirstWriterWins);
        assert_eq!(config.value_parsing, ValueParsing::Validated);
        assert_eq!(config.overflow, OverflowPolicy::Skip);
    }

    #[test]
    fn defaults() {
        let args = Args::parse_from(["brc"]);
        assert_eq!(args.io, Io::Mmap);
        assert_eq!(args.file.to_str(), Some("measurements.txt"));
        assert!(args.config().validate().is_ok());
    }
}
