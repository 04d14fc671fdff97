//! Reference host driving a writer or a reader against an SWMR shadow file.
//!
//! Not part of the core: this just wires `swmr-core`'s engines to
//! `swmr-core::testkit`'s minimal collaborators so the protocol can be
//! exercised from a shell or from the nested `tests/` workspace.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use swmr_core::testkit::{BumpAllocator, FileBackedDriver, MemoryPageBuffer, RecordingMetadataCache};
use swmr_core::{Reader, ReaderOutcome, SwmrConfig, Writer};

#[derive(Parser)]
#[command(name = "swmr-cli", about = "Drive a writer or reader against an SWMR shadow file")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Writer(WriterArgs),
    Reader(ReaderArgs),
}

#[derive(Args)]
struct WriterArgs {
    #[arg(long)]
    primary: PathBuf,
    #[arg(long)]
    shadow: PathBuf,
    #[arg(long, default_value_t = 3)]
    ticks: u32,
    #[arg(long, default_value_t = 4096)]
    page_size: u32,
    #[arg(long, default_value_t = 3)]
    max_lag: u64,
    #[arg(long, default_value_t = 1)]
    tick_len_tenths: u32,
    #[arg(long, default_value_t = 2)]
    md_pages_reserved: u32,
    /// One page write per flag, as `TICK:PAGE=TEXT` (e.g. `1:7=hello`),
    /// applied before that tick's EOT.
    #[arg(long = "write", value_parser = parse_write)]
    writes: Vec<(u32, u32, String)>,
}

#[derive(Args)]
struct ReaderArgs {
    #[arg(long)]
    primary: PathBuf,
    #[arg(long)]
    shadow: PathBuf,
    #[arg(long, default_value_t = 3)]
    ticks: u32,
    #[arg(long, default_value_t = 4096)]
    page_size: u32,
    #[arg(long, default_value_t = 3)]
    max_lag: u64,
    #[arg(long, default_value_t = 1)]
    tick_len_tenths: u32,
    #[arg(long, default_value_t = 2)]
    md_pages_reserved: u32,
}

fn parse_write(raw: &str) -> Result<(u32, u32, String), String> {
    let (tick_str, rest) = raw.split_once(':').ok_or_else(|| format!("missing ':' in {raw:?}"))?;
    let (page_str, text) = rest.split_once('=').ok_or_else(|| format!("missing '=' in {raw:?}"))?;
    let tick: u32 = tick_str.parse().map_err(|_| format!("bad tick in {raw:?}"))?;
    let page: u32 = page_str.parse().map_err(|_| format!("bad page in {raw:?}"))?;
    Ok((tick, page, text.to_string()))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Writer(args) => run_writer(args),
        Command::Reader(args) => run_reader(args),
    }
}

fn run_writer(args: WriterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = SwmrConfig {
        md_file_path: args.shadow.clone(),
        tick_len_tenths: args.tick_len_tenths,
        max_lag: args.max_lag,
        md_pages_reserved: args.md_pages_reserved,
        writer: true,
        flush_raw_data: false,
        page_size: args.page_size,
    };

    let driver = FileBackedDriver::create(&args.primary, &args.shadow)?;
    let allocator = BumpAllocator::new(args.page_size);
    let page_buffer = MemoryPageBuffer::new();

    let mut writer = Writer::open(
        1,
        config,
        driver,
        allocator,
        page_buffer,
        Option::<RecordingMetadataCache>::None,
        false,
    )?;

    for tick in 1..=args.ticks {
        for (write_tick, page, text) in &args.writes {
            if *write_tick != tick {
                continue;
            }
            let until = writer.check_delayed_write(*page)?;
            writer.page_buffer_mut().write_page(*page, text.as_bytes().to_vec(), until);
            tracing::info!(tick, page, until, "queued page write");
        }

        writer.eot()?;
        tracing::info!(tick = writer.tick(), entries = writer.index().len(), "writer EOT complete");
    }

    println!("final_tick={} index_entries={}", writer.tick(), writer.index().len());
    writer.close()?;
    Ok(())
}

fn run_reader(args: ReaderArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = SwmrConfig {
        md_file_path: args.shadow.clone(),
        tick_len_tenths: args.tick_len_tenths,
        max_lag: args.max_lag,
        md_pages_reserved: args.md_pages_reserved,
        writer: false,
        flush_raw_data: false,
        page_size: args.page_size,
    };

    let driver = FileBackedDriver::create(&args.primary, &args.shadow)?;
    let page_buffer = MemoryPageBuffer::new();

    let mut reader = Reader::open(2, config.clone(), driver, page_buffer, Option::<RecordingMetadataCache>::None)?;

    for _ in 0..args.ticks {
        std::thread::sleep(config.tick_len());
        match reader.eot()? {
            ReaderOutcome::Advanced { tick } => {
                tracing::info!(tick, entries = reader.index().len(), "reader advanced");
            }
            ReaderOutcome::NoChange => {
                tracing::info!(tick = reader.tick(), "reader observed no change");
            }
        }
    }

    println!("final_tick={} index_entries={}", reader.tick(), reader.index().len());
    reader.close();
    Ok(())
}
