//! memdev — in-memory pseudo storage devices.
//!
//! Usage:
//!   memdev info                              # print the configured device set
//!   memdev store-demo                        # sparse write/read walkthrough
//!   memdev pipe-demo --bytes 4194304         # producer/consumer throughput
//!
//! All commands take `--config memdev.toml`; without it the built-in
//! defaults apply (quantum 4000 x 1000, pipe buffer 4000).

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memdev::config::Config;
use memdev::pipe::stream::{OpenMode, StreamPipe};
use memdev::registry::DeviceSet;
use memdev::store::quantum::QuantumDevice;

#[derive(Parser)]
#[command(name = "memdev", about = "In-memory pseudo storage devices", version)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply if omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the configured device set and exit.
    Info,
    /// Write a sparse pattern into a quantum store and read it back.
    StoreDemo,
    /// Stream bytes from a producer thread to a consumer thread.
    PipeDemo {
        /// Total bytes to push through the pipe.
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        bytes: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Info => run_info(&config),
        Command::StoreDemo => run_store_demo(&config),
        Command::PipeDemo { bytes } => run_pipe_demo(&config, bytes),
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::from_file(p).with_context(|| format!("loading config {p:?}")),
        None => Ok(Config::default()),
    }
}

fn run_info(config: &Config) -> anyhow::Result<()> {
    let devices = DeviceSet::from_config(config)?;
    println!("=== memdev devices ===");
    println!(
        "Quantum stores : {}  (quantum {} B x qset {})",
        devices.store_count(),
        config.store.quantum_size,
        config.store.qset_size
    );
    println!(
        "Stream pipes   : {}  ({} B buffer, {} B usable)",
        devices.pipe_count(),
        config.pipe.buffer_size,
        config.pipe.buffer_size - 1
    );
    Ok(())
}

fn run_store_demo(config: &Config) -> anyhow::Result<()> {
    let dev = std::sync::Arc::new(QuantumDevice::new(config.store.geometry())?);
    let mut handle = dev.open();

    // A write near the start, then one far away: everything in between
    // stays a hole and costs no memory.
    let greeting = b"hello, quantum world";
    let mut written = 0;
    while written < greeting.len() {
        written += handle.write(&greeting[written..])?;
    }
    dev.write_at(1_000_000, b"!")?;

    let stats = dev.stats();
    println!("=== quantum store ===");
    println!("Logical size    : {} bytes", stats.logical_size);
    println!("Slabs linked    : {}", stats.slabs);
    println!("Quanta allocated: {}", stats.quanta);
    println!("Backing memory  : {} bytes", stats.allocated_bytes);

    let mut back = vec![0u8; greeting.len()];
    let n = dev.read_at(0, &mut back)?;
    println!("Read back       : {:?}", String::from_utf8_lossy(&back[..n]));
    let hole = dev.read_at(500_000, &mut back)?;
    println!("Read in hole    : {hole} bytes (absent, not zero-filled)");
    Ok(())
}

fn run_pipe_demo(config: &Config, bytes: usize) -> anyhow::Result<()> {
    let pipe = StreamPipe::new(config.pipe.buffer_size)?;
    let writer = pipe.open(OpenMode::Write)?;
    let reader = pipe.open(OpenMode::Read)?;

    let start = Instant::now();
    let producer = thread::spawn(move || -> memdev::error::Result<()> {
        let chunk = vec![0xA5u8; 1024];
        let mut sent = 0;
        while sent < bytes {
            let want = (bytes - sent).min(chunk.len());
            sent += writer.write(&chunk[..want])?;
        }
        Ok(())
    });

    let mut buf = vec![0u8; 1024];
    let mut received = 0;
    while received < bytes {
        received += reader.read(&mut buf)?;
    }

    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?
        .context("producer failed")?;

    let elapsed = start.elapsed();
    let mib = bytes as f64 / (1024.0 * 1024.0);
    println!("=== stream pipe ===");
    println!("Transferred : {received} bytes");
    println!("Elapsed     : {elapsed:.2?}");
    println!("Throughput  : {:.1} MiB/s", mib / elapsed.as_secs_f64());
    Ok(())
}
