//! eventindex CLI
//!
//! Offline operator tool for an index directory. Never writes: it opens
//! tables and the manifest read-only.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use eventindex::storage::{IndexMap, PTable, PTableOptions};
use eventindex::{Config, Fnv1aStreamHasher, IndexVersion, StreamHasher};
use tracing_subscriber::{fmt, EnvFilter};

/// eventindex CLI
#[derive(Parser, Debug)]
#[command(name = "eventindex-cli")]
#[command(about = "Inspect and verify event index files")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print header, size and midpoint summary of one PTable
    Inspect {
        /// Path to a .ptable file
        path: PathBuf,
    },

    /// Print the entries of one PTable
    Dump {
        /// Path to a .ptable file
        path: PathBuf,

        /// Stop after this many entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Open the manifest and every table it references, checking checksums
    Verify {
        /// Index directory
        index_dir: PathBuf,
    },

    /// Look up the log position of one event
    Lookup {
        /// Index directory
        index_dir: PathBuf,

        /// Stream identifier
        stream: String,

        /// Event number within the stream
        event_number: i64,

        /// Hash width the index was written with
        #[arg(long, value_enum, default_value = "v64")]
        hash_width: HashWidth,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HashWidth {
    V32,
    V64,
}

impl From<HashWidth> for IndexVersion {
    fn from(width: HashWidth) -> Self {
        match width {
            HashWidth::V32 => IndexVersion::V32,
            HashWidth::V64 => IndexVersion::V64,
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,eventindex=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("eventindex-cli v{}", eventindex::VERSION);

    let result = match args.command {
        Commands::Inspect { path } => inspect(path),
        Commands::Dump { path, limit } => dump(path, limit),
        Commands::Verify { index_dir } => verify(index_dir),
        Commands::Lookup {
            index_dir,
            stream,
            event_number,
            hash_width,
        } => lookup(index_dir, &stream, event_number, hash_width.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn inspect(path: PathBuf) -> eventindex::Result<()> {
    let table = PTable::open(&path, &PTableOptions::default())?;

    println!("file:        {}", path.display());
    println!("id:          {}", table.id());
    println!("version:     {}", table.version().as_u8());
    println!("entries:     {}", table.entry_count());
    println!("file size:   {}", table.file_size());
    println!("midpoints:   {}", table.midpoints().len());
    if let (Some(min), Some(max)) = (table.min_key(), table.max_key()) {
        println!("min key:     hash={:#x} event={}", min.hash, min.event_number);
        println!("max key:     hash={:#x} event={}", max.hash, max.event_number);
    }
    Ok(())
}

fn dump(path: PathBuf, limit: Option<usize>) -> eventindex::Result<()> {
    let table = PTable::open(&path, &PTableOptions::default())?;
    let limit = limit.unwrap_or(usize::MAX);

    for entry in table.iter()?.take(limit) {
        let entry = entry?;
        println!("{:#018x}\t{}\t{}", entry.hash, entry.event_number, entry.position);
    }
    Ok(())
}

fn verify(index_dir: PathBuf) -> eventindex::Result<()> {
    let config = Config::builder()
        .index_dir(&index_dir)
        .verify_on_open(true)
        .build();
    let map = IndexMap::load(&config, 0)?;

    for (level, tables) in map.levels().iter().enumerate() {
        for table in tables {
            println!(
                "L{} {}  entries={}  size={}",
                level,
                table.path().display(),
                table.entry_count(),
                table.file_size()
            );
        }
    }
    println!(
        "ok: {} tables, valid through {}",
        map.table_count(),
        map.valid_through()
    );
    Ok(())
}

fn lookup(index_dir: PathBuf, stream: &str, event_number: i64, version: IndexVersion) -> eventindex::Result<()> {
    let config = Config::builder()
        .index_dir(&index_dir)
        .index_version(version)
        .build();
    let map = IndexMap::load(&config, 0)?;
    let hash = Fnv1aStreamHasher.hash_for(stream, version);

    for table in map.in_order() {
        if let Some(position) = table.try_get_one_value(hash, event_number)? {
            println!("{}", position);
            return Ok(());
        }
    }
    println!("not found (hash {:#x}, tables cover the log through {})", hash, map.valid_through());
    Ok(())
}
