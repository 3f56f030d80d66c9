//! Build, scan and inspect list structures from the command line.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use pagelists::primitives::io::PageFile;
use pagelists::storage::disk_array::{DiskArrayHeader, DISK_ARRAY_HEADER_SIZE};
use pagelists::storage::{FixedWidth, ListsStats, StorageManager, StorageOptions};
use pagelists::types::PAGE_SIZE;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "lists-inspect",
    version,
    about = "Build and inspect on-disk list structures",
    disable_help_subcommand = true
)]
struct Cli {
    /// Storage directory.
    #[arg(long, value_name = "DIR", global = true, default_value = ".")]
    dir: PathBuf,

    /// TOML file with storage options.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bulk-load u64 lists from a CSV of `entity,value` rows.
    Build {
        /// Structure name.
        name: String,
        /// Input CSV.
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
        /// Entity count; defaults to the largest entity plus one.
        #[arg(long)]
        entities: Option<u64>,
        /// Whether the CSV starts with a header row.
        #[arg(long)]
        has_headers: bool,
        /// Builder threads.
        #[arg(long)]
        threads: Option<usize>,
        /// Lists at least this long are stored in their own pages.
        #[arg(long)]
        threshold: Option<u32>,
    },
    /// Print one entity's list.
    Scan {
        /// Structure name.
        name: String,
        /// Entity offset.
        offset: u64,
    },
    /// Print structure statistics.
    Stats {
        /// Structure name.
        name: String,
    },
    /// Hex-dump a disk array header page.
    Header {
        /// Page file to read.
        file: PathBuf,
        /// Header page index.
        #[arg(long, default_value_t = 0)]
        page: u32,
        /// Element width used to validate the header.
        #[arg(long, default_value_t = 4)]
        element_size: usize,
    },
}

#[derive(Serialize)]
struct StatsReport {
    name: String,
    entities: u64,
    chunks: u64,
    large_lists: u64,
    data_pages: u32,
    elements: u64,
    cache: String,
}

impl StatsReport {
    fn new(name: &str, stats: ListsStats, cache: String) -> Self {
        Self {
            name: name.to_string(),
            entities: stats.num_entities,
            chunks: stats.num_chunks,
            large_lists: stats.num_large_lists,
            data_pages: stats.data_pages,
            elements: stats.total_elements,
            cache,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let options = match &cli.config {
        Some(path) => StorageOptions::load(path)?,
        None => StorageOptions::default(),
    };

    match cli.command {
        Command::Build {
            name,
            csv,
            entities,
            has_headers,
            threads,
            threshold,
        } => {
            let rows = read_rows(&csv, has_headers)?;
            let num_entities = entities
                .unwrap_or_else(|| rows.iter().map(|(e, _)| e + 1).max().unwrap_or(0));
            let storage = StorageManager::open(&cli.dir, options)?;
            let mut builder =
                storage.lists_builder(&name, FixedWidth::<u64>::new(), num_entities);
            if let Some(threads) = threads {
                builder = builder.threads(threads);
            }
            if let Some(threshold) = threshold {
                builder = builder.large_list_threshold(threshold);
            }
            let (_, summary) = builder.build(&rows)?;
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?)
                }
                OutputFormat::Text => {
                    println!("built {name}");
                    print_field("entities", summary.num_entities);
                    print_field("elements", summary.num_elements);
                    print_field("large lists", summary.num_large_lists);
                    print_field("large threshold", summary.large_list_threshold);
                    print_field("data pages", summary.data_pages);
                    print_field("threads", summary.threads);
                }
            }
        }
        Command::Scan { name, offset } => {
            let storage = StorageManager::open(&cli.dir, options)?;
            let lists = storage.open_lists(&name, FixedWidth::<u64>::new())?;
            let txn = storage.begin_read_only();
            let values = lists.read_list(&txn, offset)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&values)?),
                OutputFormat::Text => {
                    let rendered: Vec<String> = values
                        .iter()
                        .map(|v| v.map_or_else(|| "null".to_string(), |v| v.to_string()))
                        .collect();
                    println!("{offset}: [{}]", rendered.join(", "));
                }
            }
        }
        Command::Stats { name } => {
            let storage = StorageManager::open(&cli.dir, options)?;
            let lists = storage.open_lists(&name, FixedWidth::<u64>::new())?;
            let txn = storage.begin_read_only();
            let stats = lists.stats(&txn)?;
            let report = StatsReport::new(&name, stats, storage.buffer_stats().to_string());
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    println!("{}", report.name);
                    print_field("entities", report.entities);
                    print_field("chunks", report.chunks);
                    print_field("large lists", report.large_lists);
                    print_field("data pages", report.data_pages);
                    print_field("elements", report.elements);
                    print_field("cache", &report.cache);
                }
            }
        }
        Command::Header {
            file,
            page,
            element_size,
        } => {
            if !file.is_file() {
                return Err(format!("{} is not a file", file.display()).into());
            }
            let io = PageFile::open(&file)?;
            let mut buf = vec![0u8; PAGE_SIZE];
            io.read_page(page, &mut buf)?;
            println!("{}", hex::encode(&buf[..DISK_ARRAY_HEADER_SIZE]));
            let header = DiskArrayHeader::decode(&buf, element_size)?;
            print_field("element size", header.element_size);
            print_field("elements per page", header.elements_per_page());
            print_field("first pip", header.first_pip_page_idx);
            print_field("elements", header.num_elements);
            print_field("array pages", header.num_array_pages);
        }
    }
    Ok(())
}

fn summary_json(summary: &pagelists::storage::BuildSummary) -> serde_json::Value {
    serde_json::json!({
        "entities": summary.num_entities,
        "elements": summary.num_elements,
        "chunks": summary.num_chunks,
        "large_lists": summary.num_large_lists,
        "large_list_threshold": summary.large_list_threshold,
        "data_pages": summary.data_pages,
        "threads": summary.threads,
    })
}

fn read_rows(path: &Path, has_headers: bool) -> Result<Vec<(u64, u64)>, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_headers)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: (u64, u64) = record?;
        rows.push(row);
    }
    Ok(rows)
}

fn print_field(name: &str, value: impl std::fmt::Display) {
    println!("  {:.<24} {}", name, value);
}
