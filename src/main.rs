#[macro_use]
extern crate log;

mod aggregator;
mod formatter;
mod merger;
mod planner;
mod progress_reporter;
mod scanner;
mod shared_types;
mod solver;
mod source;

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::Parser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use solver::{ReadStrategy, SolveOptions, SourceKind};

const OUTPUT_DIR: &str = "output";

fn default_threads() -> u16 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(1024) as u16)
        .unwrap_or(1)
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// File of `name;value` lines
    #[arg(short, long)]
    input: PathBuf,

    /// Defaults to ./output/<input file name>.out
    #[arg(short, long, default_value = None)]
    output: Option<PathBuf>,

    /// Upper bound on worker threads
    #[arg(short, long, default_value_t = default_threads(), value_parser = clap::value_parser!(u16).range(1..=1024))]
    threads: u16,

    /// Read size, in pages
    #[arg(short, long, default_value = "64", value_parser = clap::value_parser!(u32).range(1..))]
    chunk_factor: u32,

    #[arg(short, long, value_enum, default_value_t = ReadStrategy::Stream)]
    strategy: ReadStrategy,

    #[arg(short, long, value_enum, default_value_t = SourceKind::Disk)]
    reader: SourceKind,

    /// Log timings and draw progress on stderr
    #[arg(short, long)]
    verbose: bool,
}

async fn default_output(input: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let name = input
        .file_name()
        .ok_or_else(|| format!("input {} has no file name", input.display()))?;
    tokio::fs::create_dir_all(OUTPUT_DIR).await?;
    let mut file_name = name.to_os_string();
    file_name.push(".out");
    Ok(Path::new(OUTPUT_DIR).join(file_name))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = CliArgs::parse();

    let multi = MultiProgress::new();
    let level = if args.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    let logger = TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
    LogWrapper::new(multi.clone(), *logger).try_init()?;
    log::set_max_level(level);

    let output = match args.output {
        Some(output) => output,
        None => default_output(&args.input).await?,
    };

    let opts = SolveOptions {
        chunk_factor: args.chunk_factor as usize,
        threads: args.threads as usize,
        strategy: args.strategy,
        source: args.reader,
        page_size: planner::page_size(),
        verbose: args.verbose,
    };
    let summary = solver::run(&args.input, &output, &opts, multi).await?;

    info!(
        "{} lines ({} bytes) from {} workers, {} stations",
        summary.lines, summary.bytes, summary.workers, summary.stations
    );
    if args.verbose {
        println!("Output file: {}", output.display());
    }
    Ok(())
}
