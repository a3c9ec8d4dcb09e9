use anyhow::Result;
use clap::Parser;
use lockinspect::{LogSummary, read_log};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "lockinspect - Summarize a lock inspector JSON-lines log"
)]
struct Cli {
    /// Path to the log file
    log_file: PathBuf,

    /// Number of most conflicting lock orders to print
    #[arg(long, default_value_t = 10)]
    top: usize,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let records = read_log(&cli.log_file)?;
    log::debug!("read {} record(s) from {}", records.len(), cli.log_file.display());

    print!("{}", LogSummary::from_records(records, cli.top));
    Ok(())
}
