use clap::{Parser, Subcommand};

/// Per-core CPU load and memory usage straight from the kernel counters
#[derive(Parser, Debug)]
#[command(name = "loadscope", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Print CPU load readings, one per interval
    Cpu {
        /// Milliseconds between samples (overrides LOADSCOPE_INTERVAL_MS)
        #[arg(short, long)]
        interval: Option<u64>,
        /// Number of readings to print after the warm-up sample
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        count: u64,
        /// Print readings as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Print the current memory and swap usage
    Memory {
        /// Print the reading as JSON
        #[arg(long)]
        json: bool,
    },
    /// Live per-core load and memory view
    Watch {
        /// Milliseconds between samples (overrides LOADSCOPE_INTERVAL_MS)
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Take one CPU and memory reading and write it as a JSON report
    Report {
        /// Milliseconds between the warm-up sample and the reading
        #[arg(short, long)]
        interval: Option<u64>,
        /// Where to write the report (default reports/telemetry.json)
        #[arg(short, long)]
        path: Option<String>,
    },
}
