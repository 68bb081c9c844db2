use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use cli::{Cli, Commands};
use loadscope::config::Config;
use loadscope::report::reports::{Reportable, TelemetryReport};
use loadscope::runner::sampler::{Readings, Sampler};
use loadscope::system::{CpuLoad, MemoryUsage, Sample};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod ui;

use ui::app::{check_terminal, render_app};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let log_path = std::env::temp_dir().join("loadscope.log");
    let file = std::fs::File::create(&log_path)?;
    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "loadscope=INFO".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false));

    // File-only when attached to a terminal so the live view is not garbled,
    // file + stderr when headless.
    if atty::is(atty::Stream::Stdout) {
        registry.init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    debug!(log = %log_path.display(), "Logging initialized");

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Cpu { interval, count, json } => {
            let config = config.with_interval_ms(interval);
            let mut sampler = Sampler::new(&config);

            let load = sampler.first_reading(config.interval).await?;
            print_cpu(&load, json)?;
            for _ in 1..count {
                tokio::time::sleep(config.interval).await;
                match sampler.next_reading() {
                    Ok(Sample::Load(load)) => print_cpu(&load, json)?,
                    Ok(Sample::WarmingUp { tracked }) => debug!(%tracked, "Tracker warming up"),
                    Err(e) if e.is_soft() => warn!(%e, "Reading skipped"),
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        }
        Commands::Memory { json } => {
            let memory = Sampler::new(&config).memory()?;
            print_memory(&memory, json)?;
            Ok(())
        }
        Commands::Watch { interval } => {
            if let Err(e) = check_terminal(atty::is(atty::Stream::Stdout)) {
                info!("TTY not available; live view will not be displayed.");
                return Err(e.into());
            }

            let config = config.with_interval_ms(interval);
            let readings = Arc::new(RwLock::new(Readings::default()));
            let stop = Arc::new(AtomicBool::new(false));

            let sampler = Sampler::new(&config);
            let sampling = tokio::spawn(sampler.run(config.interval, readings.clone(), stop.clone()));

            info!(interval = ?config.interval, "Starting live view");
            let result = render_app(readings, config.interval.min(std::time::Duration::from_millis(250)));

            stop.store(true, Ordering::Release);
            sampling.abort();
            result
        }
        Commands::Report { interval, path } => {
            let config = config.with_interval_ms(interval);
            let mut sampler = Sampler::new(&config);

            let cpu = sampler.first_reading(config.interval).await?;
            let memory = sampler.memory()?;
            let report = TelemetryReport::new(config.interval.as_millis() as u64, cpu, memory);

            let written = report.generate_report(path.as_deref())?;
            println!("Report written to {written}");
            Ok(())
        }
    }
}

fn print_cpu(load: &CpuLoad, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string(load)?);
        return Ok(());
    }

    let mut line = match load.aggregate {
        Some(total) => format!("cpu {total:>3}%"),
        None => "cpu   -".to_string(),
    };
    for (core, percent) in &load.cores {
        line.push_str(&format!("  cpu{core} {percent:>3}%"));
    }
    println!("{line}");
    Ok(())
}

fn print_memory(memory: &MemoryUsage, json: bool) -> Result<(), Box<dyn Error>> {
    if json {
        println!("{}", serde_json::to_string(memory)?);
    } else {
        println!(
            "used {} kB  available {} kB  total {} kB  swap used {} kB",
            memory.used_kb, memory.available_kb, memory.total_kb, memory.swap_used_kb
        );
    }
    Ok(())
}
