use clap::{Parser, Subcommand};
use std::io::{self, BufWriter, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use pipesieve::{
    DEFAULT_CAPACITY, MemorySink, Pipeline, PipelineConfig, ResultSink, SieveError, SpoolSink,
    parse_limit, reference, storage,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pipesieve")]
#[command(about = "Concurrent pipeline Sieve of Eratosthenes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Find all prime numbers up to a given limit")]
    Primes {
        #[arg(
            help = "The upper limit to search for primes",
            allow_hyphen_values = true,
            value_parser = parse_limit
        )]
        limit: u64,
        #[arg(
            short,
            long,
            default_value_t = DEFAULT_CAPACITY,
            help = "Slots in each queue between two stages"
        )]
        capacity: usize,
        #[arg(long, help = "Collect primes in a spool file in the data directory instead of memory")]
        spool: bool,
        #[arg(short, long, help = "Save the sorted primes to primes.txt in the data directory")]
        save: bool,
        #[arg(
            short,
            long,
            requires = "save",
            help = "Save primes in binary format (8 bytes per prime, little-endian)"
        )]
        binary: bool,
        #[arg(short, long, help = "Only print the summary line")]
        quiet: bool,
    },
    #[command(about = "Check the pipeline against a sequential sieve")]
    Verify {
        #[arg(
            help = "The upper limit to check",
            allow_hyphen_values = true,
            value_parser = parse_limit
        )]
        limit: u64,
        #[arg(
            short,
            long,
            default_value_t = DEFAULT_CAPACITY,
            help = "Slots in each queue between two stages"
        )]
        capacity: usize,
    },
}

fn init_tracing() {
    // Logs go to stderr so stdout only carries the prime listing
    let log_format = std::env::var("PIPESIEVE_LOG_FORMAT").unwrap_or_default();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "pipesieve=warn".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Primes {
            limit,
            capacity,
            spool,
            save,
            binary,
            quiet,
        } => run_primes(limit, capacity, spool, save, binary, quiet),
        Commands::Verify { limit, capacity } => run_verify(limit, capacity),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_primes(
    limit: u64,
    capacity: usize,
    spool: bool,
    save: bool,
    binary: bool,
    quiet: bool,
) -> Result<ExitCode, SieveError> {
    let start = Instant::now();
    let pipeline = Pipeline::new(PipelineConfig {
        queue_capacity: capacity,
    })?;

    let sink: Arc<dyn ResultSink> = if spool {
        Arc::new(SpoolSink::create_in(&storage::data_dir()?)?)
    } else {
        Arc::new(MemorySink::with_capacity(reference::prime_count_estimate(
            limit,
        ))?)
    };

    let report = pipeline.run_with_sink(limit, sink)?;
    let stages = report.stages_spawned;
    let primes = report.into_sorted();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    writeln!(out, "{} calculated primes up to {}:", primes.len(), limit)?;
    if !quiet {
        writeln!(out)?;
        storage::write_primes(&mut out, &primes)?;
    }
    out.flush()?;
    drop(out);

    if save {
        let data_dir = storage::data_dir()?;
        let path = if binary {
            storage::save_primes_binary(&data_dir, &primes)?
        } else {
            storage::save_primes_text(&data_dir, &primes)?
        };
        eprintln!("Saved all primes to {}", path.display());
    }

    let duration_us = start.elapsed().as_micros();
    eprintln!(
        "Execution time: {}us ({:.2}ms), {} filter stages",
        duration_us,
        duration_us as f64 / 1000.0,
        stages
    );

    let logged = storage::data_dir().and_then(|dir| {
        storage::log_execution(&dir, "primes", &limit.to_string(), capacity, duration_us)
    });
    if let Err(e) = logged {
        tracing::warn!(error = %e, "failed to log execution");
    }

    Ok(ExitCode::SUCCESS)
}

fn run_verify(limit: u64, capacity: usize) -> Result<ExitCode, SieveError> {
    let pipeline = Pipeline::new(PipelineConfig {
        queue_capacity: capacity,
    })?;
    let expected = reference::primes_up_to(limit)?;

    let report = pipeline.run(limit)?;
    let stages = report.stages_spawned;
    let primes = report.into_sorted();

    if primes == expected {
        println!(
            "OK: {} primes up to {} ({} filter stages)",
            primes.len(),
            limit,
            stages
        );
        return Ok(ExitCode::SUCCESS);
    }

    let first_difference = primes
        .iter()
        .zip(&expected)
        .position(|(got, want)| got != want)
        .unwrap_or(primes.len().min(expected.len()));
    println!(
        "MISMATCH: pipeline found {} primes, reference found {}; first difference at index {}",
        primes.len(),
        expected.len(),
        first_difference
    );
    Ok(ExitCode::FAILURE)
}
