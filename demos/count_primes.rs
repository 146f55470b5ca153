//! Count primes with the pipelined sieve and print the chain it built
//!
//! ```text
//! RUST_LOG=sieve_pipeline=debug cargo run --example count_primes -- 100000 --capacity 500
//! ```

use clap::Parser;
use sieve_pipeline::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Count primes with a pipeline of filter workers")]
struct Args {
    /// Inclusive upper bound
    limit: i64,

    /// Primes held by each worker before the chain grows
    #[arg(short, long, default_value_t = sieve_pipeline::DEFAULT_SHARD_CAPACITY)]
    capacity: usize,

    /// Pool threads running the workers (defaults to one per core)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Pin pool threads to cores
    #[arg(long)]
    pin: bool,

    /// Also run the sequential sieve and compare
    #[arg(long)]
    verify: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = SieveConfig::new()
        .with_shard_capacity(args.capacity)
        .with_pinned_threads(args.pin);
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    let sieve = SieveActor::new(config)?;

    let report = sieve.run(args.limit)?;

    println!("primes <= {}: {}", report.limit, report.count);
    println!("workers: {} on {} threads", report.workers_created(), report.pool_threads);
    for worker in &report.workers {
        println!(
            "  #{:<4} held {:>5}  largest {:>10}  received {:>8}  forwarded {:>8}",
            worker.position,
            worker.primes_held,
            worker.largest_prime.map_or_else(|| "-".to_string(), |p| p.to_string()),
            worker.messages_received,
            worker.candidates_forwarded,
        );
    }

    if args.verify {
        let expected = SequentialSieve::new().count_primes(args.limit)?;
        println!(
            "sequential: {} ({})",
            expected,
            if expected == report.count { "match" } else { "MISMATCH" }
        );
    }

    Ok(())
}
