//! Replays the promise samples: simple promises, chained stages, a product
//! pipeline and executor shutdown.

mod catalog;

use std::fmt::Display;
use std::thread;

use clap::Parser;
use tandem::runtime::{self, Executor, ExecutorConfig, Promise, ShutdownPolicy};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalog::ProductProcessor;

/// Promise composition samples on an explicit worker pool
#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker threads (default: half the available CPUs, or TANDEM_WORKERS)
    #[arg(short, long)]
    workers: Option<usize>,

    /// What shutdown does with queued work: drain or abort
    #[arg(long)]
    shutdown: Option<ShutdownPolicy>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = ExecutorConfig::from_env()?;
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    } else if config.workers.is_none() {
        config.workers = Some((config.resolved_workers() / 2).max(1));
    }
    if let Some(policy) = args.shutdown {
        config.shutdown = policy;
    }

    let executor = Executor::new(config)?;

    simple_promises(&executor)?;
    chained_stages(&executor)?;
    products_operations(&executor)?;
    shutdown_executor(executor);

    Ok(())
}

fn simple_promises(executor: &Executor) -> Result<(), tandem::Error> {
    let pool = executor.handle();

    let promise = executor.supply(|| "a very simple text".to_string());
    promise.then_accept_async(pool, |value| print_line(value));

    let another = executor.supply(|| "another text".to_string());

    let next = another.clone();
    promise.flat_map(move |_| next);
    another.map_async(pool, |value| value);

    promise.recover(|error| format!("Thrown: {error}"));

    // A second, short-lived pool picked for a single continuation.
    let cached = Executor::builder()
        .workers(1)
        .thread_name("cached-pool")
        .build()?;
    let shouted = promise
        .map_async(cached.handle(), |value| value.to_uppercase())
        .then_accept(|value| print_line(value));

    promise.accept_either(&another, |value| print_line(value));

    shouted.join()?;
    cached.shutdown();
    Ok(())
}

fn chained_stages(executor: &Executor) -> Result<(), tandem::Error> {
    let pool = executor.handle();

    let first = executor.supply(|| {
        print_line("computing first");
        "first".to_string()
    });
    let second = executor.supply(|| {
        print_line("computing second");
        "second".to_string()
    });
    let third = executor.supply(|| {
        print_line("computing third");
        7
    });

    let (next_second, next_third) = (second.clone(), third.clone());
    let promise: Promise<i32> = first
        .flat_map_async(pool, move |_| next_second)
        .flat_map_async(pool, move |_| next_third);

    println!("{}", promise.join()?);

    runtime::all_of([first, second]).then_accept(|_| print_line("All good"));
    Ok(())
}

fn products_operations(executor: &Executor) -> Result<(), tandem::Error> {
    let processor = ProductProcessor::new(executor.handle().clone());

    let products_text = processor
        .products_stock("iPad")
        .flat_map_async(executor.handle(), processor.products_price())
        .flat_map_async(executor.handle(), processor.displayed_text())
        .join()?;

    println!("{products_text}");
    Ok(())
}

fn shutdown_executor(executor: Executor) {
    executor.shutdown();
    println!("The executor was properly shutdown");
}

fn print_line(message: impl Display) {
    println!(
        "{} - {}",
        thread::current().name().unwrap_or("unnamed"),
        message
    );
}
