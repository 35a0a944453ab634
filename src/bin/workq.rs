//! workq CLI: exercise a rate-limited work queue against synthetic failures.

use anyhow::bail;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use workq::config::Config;
use workq::queue::{Queue, RateLimiting, RateLimitingQueue, RateLimitingQueueConfig};
use workq::rate_limiter::RateLimiter;
use workq::telemetry::{TelemetryConfig, init_telemetry};
use workq::worker::{Reconcile, Worker, WorkerConfig};

#[derive(Parser)]
#[command(name = "workq", about = "Rate-limited work queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run workers over items that fail a few times before succeeding
    Demo {
        /// Number of distinct items to enqueue
        #[arg(long, default_value_t = 10)]
        items: usize,
        /// Item `n` fails its first `n % (max_failures + 1)` attempts
        #[arg(long, default_value_t = 3)]
        max_failures: usize,
        /// Retry delay per recorded failure, in milliseconds
        #[arg(long, default_value_t = 50)]
        base_delay_ms: u64,
        /// Drop items after this many requeues
        #[arg(long)]
        max_retries: Option<usize>,
        /// Worker loops (defaults to WORKQ_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Demo {
            items,
            max_failures,
            base_delay_ms,
            max_retries,
            workers,
        } => {
            cmd_demo(
                &config,
                items,
                max_failures,
                Duration::from_millis(base_delay_ms),
                max_retries,
                workers.unwrap_or(config.workers),
            )
            .await
        }
    }
}

/// Waits `failures * base` before each retry.
struct LinearBackoff {
    base: Duration,
    failures: Mutex<HashMap<String, usize>>,
}

impl LinearBackoff {
    fn new(base: Duration) -> Self {
        Self {
            base,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RateLimiter<String> for LinearBackoff {
    fn when(&self, item: &String) -> Duration {
        let mut failures = self.failures();
        let count = failures.entry(item.clone()).or_insert(0);
        *count += 1;
        self.base * (*count as u32)
    }

    fn num_requeues(&self, item: &String) -> usize {
        self.failures().get(item).copied().unwrap_or(0)
    }

    fn forget(&self, item: &String) {
        self.failures().remove(item);
    }
}

/// Fails each item a fixed number of times, then succeeds.
struct Flaky {
    queue: Arc<dyn RateLimiting<String>>,
    fail_first: HashMap<String, usize>,
    attempts: Mutex<HashMap<String, usize>>,
    max_retries: Option<usize>,
    settled: AtomicUsize,
    dropped: AtomicUsize,
}

impl Flaky {
    /// Count an item as finished; shut the queue down after the last one.
    fn settle(&self) {
        let settled = self.settled.fetch_add(1, Ordering::SeqCst) + 1;
        if settled == self.fail_first.len() {
            self.queue.shut_down();
        }
    }
}

#[async_trait]
impl Reconcile<String> for Flaky {
    async fn reconcile(&self, item: &String) -> anyhow::Result<()> {
        let attempt = {
            let mut attempts = self
                .attempts
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let n = attempts.entry(item.clone()).or_insert(0);
            *n += 1;
            *n
        };

        let fail_first = self.fail_first.get(item).copied().unwrap_or(0);
        if attempt > fail_first {
            self.settle();
            return Ok(());
        }

        let requeues = attempt - 1;
        if self.max_retries.is_some_and(|max| requeues >= max) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            self.settle();
        }
        bail!("{item}: attempt {attempt} of {} fails", fail_first + 1)
    }
}

async fn cmd_demo(
    config: &Config,
    items: usize,
    max_failures: usize,
    base_delay: Duration,
    max_retries: Option<usize>,
    workers: usize,
) -> anyhow::Result<()> {
    if items == 0 {
        println!("Nothing to do.");
        return Ok(());
    }

    let queue: Arc<dyn RateLimiting<String>> = Arc::new(RateLimitingQueue::with_config(
        LinearBackoff::new(base_delay),
        RateLimitingQueueConfig::named(config.queue_name.clone()),
    ));

    let fail_first: HashMap<String, usize> = (0..items)
        .map(|n| (format!("item-{n}"), n % (max_failures + 1)))
        .collect();

    let reconciler = Arc::new(Flaky {
        queue: Arc::clone(&queue),
        fail_first: fail_first.clone(),
        attempts: Mutex::new(HashMap::new()),
        max_retries,
        settled: AtomicUsize::new(0),
        dropped: AtomicUsize::new(0),
    });

    for item in fail_first.keys() {
        queue.add(item.clone());
    }

    let worker = Worker::new(
        Arc::clone(&queue),
        Arc::clone(&reconciler) as Arc<dyn Reconcile<String>>,
        WorkerConfig {
            name: config.queue_name.clone(),
            workers,
            max_retries,
        },
    );

    let started = Instant::now();
    worker.run().await;

    let attempts = reconciler
        .attempts
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let mut names: Vec<_> = attempts.keys().collect();
    names.sort();

    println!("{:<12} {:>8}", "ITEM", "ATTEMPTS");
    println!("{}", "-".repeat(21));
    for name in names {
        println!("{:<12} {:>8}", name, attempts[name]);
    }
    println!();
    println!(
        "{} items, {} attempts, {} dropped in {:?}",
        items,
        attempts.values().sum::<usize>(),
        reconciler.dropped.load(Ordering::SeqCst),
        started.elapsed()
    );

    Ok(())
}
