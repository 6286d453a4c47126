// src/bin/admission_cli.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use admission_control::config::RedisConfig;
use admission_control::identity::RequestMeta;
use admission_control::interceptor::AdmissionState;
use admission_control::{
    Admission, AdminSurface, AdmissionConfig, Evaluation, PolicyRegistry, PolicySpec,
    RateLimitKey, RateLimiter, StoreConfig,
};

const SIMULATED_ROUTE: &str = "/simulate";

#[derive(Debug, StructOpt)]
#[structopt(
    name = "admission_cli",
    about = "Inspect, reset and exercise rate limit state"
)]
struct Opt {
    /// Redis URL; without it the CLI runs against a private in-memory store
    #[structopt(long)]
    redis_url: Option<String>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Show how many requests are counted for a key
    Inspect {
        key: String,

        /// Window the count is taken over
        #[structopt(short, long, default_value = "60")]
        window_seconds: u64,
    },
    /// Delete all state for a key
    Reset { key: String },
    /// List keys with live state under a prefix
    Keys {
        #[structopt(default_value = "rate_limit:")]
        prefix: String,
    },
    /// Fire requests from a pool of client addresses through one policy
    Simulate {
        #[structopt(short, long, possible_values = &["fixed_window", "sliding_window", "token_bucket"], default_value = "sliding_window")]
        algorithm: String,

        /// Quota per window (fixed and sliding window)
        #[structopt(short, long, default_value = "10")]
        max_requests: i64,

        #[structopt(short, long, default_value = "60")]
        window_seconds: i64,

        /// Bucket size (token bucket)
        #[structopt(long, default_value = "10")]
        capacity: f64,

        /// Tokens added per second (token bucket)
        #[structopt(long, default_value = "1.0")]
        refill_rate: f64,

        /// Number of requests to simulate
        #[structopt(short = "n", long, default_value = "200")]
        num_requests: usize,

        /// Distinct client addresses requests are drawn from
        #[structopt(short, long, default_value = "5")]
        clients: u8,

        /// Time between requests in milliseconds
        #[structopt(short = "t", long, default_value = "10")]
        request_interval_ms: u64,
    },
}

#[derive(Debug, Default)]
struct ClientTally {
    allowed: u64,
    denied: u64,
    degraded: u64,
}

fn init_tracing(verbose: usize) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "admission_cli={},admission_control={}",
            level, level
        )))
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("A tracing subscriber was already installed");
    }
}

fn policy_spec(
    algorithm: &str,
    max_requests: i64,
    window_seconds: i64,
    capacity: f64,
    refill_rate: f64,
) -> PolicySpec {
    match algorithm {
        "fixed_window" => PolicySpec::fixed_window(max_requests, window_seconds),
        "token_bucket" => PolicySpec::token_bucket(capacity, refill_rate),
        _ => PolicySpec::sliding_window(max_requests, window_seconds),
    }
}

fn client_pool(size: u8) -> Vec<IpAddr> {
    (1..=size.max(1))
        .map(|n| IpAddr::V4(Ipv4Addr::new(198, 51, 100, n)))
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();
    init_tracing(opt.verbose);

    let mut config = AdmissionConfig::default();
    match &opt.redis_url {
        Some(url) => {
            config.store = StoreConfig::Redis(RedisConfig {
                url: url.clone(),
                connection_timeout: Duration::from_secs(2),
            });
        }
        None => {
            if !matches!(opt.command, Command::Simulate { .. }) {
                warn!("No --redis-url given; the in-memory store starts empty");
            }
        }
    }

    let limiter = RateLimiter::connect(&config).await?;

    match opt.command {
        Command::Inspect {
            key,
            window_seconds,
        } => {
            let admin = AdminSurface::new(limiter.store(), limiter.clock());
            let key = RateLimitKey::from_raw(key);
            let count = admin.current_count(&key, window_seconds).await?;
            println!("{}: {} request(s) in the last {}s", key, count, window_seconds);
            if let Some(bucket) = admin.bucket(&key).await? {
                println!(
                    "{}: {:.2} token(s), last refill at {}",
                    key, bucket.tokens, bucket.last_refill_ms
                );
            }
        }
        Command::Reset { key } => {
            let admin = AdminSurface::new(limiter.store(), limiter.clock());
            let key = RateLimitKey::from_raw(key);
            let removed = admin.reset(&key).await?;
            println!("Removed {} record(s) for {}", removed, key);
        }
        Command::Keys { prefix } => {
            let admin = AdminSurface::new(limiter.store(), limiter.clock());
            let keys = admin.list_keys(&prefix).await?;

            let mut table = Table::new();
            table.add_row(row!["#", "Key"]);
            for (i, key) in keys.iter().enumerate() {
                table.add_row(row![i + 1, key]);
            }
            table.printstd();
            println!("{} key(s) under '{}'", keys.len(), prefix);
        }
        Command::Simulate {
            algorithm,
            max_requests,
            window_seconds,
            capacity,
            refill_rate,
            num_requests,
            clients,
            request_interval_ms,
        } => {
            let spec = policy_spec(
                &algorithm,
                max_requests,
                window_seconds,
                capacity,
                refill_rate,
            );
            let registry = PolicyRegistry::builder()
                .register(http::Method::GET, SIMULATED_ROUTE, spec)?
                .build();
            let admission = Admission::new(registry, limiter);

            run_simulation(
                &admission,
                &algorithm,
                num_requests,
                client_pool(clients),
                Duration::from_millis(request_interval_ms),
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_simulation(
    admission: &Admission,
    algorithm: &str,
    num_requests: usize,
    pool: Vec<IpAddr>,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    // draw the callers up front, the thread rng is not Send
    let mut rng = rand::rng();
    let callers: Vec<usize> = (0..num_requests)
        .map(|_| rng.random_range(0..pool.len()))
        .collect();

    let route = admission_control::RouteId::new(&http::Method::GET, SIMULATED_ROUTE);
    let mut tallies: Vec<ClientTally> = pool.iter().map(|_| ClientTally::default()).collect();

    let progress = ProgressBar::new(num_requests as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );

    info!(algorithm, num_requests, clients = pool.len(), "Starting simulation");
    let started = Instant::now();

    for caller in callers {
        if stop.load(Ordering::SeqCst) {
            progress.abandon_with_message("interrupted");
            break;
        }

        let meta = RequestMeta {
            forwarded_for: Some(pool[caller].to_string()),
            ..RequestMeta::default()
        };
        let tally = &mut tallies[caller];
        match admission.evaluate(&route, &meta).await {
            AdmissionState::Allowed(Some(Evaluation::Degraded { .. })) => {
                tally.allowed += 1;
                tally.degraded += 1;
            }
            AdmissionState::Allowed(_) => tally.allowed += 1,
            AdmissionState::Denied { evaluation, .. } => {
                tally.denied += 1;
                if matches!(evaluation, Evaluation::Degraded { .. }) {
                    tally.degraded += 1;
                }
            }
        }
        progress.inc(1);

        if !interval.is_zero() {
            time::sleep(interval).await;
        }
    }
    if !progress.is_finished() {
        progress.finish_with_message("done");
    }

    let mut table = Table::new();
    table.add_row(row!["Client", "Allowed", "Denied", "Degraded"]);
    let mut totals = ClientTally::default();
    for (ip, tally) in pool.iter().zip(&tallies) {
        table.add_row(row![ip, tally.allowed, tally.denied, tally.degraded]);
        totals.allowed += tally.allowed;
        totals.denied += tally.denied;
        totals.degraded += tally.degraded;
    }
    table.add_row(row!["total", totals.allowed, totals.denied, totals.degraded]);

    println!("\n=== {} simulation ===", algorithm);
    table.printstd();
    println!(
        "Circuit: {:?}, elapsed: {:.2?}",
        admission.limiter().circuit_state().await,
        started.elapsed()
    );

    Ok(())
}
