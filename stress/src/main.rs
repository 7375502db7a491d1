use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use hdrhistogram::Histogram;
use tracing_subscriber::EnvFilter;

use ratetracker::{
    CleanupIntervalMs, CounterRegistry, CounterRegistryOptions, EvictionMode, StaleAfterMs,
    WindowDurationMs,
};

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Workload {
    /// Only `record_event`.
    Record,
    /// Only `count_in_window` (keys are pre-seeded).
    Count,
    /// Record, then count the same key.
    Mixed,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Eviction {
    Exact,
    Batched,
}

impl From<Eviction> for EvictionMode {
    fn from(value: Eviction) -> Self {
        match value {
            Eviction::Exact => EvictionMode::Exact,
            Eviction::Batched => EvictionMode::Batched,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KeyDist {
    Hot,
    Uniform,
    Skewed,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ratetracker-stress",
    about = "Load test / benchmark harness for ratetracker"
)]
struct Args {
    #[arg(long, value_enum, default_value_t = Workload::Mixed)]
    workload: Workload,

    #[arg(long, value_enum, default_value_t = Eviction::Exact)]
    eviction: Eviction,

    #[arg(long, value_enum, default_value_t = KeyDist::Uniform)]
    key_dist: KeyDist,

    #[arg(long, default_value_t = 8)]
    threads: usize,

    #[arg(long, default_value_t = 30)]
    duration_s: u64,

    #[arg(long, default_value_t = 1_000)]
    window_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    key_space: usize,

    #[arg(long, default_value_t = 0.8)]
    hot_fraction: f64,

    #[arg(long, default_value_t = 100)]
    sample_every: u64,

    #[arg(long)]
    target_qps: Option<u64>,

    /// Run the background cleanup loop with this stale threshold.
    #[arg(long)]
    cleanup_stale_ms: Option<u64>,

    #[arg(long, default_value_t = 1_000)]
    cleanup_interval_ms: u64,
}

#[derive(Default)]
struct Counts {
    records: AtomicU64,
    counts: AtomicU64,
    max_count: AtomicU64,
}

fn build_keys(args: &Args) -> Vec<String> {
    let n = match args.key_dist {
        KeyDist::Hot => 1,
        _ => args.key_space.max(1),
    };
    (0..n).map(|i| format!("user_{i}")).collect()
}

fn should_sample(iter: u64, sample_every: u64) -> bool {
    if sample_every <= 1 {
        return true;
    }

    iter.is_multiple_of(sample_every)
}

fn pick_key<'a>(args: &Args, keys: &'a [String], thread_rng: &mut impl FnMut() -> u64) -> &'a str {
    match args.key_dist {
        KeyDist::Hot => &keys[0],
        KeyDist::Uniform => {
            let idx = (thread_rng() as usize) % keys.len();
            &keys[idx]
        }
        KeyDist::Skewed => {
            let r = (thread_rng() % 10_000) as f64 / 10_000.0;
            if r < args.hot_fraction {
                &keys[0]
            } else {
                let idx = 1 + ((thread_rng() as usize) % (keys.len().saturating_sub(1).max(1)));
                &keys[idx % keys.len()]
            }
        }
    }
}

fn print_results(
    args: &Args,
    elapsed: Duration,
    ops: u64,
    hist: &Histogram<u64>,
    counts: &Counts,
    registry: &CounterRegistry,
) {
    let ops_s = ops as f64 / elapsed.as_secs_f64();

    tracing::info!(
        ops,
        ops_per_s = ops_s as u64,
        live_keys = registry.len(),
        "stress run finished"
    );

    println!(
        "workload={:?} eviction={:?} key_dist={:?}",
        args.workload, args.eviction, args.key_dist
    );
    println!(
        "threads={} duration_s={} window_ms={} key_space={}",
        args.threads, args.duration_s, args.window_ms, args.key_space
    );
    println!(
        "elapsed_s={:.3} ops={} ops_per_s={:.0}",
        elapsed.as_secs_f64(),
        ops,
        ops_s
    );
    println!(
        "records={} counts={} max_count_seen={} live_keys={}",
        counts.records.load(Ordering::Relaxed),
        counts.counts.load(Ordering::Relaxed),
        counts.max_count.load(Ordering::Relaxed),
        registry.len()
    );
    if !hist.is_empty() {
        println!(
            "lat_us p50={} p95={} p99={} p999={} max={}",
            hist.value_at_quantile(0.50),
            hist.value_at_quantile(0.95),
            hist.value_at_quantile(0.99),
            hist.value_at_quantile(0.999),
            hist.max()
        );
        println!("sample_every={} samples={}", args.sample_every, hist.len());
    } else {
        println!("no latency samples collected");
    }
}

fn run(args: &Args) {
    let keys = build_keys(args);

    tracing::info!(
        workload = ?args.workload,
        eviction = ?args.eviction,
        key_dist = ?args.key_dist,
        threads = args.threads,
        duration_s = args.duration_s,
        window_ms = args.window_ms,
        keys = keys.len(),
        "starting stress run"
    );

    let window_duration_ms = match WindowDurationMs::try_from(args.window_ms) {
        Ok(w) => w,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    let registry = Arc::new(CounterRegistry::new(CounterRegistryOptions {
        window_duration_ms,
        eviction_mode: args.eviction.into(),
    }));

    if args.workload == Workload::Count {
        for key in &keys {
            registry.record_event(key);
        }
    }

    if let Some(stale_ms) = args.cleanup_stale_ms {
        match (
            StaleAfterMs::try_from(stale_ms),
            CleanupIntervalMs::try_from(args.cleanup_interval_ms),
        ) {
            (Ok(stale_after), Ok(interval)) => {
                registry.run_cleanup_loop_with_config(stale_after, interval);
            }
            (Err(err), _) | (_, Err(err)) => {
                eprintln!("{err}");
                std::process::exit(2);
            }
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let counts = Arc::new(Counts::default());
    let total_ops = Arc::new(AtomicU64::new(0));

    let started = Instant::now();
    let deadline = started + Duration::from_secs(args.duration_s);

    let mut handles = Vec::with_capacity(args.threads);
    for t in 0..args.threads {
        let registry = Arc::clone(&registry);
        let keys = keys.clone();
        let stop = Arc::clone(&stop);
        let counts = Arc::clone(&counts);
        let total_ops = Arc::clone(&total_ops);
        let args = args.clone();

        handles.push(std::thread::spawn(move || {
            let mut hist = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
            let mut i = 0_u64;
            let mut seed = (t as u64 + 1) * 0x9E37_79B9_7F4A_7C15;
            let mut next_deadline = Instant::now();

            let mut rng_u64 = || {
                // xorshift64*
                seed ^= seed >> 12;
                seed ^= seed << 25;
                seed ^= seed >> 27;
                seed = seed.wrapping_mul(0x2545_F491_4F6C_DD1D);
                seed
            };

            while !stop.load(Ordering::Relaxed) {
                if Instant::now() >= deadline {
                    break;
                }

                if let Some(qps) = args.target_qps {
                    let per_op_ns = 1_000_000_000u64 / qps.max(1);
                    let now = Instant::now();
                    if now < next_deadline {
                        std::thread::sleep(next_deadline - now);
                    }
                    next_deadline += Duration::from_nanos(per_op_ns);
                }

                i = i.wrapping_add(1);
                let k = pick_key(&args, &keys, &mut rng_u64);
                let sample = should_sample(i, args.sample_every);
                let t0 = if sample { Some(Instant::now()) } else { None };

                let observed = match args.workload {
                    Workload::Record => {
                        registry.record_event(k);
                        None
                    }
                    Workload::Count => Some(registry.count_in_window(k)),
                    Workload::Mixed => {
                        registry.record_event(k);
                        Some(registry.count_in_window(k))
                    }
                };

                if let Some(t0) = t0 {
                    let us = t0.elapsed().as_micros() as u64;
                    let _ = hist.record(us.max(1));
                }

                total_ops.fetch_add(1, Ordering::Relaxed);
                if args.workload != Workload::Count {
                    counts.records.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(observed) = observed {
                    counts.counts.fetch_add(1, Ordering::Relaxed);
                    counts
                        .max_count
                        .fetch_max(observed as u64, Ordering::Relaxed);
                }
            }

            hist
        }));
    }

    std::thread::sleep(Duration::from_secs(args.duration_s));
    stop.store(true, Ordering::Relaxed);

    let mut merged = Histogram::<u64>::new_with_bounds(1, 60_000_000, 3).unwrap();
    for h in handles {
        let hist = h.join().unwrap();
        merged.add(&hist).unwrap();
    }

    registry.stop_cleanup_loop();

    let elapsed = started.elapsed();
    let ops = total_ops.load(Ordering::Relaxed);
    print_results(args, elapsed, ops, &merged, &counts, &registry);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    run(&args);
}
