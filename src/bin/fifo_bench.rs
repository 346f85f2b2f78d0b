//! MPMC FIFO throughput benchmark.
//!
//! Runs the same producer/consumer workload against the lock-free FIFO
//! and against a `Mutex<VecDeque>` baseline.
//!
//! Usage:
//!     cargo run --release --bin fifo_bench
//!
//! Environment variables:
//!     PRODUCERS=4   Producer thread count (default: 4)
//!     CONSUMERS=4   Consumer thread count (default: 4)
//!     ITEMS=4194304 Total items pushed (default: 1 << 22)
//!     PIN_CPUS=1    Pin threads round-robin across cores (default: off)

use std::collections::VecDeque;
use std::env;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use conveyor::Fifo;

type Payload = u64;

#[derive(Clone, Copy)]
struct BenchConfig {
    producers: usize,
    consumers: usize,
    items: usize,
    pin_cpus: bool,
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn config() -> BenchConfig {
    BenchConfig {
        producers: env_usize("PRODUCERS", 4),
        consumers: env_usize("CONSUMERS", 4),
        items: env_usize("ITEMS", 1 << 22),
        pin_cpus: env_usize("PIN_CPUS", 0) != 0,
    }
}

fn pin_to_cpu(pin: bool, thread_index: usize) {
    if !pin {
        return;
    }
    if let Some(cores) = core_affinity::get_core_ids() {
        if !cores.is_empty() {
            core_affinity::set_for_current(cores[thread_index % cores.len()]);
        }
    }
}

/// Drives the configured workload through any queue expressed as a
/// (push, pop) pair and returns the elapsed nanoseconds.
fn run_workload<Q>(
    config: BenchConfig,
    queue: Arc<Q>,
    push: fn(&Q, Payload),
    pop: fn(&Q) -> Option<Payload>,
) -> u128
where
    Q: Send + Sync + 'static,
{
    let per_producer = config.items / config.producers;
    let total = per_producer * config.producers;
    let popped = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let producers: Vec<_> = (0..config.producers)
        .map(|p| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                pin_to_cpu(config.pin_cpus, p);
                for i in 0..per_producer {
                    push(&queue, (p * per_producer + i) as Payload);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..config.consumers)
        .map(|c| {
            let queue = Arc::clone(&queue);
            let popped = Arc::clone(&popped);
            std::thread::spawn(move || {
                pin_to_cpu(config.pin_cpus, config.producers + c);
                loop {
                    if pop(&queue).is_some() {
                        popped.fetch_add(1, Ordering::Relaxed);
                    } else if popped.load(Ordering::Relaxed) >= total {
                        break;
                    } else {
                        hint::spin_loop();
                    }
                }
            })
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }
    for handle in consumers {
        handle.join().unwrap();
    }

    assert_eq!(popped.load(Ordering::Relaxed), total, "items went missing");
    start.elapsed().as_nanos()
}

fn bench_fifo(config: BenchConfig) -> u128 {
    let queue: Arc<Fifo<Payload>> = Arc::new(Fifo::new());
    run_workload(
        config,
        queue,
        |q, v| q.push(v).expect("id space exhausted"),
        Fifo::pop,
    )
}

fn bench_mutex_baseline(config: BenchConfig) -> u128 {
    let queue: Arc<Mutex<VecDeque<Payload>>> = Arc::new(Mutex::new(VecDeque::new()));
    run_workload(
        config,
        queue,
        |q, v| q.lock().unwrap().push_back(v),
        |q| q.lock().unwrap().pop_front(),
    )
}

fn report(name: &str, items: usize, nanos: u128) {
    let ops_per_ms = items as u128 * 1_000_000 / nanos;
    println!("{name}: {ops_per_ms} ops/ms");
}

fn main() {
    conveyor::trace::init_tracing();
    let config = config();
    let total = config.items / config.producers * config.producers;

    println!(
        "fifo_bench: {} producers, {} consumers, {} items",
        config.producers, config.consumers, total
    );

    report("conveyor::Fifo  ", total, bench_fifo(config));
    report("Mutex<VecDeque> ", total, bench_mutex_baseline(config));
}
