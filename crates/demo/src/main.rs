//! Safeworker demo binary.
//!
//! Starts a monitor and a ring of workers, pushes arithmetic and forwarding
//! messages through them, optionally stalls one worker long enough for the
//! monitor to flag it, then closes everything.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use safeworker::{Monitor, MonitorConfig, MsgId, Router, Worker, WorkerConfig, WorkerSender};
use tracing::info;

const ADD: MsgId = 1;
const FORWARD: MsgId = 2;
const STALL: MsgId = 3;

/// Demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "safeworker-demo")]
#[command(about = "Batched single-threaded workers under a liveness monitor")]
struct Args {
	/// Number of workers in the ring
	#[arg(short, long, default_value_t = 3)]
	workers: usize,

	/// Messages sent to each worker
	#[arg(short, long, default_value_t = 1000)]
	messages: u64,

	/// Mailbox capacity per worker
	#[arg(long, default_value_t = 256)]
	capacity: usize,

	/// Monitor tick in milliseconds
	#[arg(long, default_value_t = 200)]
	tick_ms: u64,

	/// Block the first worker long enough to trip the monitor
	#[arg(long)]
	stall: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[derive(Debug)]
enum Job {
	Add(u64),
	Forward { hops: u8 },
	Stall(Duration),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let monitor_config = MonitorConfig {
		tick_interval_ms: args.tick_ms,
		timeout_ticks: 3,
	};
	let stall_for = Duration::from_millis(args.tick_ms.saturating_mul(u64::from(monitor_config.timeout_ticks) + 3));
	let monitor = Monitor::start(monitor_config);

	let signal_monitor = monitor.clone();
	#[allow(clippy::disallowed_methods)]
	tokio::spawn(async move {
		if let Err(err) = signal_monitor.stop_on_signal().await {
			tracing::warn!(error = %err, "signal handler unavailable");
		}
	});

	let total = Arc::new(AtomicU64::new(0));
	let forwarded = Arc::new(AtomicU64::new(0));
	let worker_count = args.workers.max(1);

	// Build back to front so each worker can forward to the next one.
	let mut workers: Vec<Worker<Job>> = Vec::with_capacity(worker_count);
	let mut next: Option<WorkerSender<Job>> = None;
	for idx in (0..worker_count).rev() {
		let config = WorkerConfig {
			mailbox_capacity: args.capacity,
			..WorkerConfig::default()
		};
		let router = demo_router(&config, Arc::clone(&total), Arc::clone(&forwarded), next.clone());
		let iterations = Arc::new(AtomicU64::new(0));
		let hook_iterations = Arc::clone(&iterations);
		let exit_iterations = Arc::clone(&iterations);
		let name = format!("demo-{idx}");
		let exit_name = name.clone();
		let worker = Worker::builder(name, &monitor)
			.config(config)
			.router(router)
			.loop_hook(move || {
				hook_iterations.fetch_add(1, Ordering::Relaxed);
			})
			.after_loop(move || info!(worker = %exit_name, iterations = exit_iterations.load(Ordering::Relaxed), "loop finished"))
			.build()?;
		worker.start()?;
		next = Some(worker.sender());
		workers.push(worker);
	}
	workers.reverse();

	if args.stall {
		info!(?stall_for, "stalling demo-0");
		workers[0].send(STALL, Job::Stall(stall_for)).await;
	}

	for n in 0..args.messages {
		for worker in &workers {
			worker.send(ADD, Job::Add(n)).await;
		}
	}
	workers[0].send(FORWARD, Job::Forward { hops: 3 }).await;

	for worker in &workers {
		worker.close().await;
	}
	monitor.stop();

	info!(
		total = total.load(Ordering::Relaxed),
		forwarded = forwarded.load(Ordering::Relaxed),
		workers = monitor.names().len(),
		"demo finished"
	);
	Ok(())
}

fn demo_router(config: &WorkerConfig, total: Arc<AtomicU64>, forwarded: Arc<AtomicU64>, next: Option<WorkerSender<Job>>) -> Router<Job> {
	Router::from_config(config)
		.capture_args(true)
		.handle(ADD, move |_, job: Job| {
			if let Job::Add(n) = job {
				total.fetch_add(n, Ordering::Relaxed);
			}
		})
		.handle(FORWARD, move |ctx, job: Job| {
			let Job::Forward { hops } = job else {
				return;
			};
			forwarded.fetch_add(1, Ordering::Relaxed);
			info!(worker = ctx.worker(), trace_id = %ctx.trace_id(), hops, "forward");
			if hops == 0 {
				return;
			}
			if let Some(next) = &next
				&& let Err(err) = next.try_send_traced(ctx.trace_id(), FORWARD, Job::Forward { hops: hops - 1 })
			{
				tracing::warn!(worker = ctx.worker(), error = %err, "forward dropped");
			}
		})
		.handle(STALL, |_, job: Job| {
			if let Job::Stall(d) = job {
				std::thread::sleep(d);
			}
		})
}
