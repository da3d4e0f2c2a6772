use std::sync::atomic::AtomicUsize;

use super::*;
use crate::config::MonitorConfig;

const PUSH: MsgId = 1;
const BOOM: MsgId = 2;
const STALL: MsgId = 3;

fn recording_router(seen: &Arc<Mutex<Vec<u32>>>) -> Router<u32> {
	let sink = Arc::clone(seen);
	Router::new()
		.handle(PUSH, move |_, n| sink.lock().push(n))
		.handle(BOOM, |_, _| panic!("handler blew up"))
}

fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
	let count = Arc::new(AtomicUsize::new(0));
	let hook = Arc::clone(&count);
	(count, move || {
		hook.fetch_add(1, Ordering::SeqCst);
	})
}

#[tokio::test]
async fn delivers_everything_sent_before_close_in_order() {
	let monitor = Monitor::start(MonitorConfig::default());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let worker = Worker::builder("ordered", &monitor)
		.capacity(64)
		.router(recording_router(&seen))
		.loop_hook(|| {})
		.build()
		.unwrap();
	worker.start().unwrap();

	for n in 0..500 {
		worker.send(PUSH, n).await;
	}
	worker.close().await;

	assert_eq!(*seen.lock(), (0..500u32).collect::<Vec<_>>());
	assert_eq!(worker.pending(), 0);
}

#[tokio::test]
async fn messages_queued_before_start_are_delivered() {
	let monitor = Monitor::start(MonitorConfig::default());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let worker = Worker::builder("early", &monitor)
		.capacity(16)
		.router(recording_router(&seen))
		.loop_hook(|| {})
		.build()
		.unwrap();

	for n in 0..10 {
		worker.try_send(PUSH, n).unwrap();
	}
	assert_eq!(worker.pending(), 10);
	worker.start().unwrap();
	worker.close().await;

	assert_eq!(*seen.lock(), (0..10u32).collect::<Vec<_>>());
}

#[tokio::test]
async fn no_handler_or_hook_runs_after_close() {
	let monitor = Monitor::start(MonitorConfig::default());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let (iterations, hook) = counter();
	let worker = Worker::builder("quiet", &monitor)
		.router(recording_router(&seen))
		.loop_hook(hook)
		.build()
		.unwrap();
	worker.start().unwrap();
	worker.send(PUSH, 1).await;
	worker.close().await;

	let handled = seen.lock().len();
	let ran = iterations.load(Ordering::SeqCst);
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(seen.lock().len(), handled);
	assert_eq!(iterations.load(Ordering::SeqCst), ran);
}

#[tokio::test]
async fn sends_after_close_are_dropped() {
	let monitor = Monitor::start(MonitorConfig::default());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let worker = Worker::builder("closed", &monitor)
		.router(recording_router(&seen))
		.loop_hook(|| {})
		.build()
		.unwrap();
	let sender = worker.sender();
	worker.start().unwrap();
	worker.close().await;

	worker.send(PUSH, 1).await;
	sender.send(PUSH, 2).await;
	assert_eq!(worker.pending(), 0);
	assert_eq!(worker.try_send(PUSH, 3), Err(Error::WorkerStopped));
	assert!(sender.is_stopped());
	assert!(seen.lock().is_empty());

	// Closing again is harmless.
	worker.close().await;
	assert!(worker.close_timeout(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn panics_in_handlers_and_hooks_are_isolated() {
	let monitor = Monitor::start(MonitorConfig::default());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let worker = Worker::builder("fragile", &monitor)
		.router(recording_router(&seen))
		.loop_hook(|| panic!("loop hook blew up"))
		.before_loop(|| panic!("before hook blew up"))
		.build()
		.unwrap();
	worker.start().unwrap();

	worker.send(BOOM, 0).await;
	worker.send(PUSH, 1).await;
	worker.send(BOOM, 0).await;
	worker.send(PUSH, 2).await;
	worker.close().await;

	assert_eq!(*seen.lock(), vec![1, 2]);
}

#[tokio::test]
async fn loop_hook_runs_without_traffic() {
	let monitor = Monitor::start(MonitorConfig::default());
	let (iterations, hook) = counter();
	let worker = Worker::builder("idle", &monitor)
		.router(Router::<()>::new())
		.loop_hook(hook)
		.build()
		.unwrap();
	worker.start().unwrap();

	tokio::time::sleep(Duration::from_millis(100)).await;
	worker.close().await;
	assert!(iterations.load(Ordering::SeqCst) >= 2, "idle ticks should drive the loop hook");
}

#[tokio::test]
async fn lifecycle_hooks_bracket_the_loop() {
	let monitor = Monitor::start(MonitorConfig::default());
	let events = Arc::new(Mutex::new(Vec::new()));
	let (before, handler, after) = (Arc::clone(&events), Arc::clone(&events), Arc::clone(&events));
	let worker = Worker::builder("bracketed", &monitor)
		.router(Router::new().handle(PUSH, move |_, n: u32| handler.lock().push(format!("msg {n}"))))
		.loop_hook(|| {})
		.before_loop(move || before.lock().push("before".to_string()))
		.after_loop(move || after.lock().push("after".to_string()))
		.build()
		.unwrap();
	worker.start().unwrap();
	worker.send(PUSH, 1).await;
	worker.send(PUSH, 2).await;
	worker.close().await;

	assert_eq!(*events.lock(), vec!["before", "msg 1", "msg 2", "after"]);
}

#[tokio::test]
async fn duplicate_worker_name_fails_to_start() {
	let monitor = Monitor::start(MonitorConfig::default());
	let build = || {
		Worker::builder("twin", &monitor)
			.router(Router::<u32>::new())
			.loop_hook(|| {})
			.build()
			.unwrap()
	};
	let first = build();
	let second = build();

	first.start().unwrap();
	assert_eq!(second.start(), Err(Error::AlreadyRegistered("twin".into())));
	assert_eq!(first.start(), Err(Error::AlreadyStarted("twin".into())));

	first.close().await;
	second.close().await;
}

#[tokio::test]
async fn build_requires_router_and_loop_hook() {
	let monitor = Monitor::start(MonitorConfig::default());

	let err = Worker::<u32>::builder("no-router", &monitor).loop_hook(|| {}).build().unwrap_err();
	assert_eq!(
		err,
		Error::MissingRouter {
			worker: "no-router".into()
		}
	);

	let err = Worker::builder("no-hook", &monitor).router(Router::<u32>::new()).build().unwrap_err();
	assert_eq!(err, Error::MissingLoopHook { worker: "no-hook".into() });
}

#[tokio::test]
async fn zero_capacity_falls_back_to_default() {
	let monitor = Monitor::start(MonitorConfig::default());
	let worker = Worker::builder("defaulted", &monitor)
		.capacity(0)
		.router(Router::<u32>::new())
		.loop_hook(|| {})
		.build()
		.unwrap();
	assert_eq!(worker.capacity(), DEFAULT_MAILBOX_CAPACITY);
}

#[tokio::test]
async fn full_mailbox_rejects_try_send() {
	let monitor = Monitor::start(MonitorConfig::default());
	let worker = Worker::builder("tight", &monitor)
		.capacity(2)
		.router(Router::<u32>::new())
		.loop_hook(|| {})
		.build()
		.unwrap();

	worker.try_send(PUSH, 1).unwrap();
	worker.try_send(PUSH, 2).unwrap();
	assert_eq!(worker.try_send(PUSH, 3), Err(Error::MailboxFull));
}

fn alert_counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
	let count = Arc::new(AtomicUsize::new(0));
	let hook = Arc::clone(&count);
	(count, move || {
		hook.fetch_add(1, Ordering::SeqCst);
	})
}

fn stalling_worker(name: &str, monitor: &Monitor, stall: Duration, on_alert: impl Fn() + Send + Sync + 'static) -> Worker<&'static str> {
	Worker::builder(name, monitor)
		.router(
			Router::new()
				.capture_args(true)
				.handle(STALL, move |_, _: &'static str| std::thread::sleep(stall)),
		)
		.loop_hook(|| {})
		.on_timeout(on_alert)
		.build()
		.unwrap()
}

#[tokio::test]
async fn stuck_handler_is_reported_on_current_thread_runtime() {
	let monitor = Monitor::start(MonitorConfig {
		tick_interval_ms: 10,
		timeout_ticks: 2,
	});
	let (alerts, on_alert) = alert_counter();
	let worker = stalling_worker("stuck", &monitor, Duration::from_millis(500), on_alert);
	worker.start().unwrap();
	worker.send(STALL, "payload").await;

	tokio::time::sleep(Duration::from_millis(200)).await;
	let current = worker.current_message().expect("stalled message is in flight");
	assert_eq!(current.id, STALL);
	assert_eq!(current.args.as_deref(), Some("\"payload\""));
	assert!(alerts.load(Ordering::SeqCst) >= 1, "monitor should flag the stuck worker");

	worker.close().await;
	assert!(worker.current_message().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stuck_workers_outnumbering_runtime_threads_are_all_reported() {
	let monitor = Monitor::start(MonitorConfig {
		tick_interval_ms: 10,
		timeout_ticks: 2,
	});
	let mut workers = Vec::new();
	let mut counters = Vec::new();
	for idx in 0..4 {
		let (alerts, on_alert) = alert_counter();
		let worker = stalling_worker(&format!("stuck-{idx}"), &monitor, Duration::from_millis(400), on_alert);
		worker.start().unwrap();
		worker.send(STALL, "payload").await;
		workers.push(worker);
		counters.push(alerts);
	}

	tokio::time::sleep(Duration::from_millis(200)).await;
	for (idx, alerts) in counters.iter().enumerate() {
		assert!(alerts.load(Ordering::SeqCst) >= 1, "stuck-{idx} was never reported");
	}

	for worker in &workers {
		worker.close().await;
	}
}

#[tokio::test]
async fn handlers_run_on_the_worker_thread() {
	let monitor = Monitor::start(MonitorConfig::default());
	let threads = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&threads);
	let worker = Worker::builder("threaded", &monitor)
		.router(Router::new().handle(PUSH, move |_, _: u32| {
			sink.lock().push(std::thread::current().name().map(str::to_string));
		}))
		.loop_hook(|| {})
		.build()
		.unwrap();
	worker.start().unwrap();
	worker.send(PUSH, 1).await;
	worker.send(PUSH, 2).await;
	worker.close().await;

	let threads = threads.lock();
	assert_eq!(threads.len(), 2);
	assert!(threads.iter().all(|name| name.as_deref() == Some("sw-threaded")));
}

#[tokio::test]
async fn builder_config_sets_router_slow_threshold() {
	let monitor = Monitor::start(MonitorConfig::default());
	let config = WorkerConfig {
		slow_call_ms: 75,
		..WorkerConfig::default()
	};
	let worker = Worker::builder("configured", &monitor)
		.config(config.clone())
		.router(Router::<u32>::new())
		.loop_hook(|| {})
		.build()
		.unwrap();
	let threshold = worker.pending.lock().as_ref().map(|state| state.router.slow_threshold());
	assert_eq!(threshold, Some(Duration::from_millis(75)));

	let worker = Worker::builder("pinned", &monitor)
		.config(config)
		.router(Router::<u32>::with_slow_threshold(Duration::from_millis(5)))
		.loop_hook(|| {})
		.build()
		.unwrap();
	let threshold = worker.pending.lock().as_ref().map(|state| state.router.slow_threshold());
	assert_eq!(threshold, Some(Duration::from_millis(5)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sends_racing_close_are_delivered_or_dropped() {
	let monitor = Monitor::start(MonitorConfig::default());
	let handled = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&handled);
	let worker = Worker::builder("racing", &monitor)
		.capacity(32)
		.router(Router::new().handle(PUSH, move |_, msg: (usize, u32)| sink.lock().push(msg)))
		.loop_hook(|| {})
		.build()
		.unwrap();
	worker.start().unwrap();

	let producers: Vec<_> = (0..4)
		.map(|producer| {
			let sender = worker.sender();
			tokio::spawn(async move {
				let mut accepted = Vec::new();
				let mut n = 0u32;
				while !sender.is_stopped() {
					sender.send(PUSH, (producer, n)).await;
					// Drops only happen once the stopped flag is set, so a send
					// that returns with the flag still clear was enqueued.
					if !sender.is_stopped() {
						accepted.push((producer, n));
					}
					n += 1;
					tokio::task::yield_now().await;
				}
				accepted
			})
		})
		.collect();

	tokio::time::sleep(Duration::from_millis(20)).await;
	worker.close().await;

	let mut accepted = Vec::new();
	for producer in producers {
		let result = tokio::time::timeout(Duration::from_secs(1), producer).await.expect("producer should stop after close");
		accepted.extend(result.expect("producer task panicked"));
	}

	let handled = handled.lock();
	assert!(!accepted.is_empty());
	for msg in &accepted {
		assert!(handled.contains(msg), "accepted message {msg:?} was never handled");
	}
	for producer in 0..4 {
		let seq: Vec<u32> = handled.iter().filter(|(p, _)| *p == producer).map(|(_, n)| *n).collect();
		assert!(seq.windows(2).all(|w| w[0] < w[1]), "producer {producer} delivered out of order");
	}
}

#[tokio::test]
async fn trace_chain_continues_across_workers() {
	let monitor = Monitor::start(MonitorConfig::default());
	let traces = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&traces);
	let downstream = Worker::builder("downstream", &monitor)
		.router(Router::new().handle(PUSH, move |ctx, _: u32| sink.lock().push(ctx.trace_id().clone())))
		.loop_hook(|| {})
		.build()
		.unwrap();
	downstream.start().unwrap();

	let forward = downstream.sender();
	let upstream = Worker::builder("upstream", &monitor)
		.router(Router::new().handle(PUSH, move |ctx, n: u32| {
			forward.try_send_traced(ctx.trace_id(), PUSH, n).unwrap();
		}))
		.loop_hook(|| {})
		.build()
		.unwrap();
	upstream.start().unwrap();

	upstream.send_traced(&TraceId::from("origin.hop"), PUSH, 7).await;
	upstream.close().await;
	downstream.close().await;

	let traces = traces.lock();
	assert_eq!(traces.len(), 1);
	assert_eq!(traces[0].root(), "origin");
	assert_eq!(traces[0].as_str().split('.').count(), 2);
}

#[tokio::test]
async fn dropping_worker_lets_loop_drain_and_exit() {
	let monitor = Monitor::start(MonitorConfig::default());
	let seen = Arc::new(Mutex::new(Vec::new()));
	let (exited_tx, exited_rx) = tokio::sync::oneshot::channel();
	let worker = Worker::builder("dropped", &monitor)
		.router(recording_router(&seen))
		.loop_hook(|| {})
		.after_loop(move || {
			let _ = exited_tx.send(());
		})
		.build()
		.unwrap();
	worker.start().unwrap();
	worker.send(PUSH, 5).await;
	drop(worker);

	tokio::time::timeout(Duration::from_secs(1), exited_rx)
		.await
		.expect("loop should exit after drop")
		.unwrap();
	assert_eq!(*seen.lock(), vec![5]);
}
