use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

use emerge_rs::executor::*;
use emerge_rs_test_utils::sh_command;

const TIMEOUT: Duration = Duration::from_secs(10);

fn init_log() {
	let _ = env_logger::builder().is_test(true).try_init();
}

fn executor(sink: Arc<MemorySink>) -> SerializedExecutor {
	SerializedExecutor::new(sink, Duration::from_millis(200))
}

/// Job running `script`, the receiver resolves with its outcome.
fn job(script: &str) -> (ExecutionJob, oneshot::Receiver<JobOutcome>) {
	let (tx, rx) = oneshot::channel();
	let job = ExecutionJob::new("test", sh_command(script))
		.on_complete(move |_, outcome| { let _ = tx.send(outcome); });
	(job, rx)
}

async fn outcome(rx: oneshot::Receiver<JobOutcome>) -> JobOutcome {
	tokio::time::timeout(TIMEOUT, rx).await.expect("job timed out").expect("completion dropped")
}

#[tokio::test]
async fn one_job_at_a_time() {
	init_log();
	let executor = executor(Arc::new(MemorySink::new()));
	let in_flight = Arc::new(AtomicUsize::new(0));
	let peak = Arc::new(AtomicUsize::new(0));

	let mut receivers = Vec::new();
	for _ in 0..3 {
		let (tx, rx) = oneshot::channel();
		let (start_count, start_peak) = (in_flight.clone(), peak.clone());
		let done_count = in_flight.clone();
		let job = ExecutionJob::new("sleep", sh_command("sleep 0.1"))
			.on_start(move |_| {
				let now = start_count.fetch_add(1, Ordering::SeqCst) + 1;
				start_peak.fetch_max(now, Ordering::SeqCst);
			})
			.on_complete(move |_, outcome| {
				done_count.fetch_sub(1, Ordering::SeqCst);
				let _ = tx.send(outcome);
			});
		executor.submit(job);
		receivers.push(rx);
	}
	assert!(executor.queued() >= 2);

	for rx in receivers {
		assert_eq!(outcome(rx).await, JobOutcome::Exited(0));
	}
	assert_eq!(peak.load(Ordering::SeqCst), 1);
	assert!(!executor.is_busy());
}

#[tokio::test]
async fn jobs_run_in_submission_order() {
	init_log();
	let sink = Arc::new(MemorySink::new());
	let executor = executor(sink.clone());

	let (first, first_rx) = job("echo first");
	let (second, second_rx) = job("echo second \"$@\"");
	let first_id = executor.submit(first);
	let second_id = executor.submit(second.with_options(vec!["--oneshot".to_string()]).with_targets(vec!["=app-misc/foo-1.0".to_string()]));
	assert!(first_id < second_id);

	assert_eq!(outcome(first_rx).await, JobOutcome::Exited(0));
	assert_eq!(outcome(second_rx).await, JobOutcome::Exited(0));
	/* The sink is reset for every job */
	assert_eq!(sink.lines(), vec!["second --oneshot =app-misc/foo-1.0".to_string()]);
	assert_eq!(sink.resets(), 2);
}

#[tokio::test]
async fn output_and_exit_code() {
	init_log();
	let sink = Arc::new(MemorySink::new());
	let executor = executor(sink.clone());

	let (job, rx) = job("echo out; echo err >&2; exit 3");
	executor.submit(job);
	let result = outcome(rx).await;
	assert_eq!(result, JobOutcome::Exited(3));
	assert_eq!(result.code(), 3);
	assert!(!result.success());

	let lines = sink.lines();
	assert!(lines.contains(&"out".to_string()));
	assert!(lines.contains(&"err".to_string()));
}

#[tokio::test]
async fn spawn_failure_does_not_stall_queue() {
	init_log();
	let executor = executor(Arc::new(MemorySink::new()));

	let (tx, rx) = oneshot::channel();
	let broken = ExecutionJob::new("broken", vec!["/nonexistent/emerge".to_string()])
		.on_complete(move |_, outcome| { let _ = tx.send(outcome); });
	executor.submit(broken);
	let (next, next_rx) = job("exit 0");
	executor.submit(next);

	let failed = outcome(rx).await;
	assert!(matches!(failed, JobOutcome::SpawnFailed(_)));
	assert_eq!(failed.code(), 127);
	assert_eq!(outcome(next_rx).await, JobOutcome::Exited(0));
}

#[tokio::test]
async fn kill_discards_queue() {
	init_log();
	let executor = executor(Arc::new(MemorySink::new()));
	let mut events = executor.events();

	let (started_tx, started_rx) = oneshot::channel();
	let (long_tx, long_rx) = oneshot::channel();
	let long = ExecutionJob::new("long", sh_command("sleep 30"))
		.on_start(move |id| { let _ = started_tx.send(id); })
		.on_complete(move |_, outcome| { let _ = long_tx.send(outcome); });
	let long_id = executor.submit(long);
	let (queued, queued_rx) = job("exit 0");
	let queued_id = executor.submit(queued);

	let started = tokio::time::timeout(TIMEOUT, started_rx).await.unwrap().unwrap();
	assert_eq!(started, long_id);
	assert_eq!(executor.current_job(), Some(long_id));

	assert!(executor.kill().await);
	assert_eq!(outcome(queued_rx).await, JobOutcome::Discarded);
	let killed = outcome(long_rx).await;
	assert_eq!(killed, JobOutcome::Killed);
	assert_eq!(killed.code(), -1);

	let mut discarded = false;
	while let Ok(event) = events.try_recv() {
		if event == (ExecutorEvent::Discarded { id: queued_id }) {
			discarded = true;
		}
	}
	assert!(discarded);

	let (after, after_rx) = job("exit 0");
	executor.submit(after);
	assert_eq!(outcome(after_rx).await, JobOutcome::Exited(0));
	assert!(!executor.kill().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn killed_jobs_never_start() {
	init_log();
	let dir = tempfile::tempdir().unwrap();
	let executor = executor(Arc::new(MemorySink::new()));

	for i in 0..10 {
		let marker = dir.path().join(format!("ran-{}", i));
		let (job, rx) = job(&format!("sleep 0.1; touch '{}'", marker.display()));
		executor.submit(job);
		executor.kill().await;

		let result = outcome(rx).await;
		assert!(matches!(result, JobOutcome::Discarded | JobOutcome::Killed), "job {} ended with {:?}", i, result);
		tokio::time::sleep(Duration::from_millis(150)).await;
		assert!(!marker.exists(), "job {} ran after being killed", i);
	}
	assert!(!executor.is_busy());
}

#[tokio::test]
async fn shutdown_leaves_queue_alone() {
	init_log();
	let executor = executor(Arc::new(MemorySink::new()));
	executor.shutdown();

	let (job, mut rx) = job("exit 0");
	executor.submit(job);
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(executor.queued(), 1);
	assert!(!executor.is_busy());
	assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn pause_and_resume() {
	init_log();
	let executor = executor(Arc::new(MemorySink::new()));
	assert!(!executor.pause());

	let (started_tx, started_rx) = oneshot::channel();
	let (done_tx, done_rx) = oneshot::channel();
	let job = ExecutionJob::new("sleep", sh_command("sleep 0.3"))
		.on_start(move |_| { let _ = started_tx.send(()); })
		.on_complete(move |_, outcome| { let _ = done_tx.send(outcome); });
	executor.submit(job);

	tokio::time::timeout(TIMEOUT, started_rx).await.unwrap().unwrap();
	assert!(executor.pause());
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert!(executor.is_busy());
	assert!(executor.resume());
	assert_eq!(outcome(done_rx).await, JobOutcome::Exited(0));
}
