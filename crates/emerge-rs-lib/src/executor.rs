//! Runs external package manager processes one at a time.
//!
//! Jobs wait in a FIFO queue, a single runner task takes the admission permit, pops a job and runs it to
//! completion before releasing the permit again. Submitting never waits for the runner.

mod job;
pub use job::*;
mod output;
pub use output::*;
pub mod process;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead};
use tokio::sync::{broadcast, Notify, Semaphore};

use process::Signal;

#[derive(Debug)]
struct RunningJob {
	id: JobId,
	/// Process group of the running process, `None` until spawned.
	pgid: Option<u32>,
	killed: bool,
}

struct Inner {
	queue: Mutex<VecDeque<ExecutionJob>>,
	available: Notify,
	/// Single permit, held by the runner while a job executes.
	admission: Semaphore,
	current: Mutex<Option<RunningJob>>,
	next_id: AtomicU64,
	sink: Arc<dyn OutputSink>,
	grace: Duration,
	events: broadcast::Sender<ExecutorEvent>,
}

/// Handle to the executor, clones share the same queue.
#[derive(Clone)]
pub struct SerializedExecutor {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for SerializedExecutor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SerializedExecutor")
			.field("queued", &self.queued())
			.field("current", &self.current_job())
			.finish()
	}
}

impl SerializedExecutor {
	/// Starts the runner task.
	///
	/// `grace` is how long a killed process group has between `SIGTERM` and `SIGKILL`.
	///
	/// # Panics
	/// When called outside of a tokio runtime.
	pub fn new(sink: Arc<dyn OutputSink>, grace: Duration) -> Self {
		let (events, _) = broadcast::channel(64);
		let inner = Arc::new(Inner {
			queue: Mutex::new(VecDeque::new()),
			available: Notify::new(),
			admission: Semaphore::new(1),
			current: Mutex::new(None),
			next_id: AtomicU64::new(1),
			sink,
			grace,
			events,
		});
		tokio::spawn(run(inner.clone()));
		Self { inner }
	}

	/// Queues `job`, it starts as soon as every job before it finished.
	pub fn submit(&self, mut job: ExecutionJob) -> JobId {
		let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
		job.id = id;
		log::debug!("Queueing job {} ({})", id, job.label);
		let _ = self.inner.events.send(ExecutorEvent::Queued { id, label: job.label.clone() });
		self.inner.lock_queue().push_back(job);
		self.inner.available.notify_one();
		id
	}

	/// Kills the running process group and discards everything still queued.
	///
	/// Discarded jobs complete with [`JobOutcome::Discarded`]. Returns `false` if nothing was running.
	pub async fn kill(&self) -> bool {
		/* Same lock order as the runner, a job is either still queued or already current */
		let (discarded, pgid) = {
			let mut queue = self.inner.lock_queue();
			let discarded: Vec<ExecutionJob> = queue.drain(..).collect();
			let pgid = match self.inner.lock_current().as_mut() {
				Some(running) => {
					running.killed = true;
					Some(running.pgid)
				},
				None => None,
			};
			(discarded, pgid)
		};

		for job in discarded {
			log::info!("Discarding job {} ({})", job.id, job.label);
			let _ = self.inner.events.send(ExecutorEvent::Discarded { id: job.id });
			(job.on_complete)(job.id, JobOutcome::Discarded);
		}

		match pgid {
			Some(Some(pgid)) => {
				terminate_group(pgid, self.inner.grace).await;
				true
			},
			/* Not spawned yet, the runner checks the flag before and after spawning */
			Some(None) => true,
			None => false,
		}
	}

	/// Stops the running process group, returns `false` if nothing was running.
	pub fn pause(&self) -> bool {
		self.signal_current(Signal::Stop)
	}

	pub fn resume(&self) -> bool {
		self.signal_current(Signal::Continue)
	}

	fn signal_current(&self, signal: Signal) -> bool {
		let Some(pgid) = self.inner.lock_current().as_ref().and_then(|r| r.pgid) else {
			return false
		};
		match process::signal_group(pgid, signal) {
			Ok(()) => {
				log::debug!("Sent {:?} to process group {}", signal, pgid);
				true
			},
			Err(e) => {
				log::warn!("Failed to send {:?} to process group {}: {}", signal, pgid, e);
				false
			},
		}
	}

	pub fn is_busy(&self) -> bool {
		self.inner.lock_current().is_some()
	}

	pub fn current_job(&self) -> Option<JobId> {
		self.inner.lock_current().as_ref().map(|r| r.id)
	}

	/// Jobs waiting behind the current one.
	pub fn queued(&self) -> usize {
		self.inner.lock_queue().len()
	}

	pub fn events(&self) -> broadcast::Receiver<ExecutorEvent> {
		self.inner.events.subscribe()
	}

	/// Stops the runner after the current job, queued jobs and jobs submitted later are left unstarted.
	pub fn shutdown(&self) {
		self.inner.admission.close();
		self.inner.available.notify_one();
	}
}

impl Inner {
	fn lock_queue(&self) -> MutexGuard<'_, VecDeque<ExecutionJob>> {
		self.queue.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn lock_current(&self) -> MutexGuard<'_, Option<RunningJob>> {
		self.current.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Pops the next job and makes it current in one step.
	async fn next_job(&self) -> Option<ExecutionJob> {
		loop {
			if self.admission.is_closed() {
				return None;
			}
			{
				let mut queue = self.lock_queue();
				if let Some(job) = queue.pop_front() {
					*self.lock_current() = Some(RunningJob { id: job.id, pgid: None, killed: false });
					return Some(job);
				}
			}
			self.available.notified().await;
		}
	}

	async fn execute(&self, mut job: ExecutionJob) {
		let id = job.id;
		if self.lock_current().as_ref().map_or(false, |r| r.killed) {
			self.lock_current().take();
			log::info!("Job {} ({}) killed before it started", id, job.label);
			let _ = self.events.send(ExecutorEvent::Discarded { id });
			(job.on_complete)(id, JobOutcome::Discarded);
			return;
		}
		self.sink.reset();
		log::info!("Starting job {} ({}): {}", id, job.label, job.argv().join(" "));
		let _ = self.events.send(ExecutorEvent::Started { id, label: job.label.clone() });

		let outcome = self.run_process(&mut job).await;

		let killed = self.lock_current().take().map_or(false, |r| r.killed);
		let outcome = match outcome {
			JobOutcome::Exited(_) if killed => JobOutcome::Killed,
			outcome => outcome,
		};
		log::info!("Job {} ({}) {}", id, job.label, outcome);
		let _ = self.events.send(ExecutorEvent::Finished { id, outcome: outcome.clone() });
		(job.on_complete)(id, outcome);
	}

	async fn run_process(&self, job: &mut ExecutionJob) -> JobOutcome {
		let Some((program, args)) = job.command.split_first() else {
			return JobOutcome::SpawnFailed("empty command".to_string())
		};

		let mut child = match process::command(program, args.iter().chain(&job.options).chain(&job.targets)).spawn() {
			Ok(child) => child,
			Err(e) => {
				log::error!("Failed to start `{}`: {}", program, e);
				return JobOutcome::SpawnFailed(e.to_string());
			},
		};

		let pgid = child.id();
		let killed_early = match self.lock_current().as_mut() {
			Some(running) => {
				running.pgid = pgid;
				running.killed
			},
			None => false,
		};
		if let (true, Some(pgid)) = (killed_early, pgid) {
			terminate_group(pgid, self.grace).await;
		}

		if let Some(on_start) = job.on_start.take() {
			on_start(job.id);
		}

		let pumps: Vec<_> = [
			child.stdout.take().map(|out| tokio::spawn(forward(out, self.sink.clone()))),
			child.stderr.take().map(|err| tokio::spawn(forward(err, self.sink.clone()))),
		].into_iter().flatten().collect();

		let status = child.wait().await;
		if let Some(running) = self.lock_current().as_mut() {
			running.pgid = None;
		}
		for pump in pumps {
			let _ = pump.await;
		}

		match status {
			Ok(status) => JobOutcome::Exited(process::exit_code(&status)),
			Err(e) => {
				log::error!("Failed waiting for job {}: {}", job.id, e);
				JobOutcome::WaitFailed(e.to_string())
			},
		}
	}
}

async fn run(inner: Arc<Inner>) {
	loop {
		let permit = match inner.admission.acquire().await {
			Ok(permit) => permit,
			Err(_) => break,
		};
		let Some(job) = inner.next_job().await else { break };
		inner.execute(job).await;
		drop(permit);
	}
	log::debug!("Executor runner stopped");
}

async fn forward(reader: impl AsyncRead + Unpin, sink: Arc<dyn OutputSink>) {
	let mut lines = tokio::io::BufReader::new(reader).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => sink.line(&line),
			Ok(None) => break,
			Err(e) => {
				log::warn!("Failed reading job output: {}", e);
				break;
			},
		}
	}
}

/// `SIGTERM`, then `SIGKILL` if the group is still around after `grace`.
async fn terminate_group(pgid: u32, grace: Duration) {
	log::info!("Terminating process group {}", pgid);
	if let Err(e) = process::signal_group(pgid, Signal::Terminate) {
		log::debug!("Process group {} already gone: {}", pgid, e);
		return;
	}
	/* A stopped group only sees the SIGTERM once continued */
	let _ = process::signal_group(pgid, Signal::Continue);

	let deadline = tokio::time::Instant::now() + grace;
	while tokio::time::Instant::now() < deadline {
		if !process::group_alive(pgid) {
			return;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	if process::group_alive(pgid) {
		log::warn!("Process group {} ignored SIGTERM, killing", pgid);
		if let Err(e) = process::signal_group(pgid, Signal::Kill) {
			log::debug!("Failed to kill process group {}: {}", pgid, e);
		}
	}
}
