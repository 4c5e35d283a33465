/// Identifies a submitted job, unique per executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(super) u64);

impl std::fmt::Display for JobId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
	/// The process exited on its own, death by signal is reported as `128 + signal`.
	Exited(i32),
	/// Stopped by [`kill()`](super::SerializedExecutor::kill) while running.
	Killed,
	/// Still waiting when [`kill()`](super::SerializedExecutor::kill) cleared the queue, never started.
	Discarded,
	/// The process could not be started.
	SpawnFailed(String),
	/// Waiting for the process failed.
	WaitFailed(String),
}

impl JobOutcome {
	/// Exit code, failures without one get a synthetic non-zero code.
	pub fn code(&self) -> i32 {
		match self {
			JobOutcome::Exited(code) => *code,
			JobOutcome::SpawnFailed(_) => 127,
			JobOutcome::Killed | JobOutcome::Discarded | JobOutcome::WaitFailed(_) => -1,
		}
	}

	pub fn success(&self) -> bool {
		matches!(self, JobOutcome::Exited(0))
	}
}

impl std::fmt::Display for JobOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			JobOutcome::Exited(code) => write!(f, "exited with code {}", code),
			JobOutcome::Killed => f.write_str("killed"),
			JobOutcome::Discarded => f.write_str("discarded"),
			JobOutcome::SpawnFailed(e) => write!(f, "failed to start: {}", e),
			JobOutcome::WaitFailed(e) => write!(f, "failed while waiting: {}", e),
		}
	}
}

pub type StartCallback = Box<dyn FnOnce(JobId) + Send>;
pub type CompletionCallback = Box<dyn FnOnce(JobId, JobOutcome) + Send>;

/// One run of an external program.
///
/// The command line is `command` followed by `options` and `targets`.
pub struct ExecutionJob {
	pub(super) id: JobId,
	pub label: String,
	pub command: Vec<String>,
	pub options: Vec<String>,
	pub targets: Vec<String>,
	pub(super) on_start: Option<StartCallback>,
	pub(super) on_complete: CompletionCallback,
}

impl ExecutionJob {
	pub fn new(label: impl Into<String>, command: Vec<String>) -> Self {
		Self {
			id: JobId::default(),
			label: label.into(),
			command,
			options: Vec::new(),
			targets: Vec::new(),
			on_start: None,
			on_complete: Box::new(|_, _| {}),
		}
	}

	pub fn with_options(mut self, options: Vec<String>) -> Self {
		self.options = options;
		self
	}

	pub fn with_targets(mut self, targets: Vec<String>) -> Self {
		self.targets = targets;
		self
	}

	/// Called once the process is running.
	pub fn on_start(mut self, f: impl FnOnce(JobId) + Send + 'static) -> Self {
		self.on_start = Some(Box::new(f));
		self
	}

	/// Called exactly once with the outcome, also for jobs that never started.
	pub fn on_complete(mut self, f: impl FnOnce(JobId, JobOutcome) + Send + 'static) -> Self {
		self.on_complete = Box::new(f);
		self
	}

	pub fn id(&self) -> JobId {
		self.id
	}

	/// Full command line.
	pub fn argv(&self) -> Vec<String> {
		self.command.iter().chain(&self.options).chain(&self.targets).cloned().collect()
	}
}

impl std::fmt::Debug for ExecutionJob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExecutionJob")
			.field("id", &self.id)
			.field("label", &self.label)
			.field("argv", &self.argv())
			.finish()
	}
}

/// Broadcast to observers as jobs move through the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
	Queued { id: JobId, label: String },
	Started { id: JobId, label: String },
	Finished { id: JobId, outcome: JobOutcome },
	Discarded { id: JobId },
}
