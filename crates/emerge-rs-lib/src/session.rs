//! Ties the tree, overlay, executor and progress tracking together.
//!
//! A single task owns the [`OperationTree`] and [`PendingOverlay`], every mutation is a request sent to it
//! so callers, job callbacks and trackers never race each other. [`Session`] is the cloneable handle.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::Config;
use crate::catalog::PackageCatalog;
use crate::error::Error;
use crate::executor::*;
use crate::operation_tree::*;
use crate::overlay::*;
use crate::package::{PackageRef, Target};
use crate::progress::*;

/// Options for install and uninstall runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
	/// Only ask the package manager what it would do, nothing is committed or removed from the tree.
	pub pretend: bool,
	/// Passed to the package manager as is.
	pub extra: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
	/// Sets to update, `world` when empty.
	pub sets: Vec<String>,
	pub newuse: bool,
	pub deep: bool,
	pub pretend: bool,
	pub extra: Vec<String>,
}

impl Default for UpdateOptions {
	fn default() -> Self {
		Self {
			sets: vec!["world".to_string()],
			newuse: false,
			deep: false,
			pretend: false,
			extra: Vec::new(),
		}
	}
}

/// Resolves once a submitted job finished and the tree reflects it.
#[derive(Debug)]
pub struct JobReceipt {
	id: JobId,
	outcome: oneshot::Receiver<JobOutcome>,
}

impl JobReceipt {
	pub fn id(&self) -> JobId {
		self.id
	}

	/// Outcome of the job, [`Discarded`](JobOutcome::Discarded) if the session went away first.
	pub async fn wait(self) -> JobOutcome {
		self.outcome.await.unwrap_or(JobOutcome::Discarded)
	}
}

enum Run {
	Install(MergeOptions),
	Uninstall(MergeOptions),
	Update(UpdateOptions),
	Sync,
}

type Reply<T> = oneshot::Sender<T>;

enum Request {
	Append { target: Target, kind: QueueKind, options: AppendOptions, reply: Reply<Result<(), QueueError>> },
	UpdateAppend { package: PackageRef, kind: QueueKind, options: AppendOptions, reply: Reply<Result<(), QueueError>> },
	Remove { package: PackageRef, kind: QueueKind, reply: Reply<Result<usize, QueueError>> },
	Clear { kind: QueueKind, reply: Reply<usize> },
	SetAttribute { target: Target, value: AttributeValue, reply: Reply<crate::Result<()>> },
	Revert { package: PackageRef, reply: Reply<()> },
	Commit { reply: Reply<Result<CommitSummary, CommitError>> },
	PendingEdits { reply: Reply<Vec<PendingEdit>> },
	Snapshot { reply: Reply<QueueSnapshot> },
	TreeEmpty { reply: Reply<bool> },
	Execute { run: Run, reply: Reply<crate::Result<Vec<JobReceipt>>> },
}

/// Sent by executor callbacks.
enum Notice {
	Started(JobId),
	Finished(JobId, JobOutcome),
}

/// Handle to a running session.
///
/// The session stops once every handle is dropped.
#[derive(Clone)]
pub struct Session {
	requests: mpsc::UnboundedSender<Request>,
	executor: SerializedExecutor,
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session").field("executor", &self.executor).finish()
	}
}

impl Session {
	/// Spawns the session and its executor.
	///
	/// # Panics
	/// When called outside of a tokio runtime.
	pub fn start(config: Config, catalog: Arc<dyn PackageCatalog>, store: impl ConfigStore + 'static, probe: Arc<dyn ActiveUnitProbe>, sink: Arc<dyn OutputSink>) -> Self {
		let executor = SerializedExecutor::new(sink, config.kill_grace());
		let (requests, requests_rx) = mpsc::unbounded_channel();
		let (notices, notices_rx) = mpsc::unbounded_channel();
		let (tracker_events, tracker_rx) = mpsc::unbounded_channel();

		let actor = Actor {
			overlay: PendingOverlay::new(config.clone(), store),
			tree: OperationTree::new(),
			config,
			catalog,
			executor: executor.clone(),
			probe,
			notices,
			tracker_events,
			jobs: HashMap::new(),
		};
		tokio::spawn(actor.run(requests_rx, notices_rx, tracker_rx));
		Self { requests, executor }
	}

	/// Session working on the real configuration files, tracked with `qlop` and logging job output.
	pub fn with_defaults(config: Config, catalog: Arc<dyn PackageCatalog>) -> Self {
		let probe = Arc::new(QlopProbe::new(config.probe_command.clone()));
		Self::start(config, catalog, FsConfigStore::new(), probe, Arc::new(LogSink))
	}

	async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Request) -> crate::Result<T> {
		let (reply, response) = oneshot::channel();
		self.requests.send(build(reply)).map_err(|_| Error::SessionClosed)?;
		response.await.map_err(|_| Error::SessionClosed)
	}

	/* Queue */

	/// See [`OperationTree::append`].
	pub async fn append(&self, target: impl Into<Target>, kind: QueueKind, options: AppendOptions) -> crate::Result<()> {
		let target = target.into();
		Ok(self.request(|reply| Request::Append { target, kind, options, reply }).await??)
	}

	/// See [`OperationTree::update_append`].
	pub async fn update_append(&self, package: &PackageRef, kind: QueueKind, options: AppendOptions) -> crate::Result<()> {
		let package = package.clone();
		Ok(self.request(|reply| Request::UpdateAppend { package, kind, options, reply }).await??)
	}

	/// Removes `package` with its subtree and drops the pending edits of the removed packages.
	pub async fn remove(&self, package: &PackageRef, kind: QueueKind) -> crate::Result<usize> {
		let package = package.clone();
		Ok(self.request(|reply| Request::Remove { package, kind, reply }).await??)
	}

	pub async fn clear(&self, kind: QueueKind) -> crate::Result<usize> {
		self.request(|reply| Request::Clear { kind, reply }).await
	}

	pub async fn snapshot(&self) -> crate::Result<QueueSnapshot> {
		self.request(|reply| Request::Snapshot { reply }).await
	}

	/// `true` when nothing is queued and no job is running.
	pub async fn is_empty(&self) -> crate::Result<bool> {
		let tree_empty = self.request(|reply| Request::TreeEmpty { reply }).await?;
		Ok(tree_empty && !self.executor.is_busy())
	}

	/* Overlay */

	/// Records a pending edit and rebuilds the subtree if the package is queued.
	///
	/// # Errors
	/// - [`NotFound`](Error::NotFound) when no version matches `target`.
	/// - [`IO`](Error::IO) when the configuration files can't be read.
	/// - [`Queue`](Error::Queue) when the rebuilt subtree no longer resolves, the package is dropped from the tree.
	pub async fn set_attribute(&self, target: impl Into<Target>, value: AttributeValue) -> crate::Result<()> {
		let target = target.into();
		self.request(|reply| Request::SetAttribute { target, value, reply }).await?
	}

	pub async fn revert(&self, package: &PackageRef) -> crate::Result<()> {
		let package = package.clone();
		self.request(|reply| Request::Revert { package, reply }).await
	}

	/// See [`PendingOverlay::commit`].
	pub async fn commit(&self) -> crate::Result<CommitSummary> {
		Ok(self.request(|reply| Request::Commit { reply }).await??)
	}

	pub async fn pending_edits(&self) -> crate::Result<Vec<PendingEdit>> {
		self.request(|reply| Request::PendingEdits { reply }).await
	}

	/* Execution */

	async fn execute(&self, run: Run) -> crate::Result<Vec<JobReceipt>> {
		self.request(|reply| Request::Execute { run, reply }).await?
	}

	/// Merges the queued installs, one job per group of selections.
	///
	/// Returns no receipts when nothing is selected.
	pub async fn install(&self, options: MergeOptions) -> crate::Result<Vec<JobReceipt>> {
		self.execute(Run::Install(options)).await
	}

	pub async fn uninstall(&self, options: MergeOptions) -> crate::Result<Vec<JobReceipt>> {
		self.execute(Run::Uninstall(options)).await
	}

	pub async fn update_all(&self, options: UpdateOptions) -> crate::Result<Vec<JobReceipt>> {
		self.execute(Run::Update(options)).await
	}

	/// Syncs the package tree, one job per configured sync command.
	pub async fn sync(&self) -> crate::Result<Vec<JobReceipt>> {
		self.execute(Run::Sync).await
	}

	pub fn pause(&self) -> bool {
		self.executor.pause()
	}

	pub fn resume(&self) -> bool {
		self.executor.resume()
	}

	/// See [`SerializedExecutor::kill`].
	pub async fn kill(&self) -> bool {
		self.executor.kill().await
	}

	pub fn events(&self) -> broadcast::Receiver<ExecutorEvent> {
		self.executor.events()
	}
}

/// What a submitted job is about.
struct JobPlan {
	label: &'static str,
	command: Vec<String>,
	options: Vec<String>,
	targets: Vec<String>,
	kind: Option<QueueKind>,
	/// Tree nodes the job works on.
	units: Vec<PackageRef>,
	pretend: bool,
	tracked: bool,
	reload_all: bool,
}

struct JobRecord {
	plan: JobPlan,
	tracker: Option<ProgressTracker>,
	/// Units the tracker already reported.
	finished: HashSet<PackageRef>,
	receipt: Option<Reply<JobOutcome>>,
}

struct Actor {
	config: Config,
	catalog: Arc<dyn PackageCatalog>,
	tree: OperationTree,
	overlay: PendingOverlay,
	executor: SerializedExecutor,
	probe: Arc<dyn ActiveUnitProbe>,
	notices: mpsc::UnboundedSender<Notice>,
	tracker_events: mpsc::UnboundedSender<TrackerEvent>,
	jobs: HashMap<JobId, JobRecord>,
}

impl Actor {
	async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>, mut notices: mpsc::UnboundedReceiver<Notice>, mut tracker_events: mpsc::UnboundedReceiver<TrackerEvent>) {
		loop {
			tokio::select! {
				request = requests.recv() => match request {
					Some(request) => self.handle_request(request),
					None => break,
				},
				Some(notice) = notices.recv() => match notice {
					Notice::Started(id) => self.job_started(id),
					Notice::Finished(id, outcome) => self.job_finished(id, outcome),
				},
				Some(TrackerEvent::UnitFinished { job, unit }) = tracker_events.recv() => self.unit_finished(job, &unit),
			}
		}

		for (_, job) in self.jobs.drain() {
			if let Some(tracker) = job.tracker {
				tracker.stop();
			}
		}
		self.executor.shutdown();
		log::debug!("Session stopped");
	}

	fn handle_request(&mut self, request: Request) {
		/* A caller that stopped waiting doesn't care about the answer */
		match request {
			Request::Append { target, kind, options, reply } => {
				let _ = reply.send(self.tree.append(self.catalog.as_ref(), &mut self.overlay, target, kind, options));
			},
			Request::UpdateAppend { package, kind, options, reply } => {
				let _ = reply.send(self.tree.update_append(self.catalog.as_ref(), &mut self.overlay, &package, kind, options));
			},
			Request::Remove { package, kind, reply } => {
				let _ = reply.send(self.tree.remove_subtree(&mut self.overlay, &package, kind, true));
			},
			Request::Clear { kind, reply } => {
				let _ = reply.send(self.tree.clear(&mut self.overlay, kind, true));
			},
			Request::SetAttribute { target, value, reply } => {
				let _ = reply.send(self.set_attribute(&target, value));
			},
			Request::Revert { package, reply } => {
				self.overlay.revert(&package);
				let _ = reply.send(());
			},
			Request::Commit { reply } => {
				let _ = reply.send(self.overlay.commit(self.catalog.as_ref()));
			},
			Request::PendingEdits { reply } => {
				let _ = reply.send(self.overlay.all_edits());
			},
			Request::Snapshot { reply } => {
				let _ = reply.send(self.tree.snapshot());
			},
			Request::TreeEmpty { reply } => {
				let _ = reply.send(self.tree.is_empty());
			},
			Request::Execute { run, reply } => {
				let _ = reply.send(self.execute(run));
			},
		}
	}

	fn set_attribute(&mut self, target: &Target, value: AttributeValue) -> crate::Result<()> {
		let specifier = target.to_specifier();
		let record = self.catalog.resolve(&specifier, false)
			.or_else(|| self.catalog.resolve(&specifier, true))
			.ok_or_else(|| Error::NotFound(specifier.to_string()))?;
		self.overlay.set(&record, value)?;

		for kind in [QueueKind::Install, QueueKind::Update] {
			if self.tree.contains(kind, &record.package) {
				self.tree.update_append(self.catalog.as_ref(), &mut self.overlay, &record.package, kind, AppendOptions::default())?;
			}
		}
		Ok(())
	}

	fn execute(&mut self, run: Run) -> crate::Result<Vec<JobReceipt>> {
		let plans = self.plan(run);
		if plans.is_empty() {
			log::info!("Nothing to run");
			return Ok(Vec::new());
		}

		let writes = plans.iter().any(|p| !p.pretend && p.kind.is_some());
		if writes && self.overlay.is_dirty() {
			self.overlay.commit(self.catalog.as_ref())?;
		}
		Ok(plans.into_iter().map(|plan| self.submit(plan)).collect())
	}

	fn plan(&self, run: Run) -> Vec<JobPlan> {
		let merge = &self.config.merge_command;
		match run {
			Run::Install(options) => {
				let normal = self.tree.selections(false).to_vec();
				let oneshot = self.tree.selections(true).to_vec();
				/* With a single group the job covers the whole install queue */
				let whole_queue = normal.is_empty() || oneshot.is_empty();

				[(normal, false), (oneshot, true)].into_iter()
					.filter(|(selection, _)| !selection.is_empty())
					.map(|(selection, is_oneshot)| {
						let mut arguments = Vec::new();
						if is_oneshot {
							arguments.push("--oneshot".to_string());
						}
						arguments.extend(pretend_arguments(options.pretend));
						arguments.extend(options.extra.iter().cloned());
						JobPlan {
							label: "install",
							command: merge.clone(),
							options: arguments,
							targets: selection.iter().map(|p| format!("={}", p)).collect(),
							kind: Some(QueueKind::Install),
							units: if whole_queue { self.tree.top_level(QueueKind::Install) } else { selection },
							pretend: options.pretend,
							tracked: true,
							reload_all: false,
						}
					})
					.collect()
			},
			Run::Uninstall(options) => {
				let units = self.tree.top_level(QueueKind::Uninstall);
				if units.is_empty() {
					return Vec::new();
				}
				let mut arguments = vec!["--unmerge".to_string()];
				arguments.extend(pretend_arguments(options.pretend));
				arguments.extend(options.extra);
				vec![JobPlan {
					label: "uninstall",
					command: merge.clone(),
					options: arguments,
					targets: units.iter().map(|p| format!("={}", p)).collect(),
					kind: Some(QueueKind::Uninstall),
					units,
					pretend: options.pretend,
					tracked: false,
					reload_all: false,
				}]
			},
			Run::Update(options) => {
				let mut arguments = vec!["--update".to_string()];
				if options.newuse {
					arguments.push("--newuse".to_string());
				}
				if options.deep {
					arguments.push("--deep".to_string());
				}
				arguments.extend(pretend_arguments(options.pretend));
				arguments.extend(options.extra);
				let targets = if options.sets.is_empty() { vec!["world".to_string()] } else { options.sets };
				vec![JobPlan {
					label: "update",
					command: merge.clone(),
					options: arguments,
					targets,
					kind: Some(QueueKind::Update),
					units: self.tree.top_level(QueueKind::Update),
					pretend: options.pretend,
					tracked: true,
					reload_all: false,
				}]
			},
			Run::Sync => {
				let commands = self.config.sync_commands();
				let last = commands.len().saturating_sub(1);
				commands.into_iter().enumerate().map(|(i, command)| JobPlan {
					label: "sync",
					command,
					options: Vec::new(),
					targets: Vec::new(),
					kind: None,
					units: Vec::new(),
					pretend: false,
					tracked: false,
					reload_all: i == last,
				}).collect()
			},
		}
	}

	fn submit(&mut self, plan: JobPlan) -> JobReceipt {
		if let Some(kind) = plan.kind {
			self.tree.set_in_progress(kind, &plan.units, true);
		}

		/* The actor is the only receiver and outlives the executor callbacks it handed out */
		let started = self.notices.clone();
		let finished = self.notices.clone();
		let job = ExecutionJob::new(plan.label, plan.command.clone())
			.with_options(plan.options.clone())
			.with_targets(plan.targets.clone())
			.on_start(move |id| { let _ = started.send(Notice::Started(id)); })
			.on_complete(move |id, outcome| { let _ = finished.send(Notice::Finished(id, outcome)); });
		let id = self.executor.submit(job);

		let (receipt, outcome) = oneshot::channel();
		self.jobs.insert(id, JobRecord { plan, tracker: None, finished: HashSet::new(), receipt: Some(receipt) });
		JobReceipt { id, outcome }
	}

	fn job_started(&mut self, id: JobId) {
		let Some(job) = self.jobs.get_mut(&id) else { return };
		if job.plan.tracked && job.plan.kind.is_some() && !job.plan.units.is_empty() {
			job.tracker = Some(ProgressTracker::start(id, self.probe.clone(), self.config.poll_interval(), self.tracker_events.clone()));
		}
	}

	fn unit_finished(&mut self, id: JobId, unit: &str) {
		let Some(job) = self.jobs.get_mut(&id) else {
			log::trace!("Ignoring unit {} of finished job {}", unit, id);
			return
		};
		let Some(kind) = job.plan.kind else { return };

		let package = match resolve_unit(self.catalog.as_ref(), &self.tree, kind, unit) {
			Ok(package) => package,
			Err(e) => {
				log::warn!("Job {}: {}", id, e);
				return;
			},
		};
		if !job.finished.insert(package.clone()) || !self.tree.contains(kind, &package) {
			return;
		}
		log::info!("Job {} finished {}", id, package);
		if let Err(e) = self.tree.remove_subtree(&mut self.overlay, &package, kind, true) {
			log::warn!("Failed to remove finished unit {}: {}", package, e);
		}
	}

	fn job_finished(&mut self, id: JobId, outcome: JobOutcome) {
		let Some(mut job) = self.jobs.remove(&id) else {
			log::warn!("Completion for unknown job {}", id);
			return
		};
		if let Some(tracker) = job.tracker.take() {
			tracker.stop();
		}

		let plan = &job.plan;
		if let Some(kind) = plan.kind {
			let remaining: Vec<PackageRef> = plan.units.iter().filter(|p| self.tree.contains(kind, p)).cloned().collect();
			if outcome.success() && !plan.pretend {
				for package in &remaining {
					/* Earlier removals may have taken this one along */
					if self.tree.contains(kind, package) {
						if let Err(e) = self.tree.remove_subtree(&mut self.overlay, package, kind, true) {
							log::warn!("Failed to remove {} after job {}: {}", package, id, e);
						}
					}
				}
			} else {
				self.tree.set_in_progress(kind, &remaining, false);
			}

			if !plan.pretend {
				let categories: BTreeSet<&str> = plan.units.iter().map(|p| p.category()).collect();
				for category in categories {
					self.catalog.reload(Some(category));
				}
			}
		}
		if plan.reload_all && outcome.success() {
			self.catalog.reload(None);
		}

		log::debug!("Job {} done: {}", id, outcome);
		if let Some(receipt) = job.receipt.take() {
			let _ = receipt.send(outcome);
		}
	}
}

fn pretend_arguments(pretend: bool) -> Vec<String> {
	if pretend {
		vec!["--pretend".to_string(), "--verbose".to_string()]
	} else {
		Vec::new()
	}
}
