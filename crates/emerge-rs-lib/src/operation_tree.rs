//! Dependency aware queue of install, uninstall and update requests.
//!
//! Each queue kind has a permanent root node in a [`StableDiGraph`], requests hang off the root with their
//! not yet satisfied dependencies as children. A request is expanded completely on the side and only
//! attached once nothing failed, so a failed request never shows up in the tree.

mod node;
pub use node::*;
mod expansion;
use expansion::*;

use std::collections::{HashMap, HashSet};
use petgraph::prelude::*;
use serde::*;

use crate::catalog::*;
use crate::overlay::PendingOverlay;
use crate::package::*;

pub type QueueGraph = StableDiGraph<TreeNode, Position>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueKind {
	Install,
	Uninstall,
	Update,
}

impl QueueKind {
	pub const ALL: [QueueKind; 3] = [QueueKind::Install, QueueKind::Uninstall, QueueKind::Update];

	fn index(&self) -> usize {
		match self {
			QueueKind::Install => 0,
			QueueKind::Uninstall => 1,
			QueueKind::Update => 2,
		}
	}
}

impl std::fmt::Display for QueueKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			QueueKind::Install => "install",
			QueueKind::Uninstall => "uninstall",
			QueueKind::Update => "update",
		})
	}
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("{requested} is blocked by {blocker}")]
	Blocked { requested: PackageRef, blocker: PackageRef },
	#[error("no package satisfies {0}")]
	NotFound(String),
	#[error("{0} is not queued")]
	NotQueued(PackageRef),
	#[error("failed to read configuration: {0}")]
	Config(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOptions {
	/// Merge without recording the package as an explicit selection.
	pub oneshot: bool,
	/// Accept masked and testing versions, recording the unmask edits in the overlay.
	pub unmask: bool,
	/// Rebuild the subtree of an already queued package.
	pub force_update: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
	pub package: PackageRef,
	pub oneshot: bool,
	pub state: NodeState,
	pub metadata: NodeMetadata,
	pub children: Vec<NodeSnapshot>,
}

/// Serializable copy of the whole tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
	pub install: Vec<NodeSnapshot>,
	pub uninstall: Vec<NodeSnapshot>,
	pub update: Vec<NodeSnapshot>,
	pub selections: Vec<PackageRef>,
	pub oneshot_selections: Vec<PackageRef>,
}

#[derive(Debug)]
pub struct OperationTree {
	graph: QueueGraph,
	roots: [NodeIndex; 3],
	index: [HashMap<PackageRef, NodeIndex>; 3],
	/// Explicitly requested installs, recorded as selections by the package manager.
	selections: Vec<PackageRef>,
	/// Explicitly requested installs merged with `--oneshot`.
	oneshot_selections: Vec<PackageRef>,
	next_position: u64,
}

impl Default for OperationTree {
	fn default() -> Self {
		Self::new()
	}
}

impl OperationTree {
	pub fn new() -> Self {
		let mut graph = QueueGraph::default();
		let roots = QueueKind::ALL.map(|kind| graph.add_node(TreeNode::Root(kind)));
		Self {
			graph,
			roots,
			index: Default::default(),
			selections: Vec::new(),
			oneshot_selections: Vec::new(),
			next_position: 0,
		}
	}

	fn root(&self, kind: QueueKind) -> NodeIndex {
		self.roots[kind.index()]
	}

	fn operation(&self, idx: NodeIndex) -> Option<&OperationNode> {
		match self.graph.node_weight(idx) {
			Some(TreeNode::Operation(node)) => Some(node),
			_ => None,
		}
	}

	/// Children in the order they were attached.
	fn children_of(&self, parent: NodeIndex) -> Vec<NodeIndex> {
		let mut edges: Vec<(Position, NodeIndex)> = self.graph
			.edges_directed(parent, Outgoing)
			.map(|e| (*e.weight(), e.target()))
			.collect();
		edges.sort_by_key(|(p, _)| *p);
		edges.into_iter().map(|(_, n)| n).collect()
	}

	fn parent_edge(&self, idx: NodeIndex) -> Option<(NodeIndex, Position)> {
		self.graph.edges_directed(idx, Incoming).next().map(|e| (e.source(), *e.weight()))
	}

	fn is_root(&self, idx: NodeIndex) -> bool {
		self.roots.contains(&idx)
	}

	/// Walks up to the node directly below a root.
	fn top_level_ancestor(&self, mut idx: NodeIndex) -> NodeIndex {
		while let Some((parent, _)) = self.parent_edge(idx) {
			if self.is_root(parent) {
				break;
			}
			idx = parent;
		}
		idx
	}

	fn allocate_position(&mut self) -> Position {
		self.next_position += 1;
		Position(self.next_position)
	}

	/* Queries */

	pub fn contains(&self, kind: QueueKind, package: &PackageRef) -> bool {
		self.index[kind.index()].contains_key(package)
	}

	pub fn node(&self, kind: QueueKind, package: &PackageRef) -> Option<&OperationNode> {
		self.index[kind.index()].get(package).and_then(|idx| self.operation(*idx))
	}

	/// First level children of a queued package.
	pub fn children(&self, kind: QueueKind, package: &PackageRef) -> Vec<&OperationNode> {
		match self.index[kind.index()].get(package) {
			Some(idx) => self.children_of(*idx).into_iter().filter_map(|c| self.operation(c)).collect(),
			None => Vec::new(),
		}
	}

	/// Number of nodes below the root of `kind`.
	pub fn len(&self, kind: QueueKind) -> usize {
		self.index[kind.index()].len()
	}

	/// True when none of the roots has any nodes.
	pub fn is_empty(&self) -> bool {
		self.index.iter().all(HashMap::is_empty)
	}

	pub fn packages(&self, kind: QueueKind) -> impl Iterator<Item = &PackageRef> {
		self.index[kind.index()].keys()
	}

	/// Packages directly below the root.
	pub fn top_level(&self, kind: QueueKind) -> Vec<PackageRef> {
		self.children_of(self.root(kind))
			.into_iter()
			.filter_map(|idx| self.operation(idx).map(|n| n.package.clone()))
			.collect()
	}

	/// Every queued package of `kind`, parents before children.
	pub fn units(&self, kind: QueueKind) -> Vec<PackageRef> {
		let mut units = Vec::new();
		let mut stack = vec![self.root(kind)];
		while let Some(idx) = stack.pop() {
			if let Some(node) = self.operation(idx) {
				units.push(node.package.clone());
			}
			stack.extend(self.children_of(idx).into_iter().rev());
		}
		units
	}

	/// Explicit install requests, `oneshot` picks the ones not to be recorded as selections.
	pub fn selections(&self, oneshot: bool) -> &[PackageRef] {
		if oneshot { &self.oneshot_selections } else { &self.selections }
	}

	fn select(&mut self, package: &PackageRef, oneshot: bool) {
		self.selections.retain(|p| p != package);
		self.oneshot_selections.retain(|p| p != package);
		if oneshot {
			self.oneshot_selections.push(package.clone());
		} else {
			self.selections.push(package.clone());
		}
	}

	/* Insertion */

	/// Queues `target` and everything it needs.
	///
	/// Already queued packages are left alone unless [`force_update`](AppendOptions::force_update) is set.
	///
	/// # Errors
	/// - [`Blocked`](QueueError::Blocked) when the request conflicts with a queued or installed package.
	/// - [`NotFound`](QueueError::NotFound) when the request or one of its dependencies has no candidate.
	///
	/// On error the tree is unchanged.
	pub fn append(&mut self, catalog: &dyn PackageCatalog, overlay: &mut PendingOverlay, target: impl Into<Target>, kind: QueueKind, options: AppendOptions) -> Result<(), QueueError> {
		let target = target.into();
		if kind == QueueKind::Uninstall {
			return self.append_uninstall(catalog, &target);
		}

		if let Some(package) = self.queued_match(catalog, kind, &target) {
			if options.force_update {
				return self.update_append(catalog, overlay, &package, kind, options);
			}
			log::trace!("{} is already queued for {}", package, kind);
			if kind == QueueKind::Install {
				self.select(&package, options.oneshot);
			}
			return Ok(());
		}

		let seen: HashSet<PackageRef> = self.packages(kind).cloned().collect();
		let mut expansion = Expansion::new(catalog, overlay, kind, options.unmask, seen);
		let result = expansion.expand(&target, options.oneshot)
			.and_then(|subtree| match subtree {
				Some(s) => self.check_blocks(catalog, kind, &s).map(|_| Some(s)),
				None => Ok(None),
			});

		match result {
			Ok(Some(subtree)) => {
				let package = subtree.node.package.clone();
				let root = self.root(kind);
				self.attach(root, None, subtree);
				if kind == QueueKind::Install {
					self.select(&package, options.oneshot);
				}
				log::debug!("Queued {} for {}, {} nodes queued", package, kind, self.len(kind));
				Ok(())
			},
			Ok(None) => Ok(()),
			Err(e) => {
				log::warn!("Failed to queue {} for {}: {}", target, kind, e);
				expansion.rollback();
				Err(e)
			},
		}
	}

	/// The queued package `target` refers to, if any.
	fn queued_match(&self, catalog: &dyn PackageCatalog, kind: QueueKind, target: &Target) -> Option<PackageRef> {
		let package = match target {
			Target::Package(p) => p.clone(),
			Target::Specifier(s) => catalog.resolve(s, false).or_else(|| catalog.resolve(s, true))?.package,
		};
		self.contains(kind, &package).then_some(package)
	}

	fn append_uninstall(&mut self, catalog: &dyn PackageCatalog, target: &Target) -> Result<(), QueueError> {
		let package = match target {
			Target::Package(p) if catalog.is_installed(p) => p.clone(),
			Target::Package(p) => return Err(QueueError::NotFound(p.exact().to_string())),
			Target::Specifier(s) => catalog.installed_matching(s)
				.into_iter()
				.map(|r| r.package)
				.max()
				.ok_or_else(|| QueueError::NotFound(s.to_string()))?,
		};
		if self.contains(QueueKind::Uninstall, &package) {
			return Ok(());
		}

		let record = catalog.record(&package).unwrap_or_else(|| PackageRecord::new(package.clone()));
		let mut node = OperationNode::new(&record, QueueKind::Uninstall, false, NodeMetadata::default(), Dependencies::default());
		node.state = NodeState::Expanded;
		let root = self.root(QueueKind::Uninstall);
		self.attach(root, None, Subtree { node, children: Vec::new() });
		log::debug!("Queued {} for uninstall", package);
		Ok(())
	}

	/// Rebuilds the subtree of a queued package in place when its dependencies changed.
	///
	/// Used after flag changes, the node keeps its position and its pending edits. If the rebuild fails the
	/// whole request the node belongs to is dropped.
	pub fn update_append(&mut self, catalog: &dyn PackageCatalog, overlay: &mut PendingOverlay, package: &PackageRef, kind: QueueKind, options: AppendOptions) -> Result<(), QueueError> {
		let Some(&idx) = self.index[kind.index()].get(package) else {
			return self.append(catalog, overlay, package.clone(), kind, AppendOptions { force_update: false, ..options });
		};
		if kind == QueueKind::Uninstall {
			return Ok(());
		}
		let Some((parent, position)) = self.parent_edge(idx) else {
			return Err(QueueError::NotQueued(package.clone()));
		};
		let (oneshot, recorded) = match self.operation(idx) {
			Some(node) => (node.oneshot, node.dependencies.clone()),
			None => return Err(QueueError::NotQueued(package.clone())),
		};

		let record = Expansion::new(catalog, overlay, kind, options.unmask, HashSet::new()).resolve(&Target::Package(package.clone()))?;
		if !options.force_update && catalog.first_level_deps(&record, overlay) == recorded {
			log::trace!("Dependencies of {} unchanged", package);
			return Ok(());
		}

		let saved = (self.selections.clone(), self.oneshot_selections.clone());
		self.remove_at(overlay, idx, false);

		let seen: HashSet<PackageRef> = self.packages(kind).cloned().collect();
		let mut expansion = Expansion::new(catalog, overlay, kind, options.unmask, seen);
		let result = expansion.expand(&Target::Package(package.clone()), oneshot)
			.and_then(|subtree| match subtree {
				Some(s) => self.check_blocks(catalog, kind, &s).map(|_| Some(s)),
				None => Ok(None),
			});

		match result {
			Ok(subtree) => {
				if let Some(subtree) = subtree {
					self.attach(parent, Some(position), subtree);
				}
				/* Selections inside the rebuilt subtree come back in their old order */
				let (selections, oneshot_selections) = saved;
				self.selections = selections.into_iter().filter(|p| self.contains(QueueKind::Install, p)).collect();
				self.oneshot_selections = oneshot_selections.into_iter().filter(|p| self.contains(QueueKind::Install, p)).collect();
				log::debug!("Rebuilt {} for {}", package, kind);
				Ok(())
			},
			Err(e) => {
				log::warn!("Failed to rebuild {}: {}", package, e);
				expansion.rollback();
				if !self.is_root(parent) {
					let top = self.top_level_ancestor(parent);
					self.remove_at(overlay, top, false);
				}
				Err(e)
			},
		}
	}

	/// Finds blocks between the new nodes and anything queued or installed.
	///
	/// Installed packages are fine when the queue replaces them in their slot.
	fn check_blocks(&self, catalog: &dyn PackageCatalog, kind: QueueKind, subtree: &Subtree) -> Result<(), QueueError> {
		let new_nodes = subtree.flatten();
		let new_packages: HashSet<&PackageRef> = new_nodes.iter().map(|n| &n.package).collect();
		let queued: Vec<&OperationNode> = self.index[kind.index()]
			.values()
			.filter_map(|idx| self.operation(*idx))
			.chain(new_nodes.iter().copied())
			.collect();
		let slots: HashSet<&str> = queued.iter().map(|n| n.slot_key.as_str()).collect();

		for declarer in &queued {
			let declarer_is_new = new_packages.contains(&declarer.package);
			for block in &declarer.dependencies.blocks {
				for candidate in &queued {
					if candidate.package == declarer.package || !(declarer_is_new || new_packages.contains(&candidate.package)) {
						continue;
					}
					if block.matches(&candidate.package) {
						/* `requested` is always the side being added */
						let (requested, blocker) = if declarer_is_new { (declarer, candidate) } else { (candidate, declarer) };
						return Err(QueueError::Blocked { requested: requested.package.clone(), blocker: blocker.package.clone() });
					}
				}

				if !declarer_is_new {
					continue;
				}
				if let Some(installed) = catalog.installed_matching(block).into_iter().find(|r| !slots.contains(r.slot_key().as_str())) {
					return Err(QueueError::Blocked { requested: declarer.package.clone(), blocker: installed.package });
				}
			}
		}
		Ok(())
	}

	fn attach(&mut self, parent: NodeIndex, position: Option<Position>, subtree: Subtree) -> NodeIndex {
		let Subtree { node, children } = subtree;
		let key = node.kind.index();
		let package = node.package.clone();

		let idx = self.graph.add_node(TreeNode::Operation(node));
		let position = position.unwrap_or_else(|| self.allocate_position());
		self.graph.add_edge(parent, idx, position);
		self.index[key].insert(package, idx);

		for child in children {
			self.attach(idx, None, child);
		}
		idx
	}

	/* Removal */

	/// Removes `package` and everything below it, children first.
	///
	/// When `revert_edits` is set, pending overlay edits of removed install nodes are dropped too.
	/// Returns the number of removed nodes.
	pub fn remove_subtree(&mut self, overlay: &mut PendingOverlay, package: &PackageRef, kind: QueueKind, revert_edits: bool) -> Result<usize, QueueError> {
		let idx = *self.index[kind.index()].get(package).ok_or_else(|| QueueError::NotQueued(package.clone()))?;
		let removed = self.remove_at(overlay, idx, revert_edits);
		log::debug!("Removed {} nodes with {} from {}", removed, package, kind);
		Ok(removed)
	}

	fn remove_at(&mut self, overlay: &mut PendingOverlay, idx: NodeIndex, revert_edits: bool) -> usize {
		let mut removed = 0;
		for child in self.children_of(idx) {
			removed += self.remove_at(overlay, child, revert_edits);
		}
		if self.is_root(idx) {
			return removed;
		}

		if let Some(TreeNode::Operation(node)) = self.graph.remove_node(idx) {
			log::trace!("Removing {} from {}", node.package, node.kind);
			self.index[node.kind.index()].remove(&node.package);
			if node.kind == QueueKind::Install {
				self.selections.retain(|p| p != &node.package);
				self.oneshot_selections.retain(|p| p != &node.package);
				if revert_edits {
					overlay.revert(&node.package);
				}
			}
			removed += 1;
		}
		removed
	}

	/// Empties the root of `kind`.
	pub fn clear(&mut self, overlay: &mut PendingOverlay, kind: QueueKind, revert_edits: bool) -> usize {
		let root = self.root(kind);
		self.remove_at(overlay, root, revert_edits)
	}

	/// Marks `packages` and their subtrees as being worked on, or back to waiting.
	pub fn set_in_progress(&mut self, kind: QueueKind, packages: &[PackageRef], in_progress: bool) {
		let mut stack: Vec<NodeIndex> = packages.iter().filter_map(|p| self.index[kind.index()].get(p).copied()).collect();
		while let Some(idx) = stack.pop() {
			stack.extend(self.children_of(idx));
			if let Some(TreeNode::Operation(node)) = self.graph.node_weight_mut(idx) {
				node.state = if in_progress { NodeState::InProgress } else { NodeState::Expanded };
			}
		}
	}

	/* Display */

	fn snapshot_node(&self, idx: NodeIndex) -> Option<NodeSnapshot> {
		let node = self.operation(idx)?;
		Some(NodeSnapshot {
			package: node.package.clone(),
			oneshot: node.oneshot,
			state: node.state,
			metadata: node.metadata.clone(),
			children: self.children_of(idx).into_iter().filter_map(|c| self.snapshot_node(c)).collect(),
		})
	}

	fn snapshot_root(&self, kind: QueueKind) -> Vec<NodeSnapshot> {
		self.children_of(self.root(kind)).into_iter().filter_map(|c| self.snapshot_node(c)).collect()
	}

	pub fn snapshot(&self) -> QueueSnapshot {
		QueueSnapshot {
			install: self.snapshot_root(QueueKind::Install),
			uninstall: self.snapshot_root(QueueKind::Uninstall),
			update: self.snapshot_root(QueueKind::Update),
			selections: self.selections.clone(),
			oneshot_selections: self.oneshot_selections.clone(),
		}
	}
}
