use serde::*;

use crate::catalog::*;
use crate::package::*;
use super::QueueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
	/// Dependencies not yet looked at, only exists while a subtree is being built.
	Unexpanded,
	Expanded,
	/// Being worked on by the package manager.
	InProgress,
}

/// Describes how a queued package relates to what is installed.
///
/// Computed once when the node is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
	pub is_update: bool,
	pub is_downgrade: bool,
	/// Installed version being replaced.
	pub from_version: Option<PackageVersion>,
	/// `-flag` for flags the package no longer has, `+flag` for new ones.
	pub use_flag_delta: Vec<String>,
}

impl NodeMetadata {
	pub fn compute(catalog: &dyn PackageCatalog, record: &PackageRecord) -> Self {
		let Some(installed) = catalog.installed_in_slot(record) else {
			return Self::default()
		};

		let old_iuse = installed.iuse_names();
		let new_iuse = record.iuse_names();
		let mut removed: Vec<_> = old_iuse.difference(&new_iuse).map(|f| format!("-{}", f)).collect();
		let mut added: Vec<_> = new_iuse.difference(&old_iuse).map(|f| format!("+{}", f)).collect();
		removed.sort();
		added.sort();
		let use_flag_delta = removed.into_iter().chain(added).collect();

		if installed.package == record.package {
			return Self { use_flag_delta, ..Default::default() };
		}

		let ordering = record.package.version().cmp(installed.package.version());
		Self {
			is_update: ordering == std::cmp::Ordering::Greater,
			is_downgrade: ordering == std::cmp::Ordering::Less,
			from_version: Some(installed.package.version().clone()),
			use_flag_delta,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationNode {
	pub package: PackageRef,
	pub kind: QueueKind,
	pub oneshot: bool,
	pub state: NodeState,
	pub metadata: NodeMetadata,
	/// `category/name:slot` of the package.
	pub slot_key: String,
	/// Dependencies the children were built from.
	pub dependencies: Dependencies,
}

impl OperationNode {
	pub fn new(record: &PackageRecord, kind: QueueKind, oneshot: bool, metadata: NodeMetadata, dependencies: Dependencies) -> Self {
		Self {
			package: record.package.clone(),
			kind,
			oneshot,
			state: NodeState::Unexpanded,
			metadata,
			slot_key: record.slot_key(),
			dependencies,
		}
	}
}

#[derive(Debug, Clone)]
pub enum TreeNode {
	/// One of the permanent queue roots.
	Root(QueueKind),
	Operation(OperationNode),
}

/// Orders the children of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub(super) u64);
