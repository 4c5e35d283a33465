//! Building the subtree for a request before it becomes part of the tree.

use std::collections::HashSet;

use crate::catalog::*;
use crate::overlay::{AttributeValue, PendingOverlay};
use crate::package::*;
use super::*;

/// A fully expanded request not attached to the tree yet.
#[derive(Debug)]
pub(super) struct Subtree {
	pub node: OperationNode,
	pub children: Vec<Subtree>,
}

impl Subtree {
	/// Every node, parents before children.
	pub fn flatten(&self) -> Vec<&OperationNode> {
		let mut nodes = vec![&self.node];
		for child in &self.children {
			nodes.extend(child.flatten());
		}
		nodes
	}
}

pub(super) struct Expansion<'a> {
	catalog: &'a dyn PackageCatalog,
	overlay: &'a mut PendingOverlay,
	kind: QueueKind,
	unmask: bool,
	/// Packages already in the root or expanded by this call, never expanded again.
	seen: HashSet<PackageRef>,
	/// Packages this expansion recorded unmask edits for.
	unmasked: Vec<PackageRef>,
}

impl<'a> Expansion<'a> {
	pub fn new(catalog: &'a dyn PackageCatalog, overlay: &'a mut PendingOverlay, kind: QueueKind, unmask: bool, seen: HashSet<PackageRef>) -> Self {
		Self { catalog, overlay, kind, unmask, seen, unmasked: Vec::new() }
	}

	/// Finds the record for `target`, falling back to masked versions when they are or may be unmasked.
	pub fn resolve(&mut self, target: &Target) -> Result<PackageRecord, QueueError> {
		let specifier = target.to_specifier();
		if let Some(record) = self.catalog.resolve(&specifier, false) {
			return Ok(record);
		}

		let record = self.catalog.resolve(&specifier, true).ok_or_else(|| QueueError::NotFound(specifier.to_string()))?;
		let package = &record.package;

		let mask_lifted = !record.masked || self.overlay.new_masking_status(package) == Some(false);
		let testing_lifted = !record.testing || record.testing_accepted || self.overlay.new_testing_status(package) == Some(true);
		if mask_lifted && testing_lifted {
			return Ok(record);
		}
		if !self.unmask {
			log::debug!("{} is only satisfied by masked {}", specifier, package);
			return Err(QueueError::NotFound(specifier.to_string()));
		}

		let had_edits = self.overlay.has_edits(package);
		if !mask_lifted {
			self.overlay.set(&record, AttributeValue::Mask(false))?;
		}
		if !testing_lifted {
			self.overlay.set(&record, AttributeValue::Stability(true))?;
		}
		if !had_edits {
			self.unmasked.push(package.clone());
		}
		log::info!("Unmasking {} to satisfy {}", package, specifier);
		Ok(record)
	}

	/// Recursively builds the subtree for `target`.
	///
	/// `None` when the package was already seen.
	pub fn expand(&mut self, target: &Target, oneshot: bool) -> Result<Option<Subtree>, QueueError> {
		let record = self.resolve(target)?;
		if !self.seen.insert(record.package.clone()) {
			log::trace!("{} already queued, not expanding again", record.package);
			return Ok(None);
		}

		let metadata = NodeMetadata::compute(self.catalog, &record);
		let dependencies = self.catalog.first_level_deps(&record, self.overlay);
		let mut node = OperationNode::new(&record, self.kind, oneshot, metadata, dependencies);

		let mut children = Vec::new();
		for dependency in node.dependencies.depends.clone() {
			if let Some(child) = self.expand(&Target::Specifier(dependency), false)? {
				children.push(child);
			}
		}

		node.state = NodeState::Expanded;
		log::trace!("Expanded {} with {} children", node.package, children.len());
		Ok(Some(Subtree { node, children }))
	}

	/// Drops the unmask edits this expansion made.
	pub fn rollback(self) {
		for package in &self.unmasked {
			self.overlay.revert(package);
		}
	}
}
