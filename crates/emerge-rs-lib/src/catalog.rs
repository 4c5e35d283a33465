//! Interface to the package database.
//!
//! The queue only ever asks the catalog questions, it never changes it other than asking for a reload
//! once the package manager or a commit touched something.

mod memory;
pub use memory::MemoryCatalog;

use std::collections::HashSet;
use serde::*;

use crate::package::*;
use crate::overlay::PendingOverlay;

fn default_slot() -> String { "0".to_string() }

/// Everything the queue needs to know about a single package version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
	pub package: PackageRef,
	#[serde(default = "default_slot")]
	pub slot: String,
	/// Flags the package understands, may carry a `+`/`-` default.
	#[serde(default)]
	pub iuse: Vec<String>,
	/// Flags currently enabled for this package by the system configuration.
	#[serde(default)]
	pub use_enabled: Vec<String>,
	#[serde(default)]
	pub depends: Vec<DependencyAtom>,
	#[serde(default)]
	pub installed: bool,
	/// Masked by policy and not unmasked by the on-disk configuration.
	#[serde(default)]
	pub masked: bool,
	/// Only keyworded for testing on this arch.
	#[serde(default)]
	pub testing: bool,
	/// Testing keyword accepted by the on-disk configuration.
	#[serde(default)]
	pub testing_accepted: bool,
}

impl PackageRecord {
	pub fn new(package: PackageRef) -> Self {
		Self {
			package,
			slot: default_slot(),
			iuse: Vec::new(),
			use_enabled: Vec::new(),
			depends: Vec::new(),
			installed: false,
			masked: false,
			testing: false,
			testing_accepted: false,
		}
	}

	/// Not hidden by a mask or an unaccepted testing keyword.
	pub fn is_visible(&self) -> bool {
		!self.masked && (!self.testing || self.testing_accepted)
	}

	/// `category/name:slot`, two packages with the same key replace each other.
	pub fn slot_key(&self) -> String {
		format!("{}:{}", self.package.cp(), self.slot)
	}

	/// IUSE with the `+`/`-` defaults stripped.
	pub fn iuse_names(&self) -> HashSet<String> {
		self.iuse.iter().map(|f| f.trim_start_matches(['+', '-']).to_string()).collect()
	}

	/// Enabled flags after applying `delta`, a list of `flag`/`+flag`/`-flag` changes.
	pub fn effective_flags(&self, delta: &[String]) -> HashSet<String> {
		let mut enabled: HashSet<String> = self.use_enabled.iter().cloned().collect();
		for flag in delta {
			if let Some(f) = flag.strip_prefix('-') {
				enabled.remove(f);
			} else {
				enabled.insert(flag.trim_start_matches('+').to_string());
			}
		}
		enabled
	}

	/// Splits the dependency list into requirements and blocks for the given flags.
	pub fn dependencies(&self, enabled: &HashSet<String>) -> Dependencies {
		let mut deps = Dependencies::default();
		for atom in &self.depends {
			if !atom.condition.as_ref().map_or(true, |c| c.is_met(enabled)) {
				continue;
			}
			if atom.block {
				deps.blocks.push(atom.specifier.clone());
			} else {
				deps.depends.push(atom.specifier.clone());
			}
		}
		deps
	}
}

/// First level dependencies of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
	pub depends: Vec<Specifier>,
	/// Packages that can't be installed alongside.
	pub blocks: Vec<Specifier>,
}

pub trait PackageCatalog: Send + Sync {
	/// Best candidate for `specifier`, masked and unaccepted testing versions only when `include_masked` is set.
	fn resolve(&self, specifier: &Specifier, include_masked: bool) -> Option<PackageRecord>;

	/// Every package matching `specifier`.
	fn find(&self, specifier: &Specifier, include_masked: bool) -> Vec<PackageRef>;

	fn record(&self, package: &PackageRef) -> Option<PackageRecord> {
		self.resolve(&package.exact(), true)
	}

	/// Dependencies of `package` with the flag changes pending in `overlay` applied.
	fn first_level_deps(&self, package: &PackageRecord, overlay: &PendingOverlay) -> Dependencies {
		let delta = overlay.use_flag_delta(&package.package);
		package.dependencies(&package.effective_flags(&delta))
	}

	/// Installed package occupying the same slot as `package`.
	fn installed_in_slot(&self, package: &PackageRecord) -> Option<PackageRecord>;

	fn installed_matching(&self, specifier: &Specifier) -> Vec<PackageRecord>;

	fn is_installed(&self, package: &PackageRef) -> bool;

	/// Drops cached knowledge of `category`, everything when `None`.
	fn reload(&self, category: Option<&str>);
}
