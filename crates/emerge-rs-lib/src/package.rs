//! Package identities, versions and the specifiers used to select them.

mod version;
pub use version::*;
mod specifier;
pub use specifier::*;
mod dependency;
pub use dependency::*;

use std::sync::OnceLock;
use serde::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
	#[error("invalid package reference `{0}`")]
	PackageRef(String),
	#[error("invalid version `{0}`")]
	Version(String),
	#[error("invalid specifier `{0}`")]
	Specifier(String),
	#[error("invalid dependency atom `{0}`")]
	Dependency(String),
}

pub(crate) const CATEGORY_PATTERN: &str = r"[A-Za-z0-9+_][A-Za-z0-9+_.-]*";
pub(crate) const NAME_PATTERN: &str = r"[A-Za-z0-9+_][A-Za-z0-9+_-]*?";
pub(crate) const VERSION_PATTERN: &str = r"[0-9]+(?:\.[0-9]+)*[a-z]?(?:_(?:alpha|beta|pre|rc|p)[0-9]*)*(?:-r[0-9]+)?";

fn package_ref_regex() -> &'static regex::Regex {
	static RE: OnceLock<regex::Regex> = OnceLock::new();
	RE.get_or_init(|| {
		regex::Regex::new(&format!("^({CATEGORY_PATTERN})/({NAME_PATTERN})-({VERSION_PATTERN})$"))
			.expect("package reference pattern is valid")
	})
}

/// A concrete package: `category/name-version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageRef {
	category: String,
	name: String,
	version: PackageVersion,
}

impl PackageRef {
	pub fn new(category: impl Into<String>, name: impl Into<String>, version: PackageVersion) -> Self {
		Self { category: category.into(), name: name.into(), version }
	}

	pub fn parse(s: &str) -> Result<Self, ParseError> {
		let captures = package_ref_regex().captures(s.trim()).ok_or_else(|| ParseError::PackageRef(s.to_string()))?;
		Ok(Self {
			category: captures[1].to_string(),
			name: captures[2].to_string(),
			version: PackageVersion::parse(&captures[3])?,
		})
	}

	pub fn category(&self) -> &str {
		&self.category
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn version(&self) -> &PackageVersion {
		&self.version
	}

	/// `category/name` without the version.
	pub fn cp(&self) -> String {
		format!("{}/{}", self.category, self.name)
	}

	/// Specifier matching exactly this package.
	pub fn exact(&self) -> Specifier {
		Specifier::exact(self)
	}
}

impl std::fmt::Display for PackageRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}-{}", self.category, self.name, self.version)
	}
}

impl std::str::FromStr for PackageRef {
	type Err = ParseError;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<String> for PackageRef {
	type Error = ParseError;
	fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<PackageRef> for String {
	fn from(value: PackageRef) -> Self { value.to_string() }
}

/// What a caller asks the queue for, either an exact package or anything a specifier selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
	Package(PackageRef),
	Specifier(Specifier),
}

impl Target {
	pub fn to_specifier(&self) -> Specifier {
		match self {
			Target::Package(p) => p.exact(),
			Target::Specifier(s) => s.clone(),
		}
	}
}

impl std::fmt::Display for Target {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Target::Package(p) => p.fmt(f),
			Target::Specifier(s) => s.fmt(f),
		}
	}
}

impl std::str::FromStr for Target {
	type Err = ParseError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match PackageRef::parse(s) {
			Ok(p) => Ok(Target::Package(p)),
			Err(_) => Ok(Target::Specifier(Specifier::parse(s)?)),
		}
	}
}

impl From<PackageRef> for Target {
	fn from(value: PackageRef) -> Self { Target::Package(value) }
}

impl From<&PackageRef> for Target {
	fn from(value: &PackageRef) -> Self { Target::Package(value.clone()) }
}

impl From<Specifier> for Target {
	fn from(value: Specifier) -> Self { Target::Specifier(value) }
}
