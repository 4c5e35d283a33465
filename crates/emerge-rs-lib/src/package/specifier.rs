use std::sync::OnceLock;
use serde::*;

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
	Equal,
	Greater,
	GreaterOrEqual,
	Less,
	LessOrEqual,
	/// Same version, any revision.
	Tilde,
}

impl Operator {
	fn parse(s: &str) -> Option<Self> {
		match s {
			"=" => Some(Operator::Equal),
			">" => Some(Operator::Greater),
			">=" => Some(Operator::GreaterOrEqual),
			"<" => Some(Operator::Less),
			"<=" => Some(Operator::LessOrEqual),
			"~" => Some(Operator::Tilde),
			_ => None,
		}
	}

	fn as_str(&self) -> &'static str {
		match self {
			Operator::Equal => "=",
			Operator::Greater => ">",
			Operator::GreaterOrEqual => ">=",
			Operator::Less => "<",
			Operator::LessOrEqual => "<=",
			Operator::Tilde => "~",
		}
	}
}

fn specifier_regex() -> &'static regex::Regex {
	static RE: OnceLock<regex::Regex> = OnceLock::new();
	RE.get_or_init(|| {
		regex::Regex::new(&format!(
			r"^(?P<op>[<>=~]{{0,2}})(?P<cp>{CATEGORY_PATTERN}/{NAME_PATTERN})(?:-(?P<ver>{VERSION_PATTERN})(?P<glob>\*)?)?(?::(?P<slot>[A-Za-z0-9+_.-]+(?:/[A-Za-z0-9+_.-]+)?))?$"
		)).expect("specifier pattern is valid")
	})
}

/// Selects packages by name and optionally by version range and slot.
///
/// `cat/name`, `>=cat/name-1.2`, `=cat/name-1.2*`, `cat/name:2`.
/// A bare `cat/name-1.2` is read as `=cat/name-1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Specifier {
	operator: Option<Operator>,
	category: String,
	name: String,
	version: Option<PackageVersion>,
	glob: bool,
	slot: Option<String>,
}

impl Specifier {
	/// Specifier matching any version of `category/name`.
	pub fn any(category: impl Into<String>, name: impl Into<String>) -> Self {
		Self { operator: None, category: category.into(), name: name.into(), version: None, glob: false, slot: None }
	}

	pub fn exact(package: &PackageRef) -> Self {
		Self {
			operator: Some(Operator::Equal),
			category: package.category().to_string(),
			name: package.name().to_string(),
			version: Some(package.version().clone()),
			glob: false,
			slot: None,
		}
	}

	pub fn parse(s: &str) -> Result<Self, ParseError> {
		let err = || ParseError::Specifier(s.to_string());
		let captures = specifier_regex().captures(s.trim()).ok_or_else(err)?;

		let op = &captures["op"];
		let version = captures.name("ver").map(|v| PackageVersion::parse(v.as_str())).transpose()?;
		let glob = captures.name("glob").is_some();

		let operator = match (op.is_empty(), &version) {
			(true, None) => None,
			(true, Some(_)) if !glob => Some(Operator::Equal),
			(false, Some(_)) => Some(Operator::parse(op).ok_or_else(err)?),
			_ => return Err(err()),
		};
		if glob && operator != Some(Operator::Equal) {
			return Err(err());
		}

		let (category, name) = captures["cp"].split_once('/').ok_or_else(err)?;
		Ok(Self {
			operator,
			category: category.to_string(),
			name: name.to_string(),
			version,
			glob,
			slot: captures.name("slot").map(|m| m.as_str().to_string()),
		})
	}

	pub fn category(&self) -> &str {
		&self.category
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn cp(&self) -> String {
		format!("{}/{}", self.category, self.name)
	}

	pub fn slot(&self) -> Option<&str> {
		self.slot.as_deref()
	}

	pub fn version(&self) -> Option<&PackageVersion> {
		self.version.as_ref()
	}

	/// Whether `package` is selected by this specifier, the slot is not considered.
	pub fn matches(&self, package: &PackageRef) -> bool {
		if self.category != package.category() || self.name != package.name() {
			return false;
		}
		let (Some(op), Some(version)) = (self.operator, &self.version) else {
			return true
		};
		let candidate = package.version();
		match op {
			Operator::Equal if self.glob => candidate.to_string().starts_with(&version.to_string()),
			Operator::Equal => candidate == version,
			Operator::Greater => candidate > version,
			Operator::GreaterOrEqual => candidate >= version,
			Operator::Less => candidate < version,
			Operator::LessOrEqual => candidate <= version,
			Operator::Tilde => candidate.cmp_ignoring_revision(version) == std::cmp::Ordering::Equal,
		}
	}

	/// [`matches()`](Specifier::matches) plus the slot when one is given.
	pub fn matches_slotted(&self, package: &PackageRef, slot: &str) -> bool {
		self.matches(package) && self.slot.as_deref().map_or(true, |s| s.split('/').next() == Some(slot))
	}
}

impl std::fmt::Display for Specifier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if let (Some(op), Some(_)) = (self.operator, &self.version) {
			f.write_str(op.as_str())?;
		}
		write!(f, "{}/{}", self.category, self.name)?;
		if let Some(version) = &self.version {
			write!(f, "-{}", version)?;
		}
		if self.glob {
			f.write_str("*")?;
		}
		if let Some(slot) = &self.slot {
			write!(f, ":{}", slot)?;
		}
		Ok(())
	}
}

impl std::str::FromStr for Specifier {
	type Err = ParseError;
	fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<String> for Specifier {
	type Error = ParseError;
	fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<Specifier> for String {
	fn from(value: Specifier) -> Self { value.to_string() }
}
