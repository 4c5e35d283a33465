use serde::*;

use super::*;

/// USE flag a dependency is conditional on, `flag?` or `!flag?`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UseCondition {
	pub flag: String,
	pub negated: bool,
}

impl UseCondition {
	pub fn is_met(&self, enabled: &std::collections::HashSet<String>) -> bool {
		enabled.contains(&self.flag) != self.negated
	}
}

/// One entry of a package's dependency list.
///
/// Written as `[!]flag? [!]specifier`, a leading `!` on the specifier marks a block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DependencyAtom {
	pub condition: Option<UseCondition>,
	pub block: bool,
	pub specifier: Specifier,
}

impl DependencyAtom {
	pub fn parse(s: &str) -> Result<Self, ParseError> {
		let err = || ParseError::Dependency(s.to_string());
		let mut tokens = s.split_whitespace();
		let mut token = tokens.next().ok_or_else(err)?;

		let mut condition = None;
		if let Some(flag) = token.strip_suffix('?') {
			let (flag, negated) = match flag.strip_prefix('!') {
				Some(f) => (f, true),
				None => (flag, false),
			};
			if flag.is_empty() {
				return Err(err());
			}
			condition = Some(UseCondition { flag: flag.to_string(), negated });
			token = tokens.next().ok_or_else(err)?;
		}
		if tokens.next().is_some() {
			return Err(err());
		}

		let (block, token) = match token.strip_prefix('!') {
			Some(t) => (true, t),
			None => (false, token),
		};

		Ok(Self { condition, block, specifier: Specifier::parse(token)? })
	}
}

impl std::fmt::Display for DependencyAtom {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if let Some(c) = &self.condition {
			write!(f, "{}{}? ", if c.negated { "!" } else { "" }, c.flag)?;
		}
		if self.block {
			f.write_str("!")?;
		}
		self.specifier.fmt(f)
	}
}

impl TryFrom<String> for DependencyAtom {
	type Error = ParseError;
	fn try_from(value: String) -> Result<Self, Self::Error> { Self::parse(&value) }
}

impl From<DependencyAtom> for String {
	fn from(value: DependencyAtom) -> Self { value.to_string() }
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn plain() {
		let atom = DependencyAtom::parse(">=dev-libs/glib-2.0").unwrap();
		assert!(!atom.block);
		assert!(atom.condition.is_none());
		assert_eq!(atom.to_string(), ">=dev-libs/glib-2.0");
	}

	#[test]
	fn conditional_block() {
		let atom = DependencyAtom::parse("!ssl? !dev-libs/openssl").unwrap();
		assert!(atom.block);
		let condition = atom.condition.clone().unwrap();
		assert_eq!(condition.flag, "ssl");
		assert!(condition.negated);
		assert_eq!(atom.to_string(), "!ssl? !dev-libs/openssl");

		let mut enabled = std::collections::HashSet::new();
		assert!(condition.is_met(&enabled));
		enabled.insert("ssl".to_string());
		assert!(!condition.is_met(&enabled));
	}

	#[test]
	fn invalid() {
		assert!(DependencyAtom::parse("").is_err());
		assert!(DependencyAtom::parse("debug?").is_err());
		assert!(DependencyAtom::parse("debug? a/b c/d").is_err());
	}
}
