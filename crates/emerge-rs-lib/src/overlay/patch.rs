//! Line level text edits applied on commit.

/// Heads every block of lines appended on commit.
pub const APPEND_MARKER: &str = "#emerge-rs update#";
/// Put after the specifier of a line whose last flag was removed.
pub const REMOVED_FLAG_MARKER: &str = "#removed by emerge-rs#";
/// Appended to commented out mask and keyword lines.
pub const REMOVED_LINE_SUFFIX: &str = "# removed by emerge-rs";

/// Inserts or removes `token` directly after the specifier.
///
/// A line left with only its specifier is commented out.
pub fn patch_flag_line(line: &str, token: &str, removal: bool) -> String {
	let mut tokens: Vec<String> = line.split_whitespace().map(str::to_string).collect();
	if tokens.is_empty() {
		return line.to_string();
	}

	if !removal {
		tokens.insert(1, token.to_string());
		return tokens.join(" ");
	}

	let comment_start = tokens.iter().position(|t| t.starts_with('#')).unwrap_or(tokens.len());
	if let Some(i) = tokens[..comment_start].iter().skip(1).position(|t| t == token) {
		tokens.remove(i + 1);
	}
	if tokens.len() == 1 || tokens[1].starts_with('#') {
		if !tokens[0].starts_with('#') {
			tokens[0] = format!("#{}", tokens[0]);
			tokens.insert(1, REMOVED_FLAG_MARKER.to_string());
		}
	}
	tokens.join(" ")
}

/// Comments out a whole line, lines already commented are left alone.
pub fn comment_out(line: &str) -> String {
	if line.trim_start().starts_with('#') {
		line.to_string()
	} else {
		format!("#{} {}", line, REMOVED_LINE_SUFFIX)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test] fn insert_after_specifier() { assert_eq!(patch_flag_line("app/foo  ssl", "debug", false), "app/foo debug ssl"); }
	#[test] fn remove_token() { assert_eq!(patch_flag_line("app/foo debug ssl", "debug", true), "app/foo ssl"); }
	#[test] fn remove_last_token() { assert_eq!(patch_flag_line("=app/foo-1.0 debug", "debug", true), "#=app/foo-1.0 #removed by emerge-rs#"); }
	#[test] fn remove_last_before_comment() { assert_eq!(patch_flag_line("app/foo -ssl # why", "-ssl", true), "#app/foo #removed by emerge-rs# # why"); }
	#[test] fn remove_ignores_comment_tokens() { assert_eq!(patch_flag_line("app/foo x # x", "x", true), "#app/foo #removed by emerge-rs# # x"); }
	#[test] fn comment_out_line() { assert_eq!(comment_out(">=app/foo-2"), "#>=app/foo-2 # removed by emerge-rs"); }
	#[test] fn comment_out_is_stable() { assert_eq!(comment_out("#app/foo"), "#app/foo"); }
}
