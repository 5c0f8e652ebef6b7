//! Categorization of `shell.execute` tool-call commands into `shell:*` tags.
//!
//! Used by `backfill shell-tags` (§4.11) to retroactively tag shell tool
//! calls that predate this categorization existing.

pub const SHELL_TAG_PREFIX: &str = "shell:";

const TEST_MARKERS: &[&str] = &["pytest", "cargo test", "npm test", "go test", "jest", "rspec"];
const BUILD_MARKERS: &[&str] = &["cargo build", "make", "npm run build", "go build", "tsc", "webpack"];
const VCS_MARKERS: &[&str] = &["git "];
const PACKAGE_MARKERS: &[&str] = &["npm install", "pip install", "cargo add", "go get", "yarn add", "poetry add"];
const READ_MARKERS: &[&str] = &["cat ", "ls ", "grep ", "find ", "head ", "tail ", "rg "];

/// Categorize a shell command string into a `shell:*` tag suffix (without
/// the prefix). Returns `None` when no category applies, matching the
/// reference implementation's "skip if not categorizable" behavior.
pub fn categorize_shell_command(cmd: &str) -> Option<&'static str> {
    let lower = cmd.trim().to_ascii_lowercase();
    if lower.is_empty() {
        return None;
    }
    if TEST_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some("test");
    }
    if BUILD_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some("build");
    }
    if PACKAGE_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some("package");
    }
    if VCS_MARKERS.iter().any(|m| lower.starts_with(m)) {
        return Some("vcs");
    }
    if READ_MARKERS.iter().any(|m| lower.starts_with(m)) {
        return Some("read");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_test_commands() {
        assert_eq!(categorize_shell_command("cargo test --all"), Some("test"));
        assert_eq!(categorize_shell_command("pytest -k foo"), Some("test"));
    }

    #[test]
    fn categorizes_vcs_commands() {
        assert_eq!(categorize_shell_command("git status"), Some("vcs"));
    }

    #[test]
    fn uncategorized_commands_return_none() {
        assert_eq!(categorize_shell_command("echo hello"), None);
    }

    #[test]
    fn empty_command_returns_none() {
        assert_eq!(categorize_shell_command("   "), None);
    }
}
