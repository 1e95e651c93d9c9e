// Pattern Matching Utilities
// Gitignore-style exclusion rules for the workspace and the device listing

use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::app_config::AppConfig;
use crate::error::{Result, SyncError};

/// Tool metadata directory, always ignored
pub const METADATA_DIR: &str = ".board-sync";

/// Project-level rule file at the workspace root
pub const PROJECT_RULES_FILE: &str = ".syncignore";

/// Tool-level rule file inside the metadata directory
pub const TOOL_RULES_FILE: &str = "syncignore";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// One compiled rule line
#[derive(Debug, Clone)]
struct Rule {
    source: String,
    pattern: Pattern,
    /// Trailing `/`: only directories match
    dir_only: bool,
    /// Leading or inner `/`: matched against the full relative path
    rooted: bool,
}

impl Rule {
    fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        if trimmed.starts_with('!') {
            warn!(rule = trimmed, "negated ignore rules are not supported, skipping");
            return Ok(None);
        }

        let mut body = trimmed;
        let dir_only = body.ends_with('/');
        body = body.trim_end_matches('/');
        let anchored = body.starts_with('/');
        body = body.trim_start_matches('/');

        if body.is_empty() {
            return Ok(None);
        }

        let pattern = Pattern::new(body).map_err(|source| SyncError::Pattern {
            pattern: trimmed.to_string(),
            source,
        })?;

        Ok(Some(Self {
            source: trimmed.to_string(),
            pattern,
            dir_only,
            rooted: anchored || body.contains('/'),
        }))
    }

    fn matches(&self, candidate: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.rooted {
            self.pattern.matches_with(candidate, MATCH_OPTIONS)
        } else {
            let name = candidate.rsplit('/').next().unwrap_or(candidate);
            self.pattern.matches_with(name, MATCH_OPTIONS)
        }
    }
}

/// Compiled ignore predicate over workspace-relative paths
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    rules: Vec<Rule>,
}

impl IgnoreMatcher {
    /// Compile the given rule lines
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut matcher = Self::default();
        for pattern in patterns {
            matcher.add_pattern(pattern.as_ref())?;
        }
        Ok(matcher)
    }

    /// Built-in defaults plus the metadata directory
    pub fn defaults() -> Self {
        let mut matcher = Self::default();
        matcher.push_lenient(&format!("{}/", METADATA_DIR));
        for pattern in AppConfig::default().global_excludes {
            matcher.push_lenient(&pattern);
        }
        matcher
    }

    /// Load the effective rules for a workspace.
    ///
    /// The tool rule file replaces the built-in defaults when present. The
    /// project rule file and `extra` patterns are added on top. The metadata
    /// directory is always excluded.
    pub fn load<S: AsRef<str>>(workspace_root: &Path, extra: &[S]) -> Result<Self> {
        let tool_rules = read_rules(&tool_rules_path(workspace_root))?;

        let mut matcher = match tool_rules {
            Some(lines) => {
                let mut matcher = Self::default();
                matcher.add_pattern(&format!("{}/", METADATA_DIR))?;
                for line in &lines {
                    matcher.add_pattern(line)?;
                }
                matcher
            }
            None => Self::defaults(),
        };

        if let Some(lines) = read_rules(&workspace_root.join(PROJECT_RULES_FILE))? {
            for line in &lines {
                matcher.add_pattern(line)?;
            }
        }

        for pattern in extra {
            matcher.add_pattern(pattern.as_ref())?;
        }

        debug!(rules = matcher.rules.len(), "ignore rules loaded");
        Ok(matcher)
    }

    /// Check if a relative path (or any of its ancestor directories) is ignored
    pub fn matches(&self, rel_path: &str, is_dir: bool) -> bool {
        let rel_path = rel_path.trim_matches('/');
        if rel_path.is_empty() || self.rules.is_empty() {
            return false;
        }

        let segments: Vec<&str> = rel_path.split('/').filter(|s| !s.is_empty()).collect();
        let mut candidate = String::with_capacity(rel_path.len());

        for (idx, segment) in segments.iter().enumerate() {
            if idx > 0 {
                candidate.push('/');
            }
            candidate.push_str(segment);

            let candidate_is_dir = idx + 1 < segments.len() || is_dir;
            if self.rules.iter().any(|r| r.matches(&candidate, candidate_is_dir)) {
                return true;
            }
        }

        false
    }

    /// Add a rule line
    pub fn add_pattern(&mut self, pattern: &str) -> Result<()> {
        if let Some(rule) = Rule::parse(pattern)? {
            self.rules.push(rule);
        }
        Ok(())
    }

    /// Rule lines in evaluation order
    pub fn patterns(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.source.as_str()).collect()
    }

    fn push_lenient(&mut self, pattern: &str) {
        if let Err(e) = self.add_pattern(pattern) {
            warn!(error = %e, "skipping built-in ignore rule");
        }
    }
}

/// Split rule file content into non-empty, non-comment lines
pub fn parse_rules(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn read_rules(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(parse_rules(&content))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

pub fn tool_rules_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(METADATA_DIR).join(TOOL_RULES_FILE)
}

/// Default content of the tool rule file
pub fn default_rules_content() -> String {
    let mut content = String::from(
        "# board-sync ignore rules (gitignore-style, no negation)\n\
         # Paths are relative to the workspace root.\n\
         # Delete this file to restore the built-in defaults.\n\n",
    );
    for pattern in AppConfig::default().global_excludes {
        content.push_str(&pattern);
        content.push('\n');
    }
    content
}

/// Write the default tool rule file when it is absent.
///
/// Returns `true` when the file was created.
pub fn ensure_default_rules(workspace_root: &Path) -> Result<bool> {
    let path = tool_rules_path(workspace_root);
    if path.exists() {
        return Ok(false);
    }
    let content = default_rules_content();
    super::atomic::write_atomic(&path, content.as_bytes())?;
    debug!(path = %path.display(), "default ignore rules written");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(rules: &[&str]) -> IgnoreMatcher {
        IgnoreMatcher::new(rules).unwrap()
    }

    #[test]
    fn test_suffix_pattern() {
        let m = matcher(&["*.swp"]);
        assert!(m.matches("file.swp", false));
        assert!(m.matches("deep/dir/file.swp", false));
        assert!(!m.matches("file.py", false));
    }

    #[test]
    fn test_dir_only_pattern() {
        let m = matcher(&["build/"]);
        assert!(m.matches("build", true));
        assert!(m.matches("build/out.py", false));
        assert!(m.matches("lib/build/out.py", false));
        // a file called build is not a directory
        assert!(!m.matches("build", false));
    }

    #[test]
    fn test_anchored_pattern() {
        let m = matcher(&["/secrets.py"]);
        assert!(m.matches("secrets.py", false));
        assert!(!m.matches("lib/secrets.py", false));
    }

    #[test]
    fn test_inner_slash_pattern() {
        let m = matcher(&["lib/*.txt"]);
        assert!(m.matches("lib/notes.txt", false));
        assert!(!m.matches("lib/sub/notes.txt", false));
        assert!(!m.matches("other/lib/notes.txt", false));
    }

    #[test]
    fn test_character_class() {
        let m = matcher(&["*.py[cod]"]);
        assert!(m.matches("mod.pyc", false));
        assert!(!m.matches("mod.py", false));
    }

    #[test]
    fn test_negation_and_comments_skipped() {
        let m = matcher(&["# comment", "", "!keep.py"]);
        assert!(m.patterns().is_empty());
        assert!(!m.matches("keep.py", false));
    }

    #[test]
    fn test_defaults_cover_metadata_and_vcs() {
        let m = IgnoreMatcher::defaults();
        assert!(m.matches(".board-sync/manifest.json", false));
        assert!(m.matches(".git/config", false));
        assert!(m.matches("node_modules/pkg/index.js", false));
        assert!(!m.matches("main.py", false));
    }

    #[test]
    fn test_load_and_ensure_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let before = IgnoreMatcher::load::<&str>(root, &[]).unwrap();
        assert!(ensure_default_rules(root).unwrap());
        assert!(!ensure_default_rules(root).unwrap());
        let after = IgnoreMatcher::load::<&str>(root, &[]).unwrap();

        for path in [".git/HEAD", "main.py", "build/x.py", "lib/a.pyc"] {
            assert_eq!(before.matches(path, false), after.matches(path, false), "{}", path);
        }

        fs::write(root.join(PROJECT_RULES_FILE), "data/\n").unwrap();
        let with_project = IgnoreMatcher::load(root, &["*.bin"]).unwrap();
        assert!(with_project.matches("data/log.csv", false));
        assert!(with_project.matches("fw.bin", false));
    }

    #[test]
    fn test_invalid_rule_is_error() {
        let err = IgnoreMatcher::new(&["[unclosed"]).unwrap_err();
        assert!(matches!(err, SyncError::Pattern { .. }));
    }
}
