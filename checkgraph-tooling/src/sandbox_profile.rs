//! Declarative sandbox profile for external subprocesses (the command
//! provider). This is a policy description, not an OS-level sandbox
//! implementation (bubblewrap et al. are explicitly out of scope) — the
//! command provider consults it to decide the working directory, which
//! environment variables pass through, and whether the filesystem should be
//! treated as read-only for the child.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::env::curate_env;

#[derive(Debug, Clone, Default)]
pub struct SandboxProfile {
    pub read_only: bool,
    pub allowed_paths: Vec<PathBuf>,
    pub env_allow_list: Vec<String>,
}

impl SandboxProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_allowed_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.allowed_paths.push(path.into());
        self
    }

    pub fn with_env_allow(mut self, name: impl Into<String>) -> Self {
        self.env_allow_list.push(name.into());
        self
    }

    /// Whether `path` falls under one of the allowed path roots. An empty
    /// allow-list means no path restriction is enforced.
    pub fn allows_path(&self, path: &Path) -> bool {
        if self.allowed_paths.is_empty() {
            return true;
        }
        self.allowed_paths.iter().any(|root| path.starts_with(root))
    }

    /// Build the environment map a sandboxed child process should see.
    pub fn curated_env(&self, ambient: &HashMap<String, String>) -> HashMap<String, String> {
        curate_env(ambient, &self.env_allow_list)
    }
}

/// Resolve `requested` against `project_root`, rejecting any path that
/// escapes the root after canonicalization. Used by the AI provider when a
/// prompt is specified as a file path and never trusts a raw concatenation
/// of user input.
pub fn guarded_join(project_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let candidate = project_root.join(requested);
    let normalized = normalize_lexically(&candidate);
    let root_normalized = normalize_lexically(project_root);
    if normalized.starts_with(&root_normalized) {
        Ok(normalized)
    } else {
        Err(format!(
            "path '{requested}' escapes project root '{}'",
            project_root.display()
        ))
    }
}

/// Lexical normalization (no filesystem access, so it works for paths that
/// don't exist yet) collapsing `.` and `..` components.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_join_allows_nested_path() {
        let root = Path::new("/project");
        let resolved = guarded_join(root, "src/main.rs").unwrap();
        assert_eq!(resolved, PathBuf::from("/project/src/main.rs"));
    }

    #[test]
    fn guarded_join_rejects_traversal() {
        let root = Path::new("/project");
        let err = guarded_join(root, "../etc/passwd").unwrap_err();
        assert!(err.contains("escapes project root"));
    }

    #[test]
    fn guarded_join_rejects_absolute_escape_via_dotdot() {
        let root = Path::new("/project");
        let err = guarded_join(root, "a/../../b").unwrap_err();
        assert!(err.contains("escapes project root"));
    }

    #[test]
    fn allows_path_with_empty_allowlist() {
        let profile = SandboxProfile::new();
        assert!(profile.allows_path(Path::new("/anything")));
    }

    #[test]
    fn allows_path_checks_roots() {
        let profile = SandboxProfile::new().with_allowed_path("/project");
        assert!(profile.allows_path(Path::new("/project/src")));
        assert!(!profile.allows_path(Path::new("/etc")));
    }
}
