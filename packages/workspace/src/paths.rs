// ABOUTME: Path normalization and containment checks for agent-supplied paths
// ABOUTME: Repairs encoding artifacts and duplicated segments, then gates workspace escapes

use crate::config::WorkspaceConfig;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

fn unicode_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\u([0-9a-fA-F]{4})").expect("valid unicode escape pattern"))
}

/// Normalizes, de-duplicates and safety-checks paths relative to a project's
/// workspace directory.
///
/// Every mutating filesystem operation driven by an agent-supplied path must
/// pass through [`PathResolver::is_safe`] first.
#[derive(Clone)]
pub struct PathResolver {
    config: Arc<WorkspaceConfig>,
}

impl PathResolver {
    pub fn new(config: Arc<WorkspaceConfig>) -> Self {
        Self { config }
    }

    /// Normalize a path to be relative to the project's directory.
    ///
    /// URL-decodes the input, resolves textual `\uXXXX` escapes, collapses
    /// runs of consecutive identical segments (repairing the doubled
    /// project-scoping prefix failure mode), then strips any leading
    /// workspace-root or project-id prefix. Idempotent.
    ///
    /// Decode failures never abort normalization: the original input is
    /// returned unchanged with a warning, so downstream operations can still
    /// attempt best-effort execution.
    pub fn normalize(&self, path: &str, project_id: &str) -> String {
        let decoded = match urlencoding::decode(path) {
            Ok(d) => d.into_owned(),
            Err(e) => {
                warn!(path, error = %e, "failed to URL-decode path; using it as-is");
                return path.to_string();
            }
        };

        let unescaped = unicode_escape_re()
            .replace_all(&decoded, |caps: &regex::Captures| {
                u32::from_str_radix(&caps[1], 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| {
                        warn!(escape = &caps[0], "unresolvable unicode escape in path");
                        caps[0].to_string()
                    })
            })
            .into_owned();

        let mut parts: Vec<&str> = unescaped
            .split(['/', '\\'])
            .filter(|p| !p.is_empty())
            .collect();

        // A segment immediately followed by an identical segment is the
        // doubled-prefix failure mode; collapse whole runs so the operation
        // stays idempotent.
        let before = parts.len();
        parts.dedup();
        if parts.len() != before {
            debug!(path, "collapsed duplicated path segments");
        }

        let root_parts: Vec<&str> = self
            .config
            .workspace_root
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();

        let mut start = 0;
        if !root_parts.is_empty() && parts.len() >= root_parts.len() {
            if parts[..root_parts.len()] == root_parts[..] {
                start = root_parts.len();
            }
        }
        if parts.get(start).map(|p| *p == project_id).unwrap_or(false) {
            start += 1;
        }

        parts[start..].join("/")
    }

    /// Resolve a (possibly already absolute or prefixed) path to an absolute
    /// path inside the project directory. The project directory is guaranteed
    /// to appear exactly once in the output.
    pub fn resolve_absolute(&self, path: &str, project_id: &str) -> PathBuf {
        let relative = self.normalize(path, project_id);
        let project_dir = self.config.project_dir(project_id);
        if relative.is_empty() {
            project_dir
        } else {
            project_dir.join(relative)
        }
    }

    /// Returns true only when the resolved, canonicalized path is contained
    /// within the project's directory. Callers must refuse the operation and
    /// report a path-escape error when this returns false.
    pub fn is_safe(&self, path: &str, project_id: &str) -> bool {
        let abs = lexical_clean(&self.resolve_absolute(path, project_id));
        let project_dir = lexical_clean(&self.config.project_dir(project_id));

        let abs = canonical_approximation(&abs);
        let project_dir = canonical_approximation(&project_dir);

        abs.starts_with(&project_dir)
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from("/")
    } else {
        out
    }
}

/// Canonicalize the deepest existing ancestor and re-append the remainder, so
/// containment checks see through symlinks without requiring the target to
/// exist yet.
fn canonical_approximation(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut remainder: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        match existing.canonicalize() {
            Ok(canonical) => {
                let mut out = canonical;
                for seg in remainder.iter().rev() {
                    out.push(seg);
                }
                return out;
            }
            Err(_) => match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        remainder.push(name);
                    }
                    existing = parent;
                }
                None => return path.to_path_buf(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn resolver_at(root: &str) -> PathResolver {
        PathResolver::new(Arc::new(WorkspaceConfig::new(ProviderKind::Local, root)))
    }

    #[test]
    fn test_normalize_collapses_duplicate_segments() {
        let resolver = resolver_at("/workspace");
        assert_eq!(
            resolver.normalize("data/data/file.txt", "p1"),
            "data/file.txt"
        );
        // Runs longer than two also collapse, keeping the operation idempotent.
        assert_eq!(resolver.normalize("data/data/data/file.txt", "p1"), "data/file.txt");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let resolver = resolver_at("/workspace");
        let inputs = [
            "data/data/file.txt",
            "/workspace/p1/src/main.py",
            "p1/p1/notes.md",
            "a/b/../c",
            "plain.txt",
            "",
        ];
        for input in inputs {
            let once = resolver.normalize(input, "p1");
            let twice = resolver.normalize(&once, "p1");
            assert_eq!(once, twice, "normalize not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_normalize_strips_workspace_and_project_prefixes() {
        let resolver = resolver_at("/workspace");
        assert_eq!(resolver.normalize("/workspace/p1/file.txt", "p1"), "file.txt");
        assert_eq!(resolver.normalize("workspace/file.txt", "p1"), "file.txt");
        assert_eq!(resolver.normalize("p1/sub/file.txt", "p1"), "sub/file.txt");
        assert_eq!(resolver.normalize("file.txt", "p1"), "file.txt");
    }

    #[test]
    fn test_normalize_url_decoding() {
        let resolver = resolver_at("/workspace");
        assert_eq!(resolver.normalize("my%20file.txt", "p1"), "my file.txt");
        assert_eq!(resolver.normalize("caf%C3%A9.txt", "p1"), "café.txt");
    }

    #[test]
    fn test_normalize_unicode_escapes() {
        let resolver = resolver_at("/workspace");
        let escaped_a = "file\\u0041.txt";
        assert_eq!(resolver.normalize(escaped_a, "p1"), "fileA.txt");
        let combining = "u\\u0308ber.txt";
        assert_eq!(resolver.normalize(combining, "p1"), "u\u{0308}ber.txt");
        // Lone surrogates cannot become chars; the hex text survives and the
        // stray backslash is treated like any other separator.
        let surrogate = "bad\\ud800.txt";
        assert_eq!(resolver.normalize(surrogate, "p1"), "bad/ud800.txt");
    }

    #[test]
    fn test_normalize_backslash_separators() {
        let resolver = resolver_at("/workspace");
        assert_eq!(resolver.normalize(r"data\data\file.txt", "p1"), "data/file.txt");
    }

    #[test]
    fn test_resolve_absolute_never_duplicates_project_dir() {
        let resolver = resolver_at("/workspace");
        assert_eq!(
            resolver.resolve_absolute("/workspace/p1/file.txt", "p1"),
            PathBuf::from("/workspace/p1/file.txt")
        );
        assert_eq!(
            resolver.resolve_absolute("file.txt", "p1"),
            PathBuf::from("/workspace/p1/file.txt")
        );
        assert_eq!(
            resolver.resolve_absolute("", "p1"),
            PathBuf::from("/workspace/p1")
        );
    }

    #[test]
    fn test_is_safe_rejects_escapes() {
        let root = tempfile::tempdir().unwrap();
        let root_str = root.path().to_string_lossy().into_owned();
        std::fs::create_dir_all(root.path().join("p1")).unwrap();
        let resolver = resolver_at(&root_str);

        assert!(!resolver.is_safe("../../etc/passwd", "p1"));
        assert!(!resolver.is_safe("../other-project/secrets", "p1"));
        assert!(resolver.is_safe("sub/dir/file.txt", "p1"));
        assert!(resolver.is_safe("file.txt", "p1"));
    }

    #[test]
    fn test_is_safe_on_nonexistent_project_dir() {
        let root = tempfile::tempdir().unwrap();
        let root_str = root.path().to_string_lossy().into_owned();
        let resolver = resolver_at(&root_str);

        // Directory not created yet; containment is still decidable.
        assert!(resolver.is_safe("file.txt", "fresh-project"));
        assert!(!resolver.is_safe("../../../etc/passwd", "fresh-project"));
    }

    #[test]
    fn test_lexical_clean() {
        assert_eq!(
            lexical_clean(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(lexical_clean(Path::new("/a/../../..")), PathBuf::from("/"));
    }

    #[test]
    fn test_malformed_encoding_degrades_gracefully() {
        let resolver = resolver_at("/workspace");
        // Invalid UTF-8 percent sequence: input comes back untouched.
        let raw = "file%FF%FE.txt";
        assert_eq!(resolver.normalize(raw, "p1"), raw);
    }
}
