use crate::error::{IndexerError, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Path relative to the workspace root.
///
/// Always `/`-separated and lexically normalized: no `.` components, no empty segments, and
/// `..` only as a leading run (which only appears when outside paths are allowed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspacePath(String);

impl WorkspacePath {
    /// Parse an already-relative path string, e.g. one read back from the index store.
    pub fn parse(raw: &str) -> Result<Self> {
        if Path::new(raw).has_root() || raw.starts_with('/') {
            return Err(IndexerError::InvalidPath(format!(
                "expected a relative path, got {raw}"
            )));
        }
        let segments = normalize_segments(raw.split(['/', '\\']))?;
        Self::from_segments(raw, &segments)
    }

    fn from_segments(raw: &str, segments: &[String]) -> Result<Self> {
        if segments.is_empty() {
            return Err(IndexerError::InvalidPath(format!(
                "'{raw}' does not name a file inside the workspace"
            )));
        }
        Ok(Self(segments.join("/")))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the path climbs out of the workspace root
    #[must_use]
    pub fn is_outside(&self) -> bool {
        self.0 == ".." || self.0.starts_with("../")
    }

    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspacePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonical workspace root plus the policy for paths that resolve outside it
#[derive(Debug, Clone)]
pub struct WorkspaceRoot {
    root: PathBuf,
    allow_outside: bool,
}

impl WorkspaceRoot {
    /// `root` must be an existing directory; it is canonicalized once here.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            IndexerError::InvalidPath(format!("{}: {e}", root.display()))
        })?;
        if !canonical.is_dir() {
            return Err(IndexerError::InvalidPath(format!(
                "{} is not a directory",
                canonical.display()
            )));
        }
        Ok(Self {
            root: canonical,
            allow_outside: false,
        })
    }

    #[must_use]
    pub const fn with_allow_outside(mut self, allow: bool) -> Self {
        self.allow_outside = allow;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a user-supplied path (relative to the root, or absolute).
    pub fn resolve(&self, raw: &str) -> Result<WorkspacePath> {
        let candidate = Path::new(raw);
        if candidate.is_absolute() {
            return self.relativize(candidate);
        }
        let segments = normalize_segments(
            candidate
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned()),
        )?;
        let path = WorkspacePath::from_segments(raw, &segments)?;
        self.check_inside(path)
    }

    /// Map an absolute path (e.g. from a watcher event) into the workspace.
    pub fn relativize(&self, absolute: &Path) -> Result<WorkspacePath> {
        let absolute = normalize_absolute(absolute);
        let raw = absolute.display().to_string();
        if let Ok(inside) = absolute.strip_prefix(&self.root) {
            let segments: Vec<String> = inside
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            return WorkspacePath::from_segments(&raw, &segments);
        }

        let root_parts: Vec<Component<'_>> = self.root.components().collect();
        let path_parts: Vec<Component<'_>> = absolute.components().collect();
        let common = root_parts
            .iter()
            .zip(&path_parts)
            .take_while(|(a, b)| a == b)
            .count();
        if common == 0 {
            return Err(self.outside_error(&raw));
        }
        let mut segments: Vec<String> = vec!["..".to_string(); root_parts.len() - common];
        segments.extend(
            path_parts[common..]
                .iter()
                .map(|c| c.as_os_str().to_string_lossy().into_owned()),
        );
        let path = WorkspacePath::from_segments(&raw, &segments)?;
        self.check_inside(path)
    }

    /// Absolute location of a workspace path
    #[must_use]
    pub fn absolute(&self, path: &WorkspacePath) -> PathBuf {
        normalize_absolute(&self.root.join(path.as_str()))
    }

    fn check_inside(&self, path: WorkspacePath) -> Result<WorkspacePath> {
        if path.is_outside() && !self.allow_outside {
            return Err(self.outside_error(path.as_str()));
        }
        Ok(path)
    }

    fn outside_error(&self, path: &str) -> IndexerError {
        IndexerError::OutsideWorkspace {
            path: path.to_string(),
            root: self.root.display().to_string(),
        }
    }
}

/// Fold `.`/`..` segments; surplus `..` is kept as a leading run.
fn normalize_segments<I, S>(parts: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for part in parts {
        let part = part.as_ref();
        match part {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|last| last != "..") {
                    out.pop();
                } else {
                    out.push("..".to_string());
                }
            }
            segment if segment.contains('\0') => {
                return Err(IndexerError::InvalidPath(
                    "path contains a NUL byte".to_string(),
                ))
            }
            segment => out.push(segment.to_string()),
        }
    }
    Ok(out)
}

fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_normalizes_separators_and_dots() {
        let path = WorkspacePath::parse("src/./lib/../main.rs").unwrap();
        assert_eq!(path.as_str(), "src/main.rs");
        assert_eq!(path.file_name(), "main.rs");
        assert_eq!(
            WorkspacePath::parse("docs\\guide.md").unwrap().as_str(),
            "docs/guide.md"
        );
    }

    #[test]
    fn parse_rejects_empty_and_absolute() {
        assert!(WorkspacePath::parse("").is_err());
        assert!(WorkspacePath::parse("a/..").is_err());
        assert!(WorkspacePath::parse("/etc/passwd").is_err());
    }

    #[test]
    fn resolve_keeps_traversal_inside_unless_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();

        assert_eq!(root.resolve("a/b/../c.txt").unwrap().as_str(), "a/c.txt");
        assert!(matches!(
            root.resolve("../secret.txt"),
            Err(IndexerError::OutsideWorkspace { .. })
        ));

        let permissive = root.clone().with_allow_outside(true);
        let outside = permissive.resolve("../secret.txt").unwrap();
        assert!(outside.is_outside());
        assert_eq!(outside.as_str(), "../secret.txt");
    }

    #[test]
    fn relativize_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        let inside = root.path().join("nested").join("file.rs");

        assert_eq!(root.relativize(&inside).unwrap().as_str(), "nested/file.rs");
        assert!(root.relativize(root.path()).is_err());

        let sibling = root.path().parent().unwrap().join("elsewhere.txt");
        assert!(root.relativize(&sibling).is_err());
        let permissive = root.with_allow_outside(true);
        assert_eq!(
            permissive.relativize(&sibling).unwrap().as_str(),
            "../elsewhere.txt"
        );
    }

    #[test]
    fn absolute_round_trips_through_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = WorkspaceRoot::new(dir.path()).unwrap();
        let path = root.resolve("a/b.txt").unwrap();
        assert_eq!(root.absolute(&path), root.path().join("a").join("b.txt"));
    }

    #[test]
    fn missing_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WorkspaceRoot::new(dir.path().join("missing")).is_err());
    }
}
