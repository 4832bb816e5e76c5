use crate::config::STATE_DIR_NAME;
use crate::error::{IndexerError, Result};
use crate::workspace::WorkspacePath;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::{Match, WalkBuilder};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Directory names never indexed, regardless of ignore files
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    STATE_DIR_NAME,
    "target",
    "node_modules",
];

/// Per-directory ignore files, highest precedence first; within one kind the deepest wins
const IGNORE_FILE_NAMES: &[&str] = &[".ignore", ".gitignore"];

fn is_ignored_dir_name(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| IGNORED_DIRS.contains(&n))
}

#[derive(Debug)]
struct CachedMatcher {
    modified: Option<SystemTime>,
    matcher: Arc<Gitignore>,
}

/// Eligibility rules shared by the initial walk and the watcher.
///
/// Ignore files are read the way the walker reads them: `.ignore` files, then `.gitignore`
/// files (deeper directories first), then `.git/info/exclude`. Parsed matchers
/// are cached and reloaded when the file's mtime changes.
#[derive(Debug)]
pub struct PathFilter {
    root: PathBuf,
    excludes: GlobSet,
    matchers: Mutex<HashMap<PathBuf, CachedMatcher>>,
}

impl PathFilter {
    pub fn new(root: &Path, exclude_globs: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_globs {
            let glob = Glob::new(pattern).map_err(|e| {
                IndexerError::Config(format!("invalid exclude glob '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }
        let excludes = builder
            .build()
            .map_err(|e| IndexerError::Config(format!("invalid exclude globs: {e}")))?;

        Ok(Self {
            root: root.to_path_buf(),
            excludes,
            matchers: Mutex::new(HashMap::new()),
        })
    }

    /// Filter with no exclude globs
    #[must_use]
    pub fn permissive(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            excludes: GlobSet::empty(),
            matchers: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn is_excluded(&self, relative: &str) -> bool {
        self.excludes.is_match(relative)
    }

    /// Whether a workspace path is eligible for indexing.
    ///
    /// Hidden components and well-known build/VCS directories are rejected, then exclude
    /// globs, then ignore files. Outside paths only see the exclude globs.
    #[must_use]
    pub fn allows(&self, path: &WorkspacePath, is_dir: bool) -> bool {
        let relative = path.as_str();
        if path.is_outside() {
            return !self.is_excluded(relative);
        }
        let hidden_or_ignored = relative
            .split('/')
            .any(|segment| segment.starts_with('.') || IGNORED_DIRS.contains(&segment));
        if hidden_or_ignored || self.is_excluded(relative) {
            return false;
        }
        !self.is_ignored(&self.root.join(relative), is_dir)
    }

    fn is_ignored(&self, absolute: &Path, is_dir: bool) -> bool {
        let Some(parent) = absolute.parent() else {
            return false;
        };
        for name in IGNORE_FILE_NAMES {
            for dir in parent.ancestors().take_while(|dir| dir.starts_with(&self.root)) {
                match self.decide(dir, &dir.join(name), absolute, is_dir) {
                    Match::Ignore(_) => return true,
                    Match::Whitelist(_) => return false,
                    Match::None => {}
                }
            }
        }
        let exclude = self.root.join(".git").join("info").join("exclude");
        self.decide(&self.root, &exclude, absolute, is_dir).is_ignore()
    }

    fn decide(&self, dir: &Path, file: &Path, absolute: &Path, is_dir: bool) -> Match<()> {
        match self.matcher(dir, file) {
            Some(matcher) => matcher
                .matched_path_or_any_parents(absolute, is_dir)
                .map(|_| ()),
            None => Match::None,
        }
    }

    /// Parsed matcher for `file` rooted at `dir`, or `None` when the file is absent.
    fn matcher(&self, dir: &Path, file: &Path) -> Option<Arc<Gitignore>> {
        let mut cache = self.matchers.lock().unwrap_or_else(PoisonError::into_inner);
        let Ok(metadata) = std::fs::metadata(file) else {
            cache.remove(file);
            return None;
        };
        let modified = metadata.modified().ok();
        if let Some(cached) = cache.get(file) {
            if cached.modified.is_some() && cached.modified == modified {
                return Some(Arc::clone(&cached.matcher));
            }
        }

        let mut builder = GitignoreBuilder::new(dir);
        if let Some(err) = builder.add(file) {
            log::debug!("Partially unreadable ignore file {}: {err}", file.display());
        }
        let matcher = match builder.build() {
            Ok(matcher) => Arc::new(matcher),
            Err(err) => {
                log::warn!("Ignoring invalid ignore file {}: {err}", file.display());
                return None;
            }
        };
        cache.insert(
            file.to_path_buf(),
            CachedMatcher {
                modified,
                matcher: Arc::clone(&matcher),
            },
        );
        Some(matcher)
    }
}

/// Gitignore-aware workspace walker
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    filter: Arc<PathFilter>,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let filter = Arc::new(PathFilter::permissive(&root));
        Self { root, filter }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Arc<PathFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Visit every eligible file under `start` (a directory inside the root).
    /// Stops early when `visit` returns `false`.
    pub fn walk(&self, start: &Path, mut visit: impl FnMut(PathBuf) -> bool) {
        // below the root the walker cannot see ignore files of the directories above `start`
        let partial = start != self.root;
        let walker = WalkBuilder::new(start)
            .hidden(true)
            .ignore(true)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .parents(false)
            .require_git(false)
            .follow_links(false)
            .filter_entry(|entry| !is_ignored_dir_name(entry.file_name()))
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    log::debug!("Skipping unreadable entry: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.into_path();
            if let Ok(relative) = path.strip_prefix(&self.root) {
                let relative = relative.to_string_lossy().replace('\\', "/");
                let eligible = if partial {
                    WorkspacePath::parse(&relative).is_ok_and(|p| self.filter.allows(&p, false))
                } else {
                    !self.filter.is_excluded(&relative)
                };
                if !eligible {
                    continue;
                }
            }
            if !visit(path) {
                break;
            }
        }
    }

    /// All eligible files under the root, sorted
    #[must_use]
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        self.walk(&self.root, |path| {
            files.push(path);
            true
        });
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn relative(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn scan_respects_gitignore_hidden_and_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("target/debug")).unwrap();
        fs::create_dir_all(root.join(".ragwatch")).unwrap();
        fs::write(root.join("src/lib.rs"), "pub fn a() {}").unwrap();
        fs::write(root.join("notes.md"), "# notes").unwrap();
        fs::write(root.join("debug.log"), "noise").unwrap();
        fs::write(root.join(".env"), "SECRET=1").unwrap();
        fs::write(root.join("target/debug/out.rs"), "x").unwrap();
        fs::write(root.join(".ragwatch/index.json"), "{}").unwrap();
        fs::write(root.join(".gitignore"), "*.log\n").unwrap();

        let files = FileScanner::new(&root).scan();
        assert_eq!(relative(&root, &files), vec!["notes.md", "src/lib.rs"]);
    }

    #[test]
    fn exclude_globs_apply_to_walk_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(root.join("vendor/dep.rs"), "x").unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();

        let filter = Arc::new(PathFilter::new(&root, &["vendor/**".to_string()]).unwrap());
        let files = FileScanner::new(&root)
            .with_filter(Arc::clone(&filter))
            .scan();
        assert_eq!(relative(&root, &files), vec!["main.rs"]);

        assert!(!filter.allows(&WorkspacePath::parse("vendor/dep.rs").unwrap(), false));
        assert!(filter.allows(&WorkspacePath::parse("main.rs").unwrap(), false));
        assert!(!filter.allows(&WorkspacePath::parse(".git/HEAD").unwrap(), false));
        assert!(!filter.allows(&WorkspacePath::parse("node_modules/a.js").unwrap(), false));
    }

    #[test]
    fn filter_honors_root_gitignore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join(".gitignore"), "build/\n*.tmp\n").unwrap();

        let filter = PathFilter::new(&root, &[]).unwrap();
        assert!(!filter.allows(&WorkspacePath::parse("scratch.tmp").unwrap(), false));
        assert!(!filter.allows(&WorkspacePath::parse("build/out.txt").unwrap(), false));
        assert!(filter.allows(&WorkspacePath::parse("src/keep.txt").unwrap(), false));
    }

    #[test]
    fn filter_and_walk_agree_on_nested_ignore_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::create_dir_all(root.join("other")).unwrap();
        fs::write(root.join("sub/.gitignore"), "*.tmp\n").unwrap();
        fs::write(root.join("sub/deeper/.ignore"), "!keep.tmp\n").unwrap();
        fs::write(root.join("sub/keep.txt"), "x").unwrap();
        fs::write(root.join("sub/x.tmp"), "x").unwrap();
        fs::write(root.join("sub/deeper/keep.tmp"), "x").unwrap();
        fs::write(root.join("other/y.tmp"), "x").unwrap();

        let filter = Arc::new(PathFilter::new(&root, &[]).unwrap());
        let files = FileScanner::new(&root)
            .with_filter(Arc::clone(&filter))
            .scan();
        assert_eq!(
            relative(&root, &files),
            vec!["other/y.tmp", "sub/deeper/keep.tmp", "sub/keep.txt"]
        );

        let allows = |p: &str| filter.allows(&WorkspacePath::parse(p).unwrap(), false);
        assert!(!allows("sub/x.tmp"));
        assert!(allows("sub/keep.txt"));
        assert!(allows("sub/deeper/keep.tmp"));
        assert!(allows("other/y.tmp"));
    }

    #[test]
    fn filter_honors_git_info_exclude() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join(".git/info")).unwrap();
        fs::write(root.join(".git/info/exclude"), "secrets/\n").unwrap();
        fs::create_dir_all(root.join("secrets")).unwrap();
        fs::write(root.join("secrets/key.txt"), "x").unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();

        let filter = Arc::new(PathFilter::new(&root, &[]).unwrap());
        let files = FileScanner::new(&root)
            .with_filter(Arc::clone(&filter))
            .scan();
        assert_eq!(relative(&root, &files), vec!["main.rs"]);
        assert!(!filter.allows(&WorkspacePath::parse("secrets/key.txt").unwrap(), false));
    }

    #[test]
    fn walking_a_subdirectory_applies_ignore_files_above_it() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::write(root.join(".gitignore"), "*.log\n").unwrap();
        fs::create_dir_all(root.join("moved/in")).unwrap();
        fs::write(root.join("moved/in/app.log"), "noise").unwrap();
        fs::write(root.join("moved/in/app.rs"), "fn a() {}").unwrap();

        let scanner = FileScanner::new(&root);
        let mut seen = Vec::new();
        scanner.walk(&root.join("moved"), |path| {
            seen.push(path);
            true
        });
        assert_eq!(relative(&root, &seen), vec!["moved/in/app.rs"]);
    }

    #[test]
    fn invalid_glob_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PathFilter::new(dir.path(), &["[".to_string()]),
            Err(IndexerError::Config(_))
        ));
    }

    #[test]
    fn walk_stops_when_visitor_declines() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            fs::write(root.join(name), name).unwrap();
        }
        let mut seen = 0;
        FileScanner::new(&root).walk(&root, |_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }
}
