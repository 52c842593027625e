use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use wsm_core::{Result, WatchConfig};

/// Decides which paths below a watched root are tracked.
///
/// All checks take paths relative to the root. A file is tracked when it is within
/// `max_depth` components, none of its ancestors is excluded, it is not gitignored,
/// and it matches an include pattern (or no include patterns are configured).
#[derive(Debug)]
pub struct PathFilter {
    root: PathBuf,
    include: Option<GlobSet>,
    exclude: GlobSet,
    gitignore: Option<Gitignore>,
    max_depth: usize,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

impl PathFilter {
    pub fn new(root: &Path, config: &WatchConfig) -> Result<Self> {
        let include = if config.include_patterns.is_empty() {
            None
        } else {
            Some(build_globset(&config.include_patterns)?)
        };
        let exclude = build_globset(&config.exclude_patterns)?;

        let mut gitignore = None;
        let gi_path = root.join(".gitignore");
        if config.respect_gitignore && gi_path.exists() {
            let mut builder = GitignoreBuilder::new(root);
            if let Some(e) = builder.add(&gi_path) {
                warn!("Partially loaded .gitignore for {:?}: {}", root, e);
            }
            match builder.build() {
                Ok(gi) => {
                    debug!("Loaded .gitignore for {:?}", root);
                    gitignore = Some(gi);
                }
                Err(e) => warn!("Failed to load .gitignore for {:?}: {}", root, e),
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            include,
            exclude,
            gitignore,
            max_depth: config.max_depth,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.root)
            .ok()
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    fn is_gitignored(&self, rel: &Path, is_dir: bool) -> bool {
        self.gitignore
            .as_ref()
            .map(|gi| {
                gi.matched_path_or_any_parents(rel, is_dir).is_ignore()
            })
            .unwrap_or(false)
    }

    /// Excluded directories are neither descended into nor reported.
    pub fn is_excluded_dir(&self, rel: &Path) -> bool {
        self.exclude.is_match(rel)
            || self.exclude.is_match(rel.join("*"))
            || self.is_gitignored(rel, true)
    }

    /// Whether files inside `rel` could still be within the depth limit.
    pub fn can_descend(&self, rel: &Path) -> bool {
        rel.components().count() < self.max_depth
    }

    pub fn should_track_dir(&self, rel: &Path) -> bool {
        rel.components().count() <= self.max_depth
            && !rel.ancestors().any(|a| {
                !a.as_os_str().is_empty() && self.is_excluded_dir(a)
            })
    }

    pub fn should_track_file(&self, rel: &Path) -> bool {
        if rel.components().count() > self.max_depth {
            return false;
        }
        if self.exclude.is_match(rel) || self.is_gitignored(rel, false) {
            return false;
        }
        if let Some(parent) = rel.parent() {
            if parent
                .ancestors()
                .any(|a| !a.as_os_str().is_empty() && self.is_excluded_dir(a))
            {
                return false;
            }
        }
        match &self.include {
            Some(include) => include.is_match(rel),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn filter_with(root: &Path, f: impl FnOnce(&mut WatchConfig)) -> PathFilter {
        let mut config = WatchConfig::default();
        f(&mut config);
        PathFilter::new(root, &config).unwrap()
    }

    #[test]
    fn test_default_excludes() {
        let tmp = TempDir::new().unwrap();
        let filter = filter_with(tmp.path(), |_| {});

        assert!(filter.should_track_file(Path::new("src/a.js")));
        assert!(filter.should_track_file(Path::new(".env")));
        assert!(!filter.should_track_file(Path::new("node_modules/react/index.js")));
        assert!(!filter.should_track_file(Path::new("app/node_modules/x.js")));
        assert!(!filter.should_track_file(Path::new(".git/HEAD")));
        assert!(filter.is_excluded_dir(Path::new("node_modules")));
        assert!(filter.is_excluded_dir(Path::new("pkg/__pycache__")));
        assert!(!filter.is_excluded_dir(Path::new("src")));
    }

    #[test]
    fn test_include_patterns_and_depth() {
        let tmp = TempDir::new().unwrap();
        let filter = filter_with(tmp.path(), |c| {
            c.include_patterns = vec!["*.js".to_string()];
            c.max_depth = 2;
        });

        assert!(filter.should_track_file(Path::new("a.js")));
        assert!(filter.should_track_file(Path::new("src/a.js")));
        assert!(!filter.should_track_file(Path::new("src/a.py")));
        assert!(!filter.should_track_file(Path::new("src/deep/a.js")));
        assert!(filter.can_descend(Path::new("src")));
        assert!(!filter.can_descend(Path::new("src/deep")));
    }

    #[test]
    fn test_gitignore_respected() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(".gitignore"), "*.log\ngenerated/\n").unwrap();
        let filter = filter_with(tmp.path(), |_| {});

        assert!(!filter.should_track_file(Path::new("debug.log")));
        assert!(!filter.should_track_file(Path::new("generated/out.js")));
        assert!(filter.should_track_file(Path::new("src/main.js")));

        let permissive = filter_with(tmp.path(), |c| c.respect_gitignore = false);
        assert!(permissive.should_track_file(Path::new("debug.log")));
    }

    #[test]
    fn test_relative() {
        let tmp = TempDir::new().unwrap();
        let filter = filter_with(tmp.path(), |_| {});
        assert_eq!(
            filter.relative(&tmp.path().join("src/a.js")),
            Some(PathBuf::from("src/a.js"))
        );
        assert_eq!(filter.relative(tmp.path()), None);
        assert_eq!(filter.relative(Path::new("/elsewhere/a.js")), None);
    }
}
