//! Project root resolution for sandbox mounts

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of a root lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoot {
    pub root: PathBuf,
    /// No marker was found and the file's parent is used instead
    pub degraded: bool,
}

/// Finds the enclosing project of a file by walking up to a marker
#[derive(Debug, Clone)]
pub struct ProjectRootResolver {
    markers: Vec<String>,
}

impl ProjectRootResolver {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Returns the first ancestor of `file` containing a marker, or the
    /// file's own parent when there is none
    pub fn resolve(&self, file: &Path) -> PathBuf {
        self.resolve_detailed(file).root
    }

    pub fn resolve_detailed(&self, file: &Path) -> ResolvedRoot {
        // A bare file name has an empty parent
        let parent = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(root) = self.find(&parent) {
            debug!(file = %file.display(), root = %root.display(), "Resolved project root");
            return ResolvedRoot {
                root,
                degraded: false,
            };
        }

        warn!(
            file = %file.display(),
            fallback = %parent.display(),
            "No project marker found, using the file's directory as project root"
        );
        ResolvedRoot {
            root: parent,
            degraded: true,
        }
    }

    fn find(&self, start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|dir| self.markers.iter().any(|marker| dir.join(marker).exists()))
            .map(Path::to_path_buf)
    }
}
