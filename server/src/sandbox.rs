use std::path::{Component, Path, PathBuf};

use crate::error::ApiError;

/// Confines all file access to one root directory.
///
/// The root is canonicalized once at construction and never changes.
/// Every request path is resolved and containment-checked from scratch;
/// results are never cached because symlinks under the root can change
/// between requests.
#[derive(Debug)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    pub fn new(root: &Path) -> anyhow::Result<Self> {
        let root = root.canonicalize()?;
        Ok(PathSandbox { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a client-supplied relative path to an absolute path inside
    /// the root, or rejects it with `Unauthorized`.
    ///
    /// Files that do not exist yet are allowed (the editor creates them on
    /// first save): the deepest existing ancestor is canonicalized, so
    /// symlinks in the existing part still get resolved, and the missing
    /// tail is appended as-is after checking it contains only plain name
    /// components.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ApiError> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Err(ApiError::Unauthorized("path must be relative"));
        }

        let joined = self.root.join(rel);
        let resolved = match joined.canonicalize() {
            Ok(p) => p,
            Err(_) => self.resolve_missing(&joined)?,
        };

        // starts_with compares whole components, so /root-evil does not
        // pass a check against /root. The root itself is not an editable
        // target.
        if resolved == self.root || !resolved.starts_with(&self.root) {
            return Err(ApiError::Unauthorized("path escapes editor root"));
        }

        Ok(resolved)
    }

    fn resolve_missing(&self, joined: &Path) -> Result<PathBuf, ApiError> {
        let mut existing = joined.to_path_buf();
        let mut tail: Vec<PathBuf> = Vec::new();

        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(PathBuf::from(name));
                    existing = parent.to_path_buf();
                }
                _ => return Err(ApiError::Unauthorized("path cannot be resolved")),
            }
        }

        let mut resolved = existing
            .canonicalize()
            .map_err(|_| ApiError::Unauthorized("path cannot be resolved"))?;

        for part in tail.into_iter().rev() {
            // A `..` or `.` in the non-existent tail would bypass
            // canonicalization entirely, so only plain names are allowed.
            match part.components().next() {
                Some(Component::Normal(_)) => resolved.push(part),
                _ => return Err(ApiError::Unauthorized("path cannot be resolved")),
            }
        }

        Ok(resolved)
    }
}
