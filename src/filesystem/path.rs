use std::path::{Path, PathBuf};

use crate::error::{Result, SandboxFsError};
use crate::filesystem::durable::DurableFs;

/// Longest leaf name accepted, in UTF-8 bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Pre-conditions checked while resolving a relative path, before any mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveChecks {
    pub must_exist: bool,
    pub must_not_exist: bool,
    pub must_be_dir: bool,
    pub must_be_file: bool,
}

impl ResolveChecks {
    pub fn existing() -> Self {
        Self { must_exist: true, ..Self::default() }
    }

    pub fn existing_dir() -> Self {
        Self { must_exist: true, must_be_dir: true, ..Self::default() }
    }

    pub fn existing_file() -> Self {
        Self { must_exist: true, must_be_file: true, ..Self::default() }
    }

    pub fn absent() -> Self {
        Self { must_not_exist: true, ..Self::default() }
    }
}

/// Confines every caller-supplied relative path to one tenant root. All
/// legality rules run before any filesystem I/O; containment failures close
/// the operation rather than falling through.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(SandboxFsError::illegal_path(format!(
                "Sandbox root must be absolute: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Syntactic legality: leading separator, no `//` prefix, no `.` or `..`
    /// segment. Returns the canonical relative form with empty segments
    /// collapsed.
    pub fn normalize_relative(path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(SandboxFsError::illegal_path("Path must not be empty"));
        }
        if !path.starts_with('/') {
            return Err(SandboxFsError::illegal_path(format!("Path must start with '/': {path}")));
        }
        if path[1..].starts_with('/') {
            return Err(SandboxFsError::illegal_path(format!("Path must not start with '//': {path}")));
        }
        let mut segments = Vec::new();
        for segment in path.split('/') {
            if segment == "." || segment == ".." {
                return Err(SandboxFsError::illegal_path(format!("Path contains '{segment}': {path}")));
            }
            if !segment.is_empty() {
                segments.push(segment);
            }
        }
        Ok(format!("/{}", segments.join("/")))
    }

    /// Turns an untrusted relative path into a safe absolute path under the
    /// root, then applies the requested pre-condition checks.
    pub fn resolve(&self, durable: &DurableFs, relative: &str, checks: ResolveChecks) -> Result<PathBuf> {
        let normalized = Self::normalize_relative(relative)?;
        let absolute = if normalized == "/" {
            self.root.clone()
        } else {
            self.root.join(&normalized[1..])
        };

        // Fail closed on anything that slipped past normalization.
        if absolute != self.root && !absolute.starts_with(&self.root) {
            return Err(SandboxFsError::illegal_path(format!("Path escapes the sandbox: {relative}")));
        }

        if checks.must_exist && !durable.exists_sync(&absolute) {
            return Err(SandboxFsError::not_found(normalized));
        }
        if checks.must_not_exist && durable.exists_sync(&absolute) {
            let is_dir = absolute.is_dir();
            return Err(SandboxFsError::AlreadyExists {
                name: leaf_of(&normalized).to_string(),
                is_dir,
            });
        }
        if checks.must_be_dir && !absolute.is_dir() {
            return Err(SandboxFsError::WrongKind { path: normalized, expected_dir: true });
        }
        if checks.must_be_file && absolute.is_dir() {
            return Err(SandboxFsError::WrongKind { path: normalized, expected_dir: false });
        }
        Ok(absolute)
    }

    /// Legality of a *created* leaf name: must not begin with `/` or `.`, and
    /// must fit in 255 UTF-8 bytes. Governs the leaf, not the path components.
    pub fn check_new_name(name: &str) -> Result<()> {
        if name.starts_with('/') || name.starts_with('.') {
            return Err(SandboxFsError::illegal_path(format!(
                "Name must not start with '/' or '.': {name}"
            )));
        }
        if name.len() > MAX_NAME_BYTES {
            return Err(SandboxFsError::name_too_long(name));
        }
        Ok(())
    }

    /// Inverse of `resolve`: the canonical relative form of an absolute path
    /// under this root.
    pub fn relative_of(&self, absolute: &Path) -> String {
        match absolute.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
            Ok(rel) => format!("/{}", rel.to_string_lossy()),
            Err(_) => absolute.to_string_lossy().into_owned(),
        }
    }
}

fn leaf_of(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}
