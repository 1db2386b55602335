use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Command;

use tokio::task;
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::error::{Result, SandboxFsError};

/// How the heavier primitives are executed. `Native` shells out to cp/du/chmod
/// (faster on NFS-backed volumes); any subprocess failure falls back to the
/// portable walk, which is also what tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Portable,
    Native,
}

/// Low-level durable filesystem primitives. Each mutation pairs with the
/// directory fsync that makes its directory-entry change survive a crash; the
/// async surface offloads every blocking call onto the worker pool as one unit.
#[derive(Debug, Clone)]
pub struct DurableFs {
    backend: Backend,
    refresh_attr_cache: bool,
}

impl DurableFs {
    pub fn new(cfg: &StorageConfig) -> Self {
        let backend = if cfg.native_tools && cfg!(target_os = "linux") {
            Backend::Native
        } else {
            Backend::Portable
        };
        Self { backend, refresh_attr_cache: cfg.refresh_attr_cache }
    }

    /// Portable backend regardless of configuration.
    pub fn portable() -> Self {
        Self { backend: Backend::Portable, refresh_attr_cache: false }
    }

    // ---- existence ----

    /// Existence probe. When enabled, re-asserts the parent directory's
    /// ownership first so a stale NFS attribute cache does not report a false
    /// negative; that step is best-effort and its failures are only logged.
    pub fn exists_sync(&self, path: &Path) -> bool {
        if self.refresh_attr_cache {
            if let Err(e) = refresh_parent_ownership(path) {
                debug!(path = %path.display(), error = %e, "attribute cache refresh failed");
            }
        }
        path.exists()
    }

    pub async fn exists(&self, path: &Path) -> Result<bool> {
        let this = self.clone();
        let path = path.to_path_buf();
        Ok(task::spawn_blocking(move || this.exists_sync(&path)).await?)
    }

    // ---- size ----

    /// Size in bytes: the file's own length, or the recursive sum of contained
    /// file sizes for a directory. Unreadable entries count as zero.
    pub fn size_of_sync(&self, path: &Path) -> io::Result<u64> {
        let metadata = fs::metadata(path)?;
        if metadata.is_file() {
            return Ok(metadata.len());
        }
        if self.backend == Backend::Native {
            if let Some(size) = du_bytes(path) {
                return Ok(size);
            }
        }
        Ok(walk_size(path))
    }

    pub async fn size_of(&self, path: &Path) -> Result<u64> {
        let this = self.clone();
        let path = path.to_path_buf();
        Ok(task::spawn_blocking(move || this.size_of_sync(&path)).await??)
    }

    // ---- copy ----

    pub fn copy_file_sync(&self, src: &Path, dst: &Path) -> Result<()> {
        if self.backend == Backend::Native && subprocess_ok("cp", &[src, dst]) {
            return Ok(());
        }
        fs::copy(src, dst)?;
        Ok(())
    }

    pub fn copy_tree_sync(&self, src: &Path, dst: &Path) -> Result<()> {
        if !src.is_dir() {
            return Err(SandboxFsError::WrongKind {
                path: src.to_string_lossy().into_owned(),
                expected_dir: true,
            });
        }
        if self.backend == Backend::Native && !dst.exists() && subprocess_ok("cp", &[Path::new("-r"), src, dst]) {
            return Ok(());
        }
        copy_tree_portable(src, dst)?;
        Ok(())
    }

    /// Copy a file, then fsync the destination's parent directory.
    pub async fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let this = self.clone();
        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        task::spawn_blocking(move || {
            this.copy_file_sync(&src, &dst)?;
            if let Some(parent) = dst.parent() {
                this.fsync_dir_sync(parent)?;
            }
            Ok(())
        })
        .await?
    }

    /// Copy a tree as one blocking unit, then fsync the destination directory.
    pub async fn copy_tree(&self, src: &Path, dst: &Path) -> Result<()> {
        let this = self.clone();
        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        task::spawn_blocking(move || {
            this.copy_tree_sync(&src, &dst)?;
            this.fsync_dir_sync(&dst)
        })
        .await?
    }

    // ---- move ----

    pub fn move_file_sync(&self, src: &Path, dst: &Path) -> Result<()> {
        match fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                self.copy_file_sync(src, dst)?;
                fs::remove_file(src)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn move_tree_sync(&self, src: &Path, dst: &Path) -> Result<()> {
        match fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                self.copy_tree_sync(src, dst)?;
                fs::remove_dir_all(src)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        let this = self.clone();
        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        task::spawn_blocking(move || {
            this.move_file_sync(&src, &dst)?;
            if let Some(parent) = dst.parent() {
                this.fsync_dir_sync(parent)?;
            }
            Ok(())
        })
        .await?
    }

    pub async fn move_tree(&self, src: &Path, dst: &Path) -> Result<()> {
        let this = self.clone();
        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        task::spawn_blocking(move || {
            this.move_tree_sync(&src, &dst)?;
            this.fsync_dir_sync(&dst)
        })
        .await?
    }

    // ---- delete ----

    // Deletion needs no fsync: absence is crash-safe on journaled filesystems.

    pub async fn remove_file(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || fs::remove_file(&path).map_err(SandboxFsError::from)).await?
    }

    pub async fn remove_tree(&self, path: &Path) -> Result<()> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || fs::remove_dir_all(&path).map_err(SandboxFsError::from)).await?
    }

    // ---- permissions ----

    /// Recursively applies `mode` so ownership drift from the storage layer
    /// cannot lock out later access. Symlinks are skipped, not followed.
    pub fn normalize_permissions_sync(&self, path: &Path, mode: u32) -> Result<()> {
        if self.backend == Backend::Native
            && subprocess_ok("chmod", &[Path::new(&format!("{mode:o}")), Path::new("-R"), path])
        {
            return Ok(());
        }
        chmod_recursive(path, mode)?;
        Ok(())
    }

    pub async fn normalize_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        let this = self.clone();
        let path = path.to_path_buf();
        task::spawn_blocking(move || this.normalize_permissions_sync(&path, mode)).await?
    }

    // ---- durability ----

    /// Opens the directory and flushes it to the storage device. Filesystems
    /// that refuse directory fsync with EINVAL are tolerated; any other error
    /// is fatal to the operation.
    pub fn fsync_dir_sync(&self, path: &Path) -> Result<()> {
        let dir = File::open(path)?;
        match dir.sync_all() {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                debug!(path = %path.display(), "directory fsync unsupported, ignoring EINVAL");
                Ok(())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "directory fsync failed");
                Err(e.into())
            }
        }
    }

    pub async fn fsync_dir(&self, path: &Path) -> Result<()> {
        let this = self.clone();
        let path = path.to_path_buf();
        task::spawn_blocking(move || this.fsync_dir_sync(&path)).await?
    }

    /// Writes a file, flushes it to the device, then fsyncs the parent
    /// directory so the new entry survives a crash.
    pub fn write_file_durable_sync(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(content)?;
        file.sync_all()?;
        if let Some(parent) = path.parent() {
            self.fsync_dir_sync(parent)?;
        }
        Ok(())
    }

    pub async fn write_file_durable(&self, path: &Path, content: Vec<u8>) -> Result<()> {
        let this = self.clone();
        let path = path.to_path_buf();
        task::spawn_blocking(move || this.write_file_durable_sync(&path, &content)).await?
    }

    /// Overwrites an existing file under an exclusive non-blocking advisory
    /// lock. A concurrent holder makes this fail immediately rather than
    /// queue; content is truncated only after the lock is held, and flushed to
    /// the device before release.
    pub fn write_file_exclusive_sync(&self, path: &Path, content: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(SandboxFsError::locked(path.to_string_lossy()));
            }
            return Err(err.into());
        }
        file.set_len(0)?;
        file.write_all(content)?;
        file.sync_all()?;
        // lock released when the descriptor closes
        Ok(())
    }

    pub async fn write_file_exclusive(&self, path: &Path, content: Vec<u8>) -> Result<()> {
        let this = self.clone();
        let path = path.to_path_buf();
        task::spawn_blocking(move || this.write_file_exclusive_sync(&path, &content)).await?
    }

    // ---- free space ----

    /// Available bytes on the volume containing `root`, statvfs semantics.
    /// Point-in-time and never cached.
    pub fn free_space_sync(&self, root: &Path) -> Result<u64> {
        let c_path = CString::new(root.as_os_str().as_bytes())
            .map_err(|_| SandboxFsError::illegal_path("Root path contains a NUL byte"))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }

    pub async fn free_space(&self, root: &Path) -> Result<u64> {
        let this = self.clone();
        let root = root.to_path_buf();
        task::spawn_blocking(move || this.free_space_sync(&root)).await?
    }
}

/// Re-reads and re-applies the ownership of `path`'s parent, forcing NFS
/// clients to drop their cached directory attributes.
fn refresh_parent_ownership(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return Ok(()),
    };
    let metadata = fs::metadata(parent)?;
    let c_path = CString::new(parent.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "NUL in path"))?;
    let ret = unsafe { libc::chown(c_path.as_ptr(), metadata.uid(), metadata.gid()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn du_bytes(path: &Path) -> Option<u64> {
    let output = Command::new("du").arg("-sb").arg(path).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn subprocess_ok(program: &str, args: &[&Path]) -> bool {
    match Command::new(program).args(args).output() {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            warn!(program, status = ?output.status, "native tool failed, falling back");
            false
        }
        Err(e) => {
            warn!(program, error = %e, "native tool unavailable, falling back");
            false
        }
    }
}

fn walk_size(path: &Path) -> u64 {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            match entry.metadata() {
                Ok(md) if md.is_dir() => stack.push(entry.path()),
                Ok(md) => total += md.len(),
                Err(_) => {}
            }
        }
    }
    total
}

fn copy_tree_portable(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.exists() && !dst.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination exists and is not a directory: {}", dst.display()),
        ));
    }
    fs::create_dir_all(dst)?;
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        for entry in fs::read_dir(&from)? {
            let entry = entry?;
            let target = to.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                fs::create_dir_all(&target)?;
                stack.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
    }
    Ok(())
}

fn chmod_recursive(path: &Path, mode: u32) -> io::Result<()> {
    let mut stack = vec![path.to_path_buf()];
    while let Some(current) = stack.pop() {
        let metadata = fs::symlink_metadata(&current)?;
        if metadata.file_type().is_symlink() {
            continue;
        }
        fs::set_permissions(&current, fs::Permissions::from_mode(mode))?;
        if metadata.is_dir() {
            for entry in fs::read_dir(&current)? {
                stack.push(entry?.path());
            }
        }
    }
    Ok(())
}
