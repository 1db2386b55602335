//! Orchestrates every public mutation: validate, resolve collisions, mutate,
//! durabilize, redescribe. Blocking filesystem work runs on the worker pool;
//! tree operations execute as one offloaded unit each so concurrent readers
//! never observe an interleaved partial tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, SandboxFsError};
use crate::filesystem::archive::{strip_archive_suffix, ArchiveCodec, TarballCodec};
use crate::filesystem::durable::DurableFs;
use crate::filesystem::entry::{build_descriptor, EntryDescriptor};
use crate::filesystem::names::NameResolver;
use crate::filesystem::path::{PathSandbox, ResolveChecks};
use crate::filesystem::preview::{PreviewPipeline, TabularLimits, TabularPreview};

/// Collision policy for create/copy/move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasteMode {
    /// Auto-rename via the duplicate-name sequence until the name is free.
    #[default]
    Duplicate,
    /// Same source and destination is a no-op success; otherwise overwrite.
    Cover,
}

/// Restricts `rename` to one kind of node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindLimit {
    File,
    Folder,
}

/// Content for `update`, tagged by its declared format. A mismatched payload
/// is rejected at the deserialization boundary, not deep in the write path.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "format", content = "content", rename_all = "lowercase")]
pub enum UpdateContent {
    Text(String),
    Json(serde_json::Value),
}

/// Same-name probe result for a prospective paste target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SameNameCheck {
    pub has_same_file: bool,
    pub has_same_folder: bool,
}

/// Minimal nbformat-4 document written by `create_notebook`.
const NOTEBOOK_TEMPLATE: &str =
    "{\n \"cells\": [],\n \"metadata\": {},\n \"nbformat\": 4,\n \"nbformat_minor\": 5\n}\n";

/// The per-tenant engine: one confined root, one configuration, one archive
/// codec. Cheap to clone; every operation resolves paths fresh and holds no
/// state between calls.
#[derive(Clone)]
pub struct MutationExecutor {
    cfg: Arc<Config>,
    sandbox: PathSandbox,
    names: NameResolver,
    durable: DurableFs,
    preview: PreviewPipeline,
    codec: Arc<dyn ArchiveCodec>,
    protected: Option<String>,
}

impl MutationExecutor {
    pub fn new(root: impl Into<PathBuf>, cfg: Config) -> Result<Self> {
        Self::with_codec(root, cfg, Arc::new(TarballCodec))
    }

    pub fn with_codec(
        root: impl Into<PathBuf>,
        cfg: Config,
        codec: Arc<dyn ArchiveCodec>,
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let sandbox = PathSandbox::new(root)?;
        let protected = if cfg.storage.protected_path.is_empty() {
            None
        } else {
            Some(PathSandbox::normalize_relative(&cfg.storage.protected_path)?)
        };
        Ok(Self {
            names: NameResolver::new(&cfg.naming),
            durable: DurableFs::new(&cfg.storage),
            preview: PreviewPipeline::new(&cfg.preview),
            sandbox,
            codec,
            protected,
            cfg: Arc::new(cfg),
        })
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    // ---- create ----

    /// Creates a directory at `path`, auto-renaming on collision in
    /// `duplicate` mode.
    pub async fn create_folder(&self, path: &str, paste_mode: PasteMode) -> Result<EntryDescriptor> {
        let relative = PathSandbox::normalize_relative(path)?;
        PathSandbox::check_new_name(leaf_of(&relative))?;
        let mut absolute = self.sandbox.resolve(&self.durable, &relative, ResolveChecks::default())?;
        self.ensure_free_space(0)?;

        if paste_mode == PasteMode::Duplicate && self.durable.exists_sync(&absolute) {
            absolute = self.names.resolve_duplicate_path(&self.durable, &absolute)?.0;
        }

        let this = self.clone();
        let target = absolute.clone();
        task::spawn_blocking(move || {
            std::fs::create_dir_all(&target)?;
            this.durable
                .normalize_permissions_sync(&target, this.cfg.storage.permission_mode)?;
            this.durable.fsync_dir_sync(&target)
        })
        .await??;

        self.describe_resolved(absolute, false).await
    }

    /// New empty file with the next free untitled name under `parent`.
    pub async fn create_file(&self, parent: &str) -> Result<EntryDescriptor> {
        self.create_untitled_file(parent, "", Vec::new()).await
    }

    /// New notebook with the next free untitled name under `parent`.
    pub async fn create_notebook(&self, parent: &str) -> Result<EntryDescriptor> {
        self.create_untitled_file(parent, ".ipynb", NOTEBOOK_TEMPLATE.as_bytes().to_vec())
            .await
    }

    /// New directory with the next free untitled name under `parent`.
    pub async fn create_folder_default(&self, parent: &str) -> Result<EntryDescriptor> {
        let parent_abs = self
            .sandbox
            .resolve(&self.durable, parent, ResolveChecks::existing_dir())?;
        self.ensure_free_space(0)?;
        let (absolute, _) = self.names.resolve_untitled_path(&self.durable, &parent_abs, "")?;

        let this = self.clone();
        let target = absolute.clone();
        task::spawn_blocking(move || {
            std::fs::create_dir(&target)?;
            this.durable
                .normalize_permissions_sync(&target, this.cfg.storage.permission_mode)?;
            this.durable.fsync_dir_sync(&target)
        })
        .await??;

        self.describe_resolved(absolute, false).await
    }

    async fn create_untitled_file(
        &self,
        parent: &str,
        extension: &str,
        content: Vec<u8>,
    ) -> Result<EntryDescriptor> {
        let parent_abs = self
            .sandbox
            .resolve(&self.durable, parent, ResolveChecks::existing_dir())?;
        self.ensure_free_space(content.len() as u64)?;
        let (absolute, _) = self
            .names
            .resolve_untitled_path(&self.durable, &parent_abs, extension)?;

        self.durable.write_file_durable(&absolute, content).await?;
        self.durable
            .normalize_permissions(&absolute, self.cfg.storage.permission_mode)
            .await?;
        self.describe_resolved(absolute, false).await
    }

    // ---- copy / move ----

    pub async fn copy(&self, path: &str, new_path: &str, paste_mode: PasteMode) -> Result<EntryDescriptor> {
        let src_rel = PathSandbox::normalize_relative(path)?;
        let dst_rel = PathSandbox::normalize_relative(new_path)?;
        PathSandbox::check_new_name(leaf_of(&dst_rel))?;
        check_self_containment(&src_rel, &dst_rel)?;
        if paste_mode == PasteMode::Cover && src_rel == dst_rel {
            return self.describe(&dst_rel, false).await;
        }

        let src = self.sandbox.resolve(&self.durable, &src_rel, ResolveChecks::existing())?;
        let mut dst = self.sandbox.resolve(&self.durable, &dst_rel, ResolveChecks::default())?;

        let growth = self.durable.size_of(&src).await?;
        self.ensure_free_space(growth)?;

        if paste_mode == PasteMode::Duplicate && self.durable.exists_sync(&dst) {
            dst = self.names.resolve_duplicate_path(&self.durable, &dst)?.0;
        }

        if src.is_file() {
            self.durable.copy_file(&src, &dst).await?;
        } else {
            self.durable.copy_tree(&src, &dst).await?;
        }
        self.durable
            .normalize_permissions(&dst, self.cfg.storage.permission_mode)
            .await?;
        self.describe_resolved(dst, false).await
    }

    pub async fn move_entry(&self, path: &str, new_path: &str, paste_mode: PasteMode) -> Result<EntryDescriptor> {
        let src_rel = PathSandbox::normalize_relative(path)?;
        self.ensure_not_protected(&src_rel)?;
        let dst_rel = PathSandbox::normalize_relative(new_path)?;
        PathSandbox::check_new_name(leaf_of(&dst_rel))?;
        if src_rel == dst_rel {
            return self.describe(&dst_rel, false).await;
        }
        check_self_containment(&src_rel, &dst_rel)?;

        let src = self.sandbox.resolve(&self.durable, &src_rel, ResolveChecks::existing())?;
        let mut dst = self.sandbox.resolve(&self.durable, &dst_rel, ResolveChecks::default())?;
        match dst.parent() {
            Some(parent) if self.durable.exists_sync(parent) => {}
            _ => return Err(SandboxFsError::not_found("Target parent directory does not exist")),
        }

        if paste_mode == PasteMode::Duplicate && self.durable.exists_sync(&dst) {
            dst = self.names.resolve_duplicate_path(&self.durable, &dst)?.0;
        }

        if src.is_file() {
            self.durable.move_file(&src, &dst).await?;
        } else {
            self.durable.move_tree(&src, &dst).await?;
            self.durable
                .normalize_permissions(&dst, self.cfg.storage.permission_mode)
                .await?;
        }
        self.describe_resolved(dst, false).await
    }

    pub async fn rename(
        &self,
        path: &str,
        new_name: &str,
        kind_limit: Option<KindLimit>,
    ) -> Result<EntryDescriptor> {
        PathSandbox::check_new_name(new_name)?;
        let src_rel = PathSandbox::normalize_relative(path)?;
        let parent_rel = parent_of(&src_rel);
        let dst_rel = PathSandbox::normalize_relative(&join_relative(parent_rel, new_name))?;
        if dst_rel == src_rel {
            return self.describe(&src_rel, false).await;
        }

        let src = self.sandbox.resolve(&self.durable, &src_rel, ResolveChecks::existing())?;
        let is_dir = src.is_dir();
        if is_dir && self.protected.as_deref() == Some(src_rel.as_str()) {
            return Err(SandboxFsError::protected(src_rel));
        }
        match kind_limit {
            Some(KindLimit::File) if is_dir => {
                return Err(SandboxFsError::WrongKind { path: src_rel, expected_dir: false });
            }
            Some(KindLimit::Folder) if !is_dir => {
                return Err(SandboxFsError::WrongKind { path: src_rel, expected_dir: true });
            }
            _ => {}
        }

        // No auto-rename here: an occupied destination is a hard error.
        let dst = self.sandbox.resolve(&self.durable, &dst_rel, ResolveChecks::absent())?;

        let this = self.clone();
        let (from, to) = (src.clone(), dst.clone());
        task::spawn_blocking(move || {
            std::fs::rename(&from, &to).map_err(|e| {
                if e.raw_os_error() == Some(libc::ENAMETOOLONG) {
                    SandboxFsError::name_too_long(to.to_string_lossy())
                } else {
                    SandboxFsError::Io(e)
                }
            })?;
            this.durable
                .normalize_permissions_sync(&to, this.cfg.storage.permission_mode)?;
            if is_dir {
                this.durable.fsync_dir_sync(&to)
            } else {
                match to.parent() {
                    Some(parent) => this.durable.fsync_dir_sync(parent),
                    None => Ok(()),
                }
            }
        })
        .await??;

        self.describe_resolved(dst, false).await
    }

    // ---- delete ----

    pub async fn delete(&self, path: &str) -> Result<()> {
        let target = self
            .sandbox
            .resolve(&self.durable, path, ResolveChecks::existing_file())?;
        self.durable.remove_file(&target).await
    }

    pub async fn delete_folder(&self, path: &str) -> Result<()> {
        let relative = PathSandbox::normalize_relative(path)?;
        self.ensure_not_protected(&relative)?;
        let target = self
            .sandbox
            .resolve(&self.durable, &relative, ResolveChecks::existing_dir())?;
        debug!(path = %relative, "deleting folder recursively");
        self.durable.remove_tree(&target).await
    }

    // ---- read ----

    /// Descriptors for every child of a directory. Listings beyond the
    /// configured cap are refused; callers paginate at a layer above.
    pub async fn list_children(&self, path: &str) -> Result<Vec<EntryDescriptor>> {
        let dir = self
            .sandbox
            .resolve(&self.durable, path, ResolveChecks::existing_dir())?;
        let this = self.clone();
        task::spawn_blocking(move || {
            let limit = this.cfg.storage.max_list_entries;
            let mut children = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                children.push(entry?.path());
                if children.len() > limit {
                    return Err(SandboxFsError::TooManyEntries { count: children.len(), limit });
                }
            }
            let mut entries = Vec::with_capacity(children.len());
            for child in children {
                entries.push(build_descriptor(
                    &this.sandbox,
                    &this.preview,
                    &this.cfg.naming.upload_extension,
                    &child,
                    false,
                )?);
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await?
    }

    pub async fn describe(&self, path: &str, include_content: bool) -> Result<EntryDescriptor> {
        let absolute = self
            .sandbox
            .resolve(&self.durable, path, ResolveChecks::existing())?;
        self.describe_resolved(absolute, include_content).await
    }

    /// Descriptor for an already-resolved absolute path.
    pub async fn describe_resolved(
        &self,
        absolute: PathBuf,
        include_content: bool,
    ) -> Result<EntryDescriptor> {
        let this = self.clone();
        task::spawn_blocking(move || {
            build_descriptor(
                &this.sandbox,
                &this.preview,
                &this.cfg.naming.upload_extension,
                &absolute,
                include_content,
            )
        })
        .await?
    }

    /// Recursive size in bytes of a file or directory.
    pub async fn folder_size(&self, path: &str) -> Result<u64> {
        let target = self
            .sandbox
            .resolve(&self.durable, path, ResolveChecks::existing())?;
        self.durable.size_of(&target).await
    }

    /// Whether `name` is already taken inside `parent`, and by which kind.
    pub async fn check_exists_in_folder(&self, name: &str, parent: &str) -> Result<SameNameCheck> {
        let relative = PathSandbox::normalize_relative(&join_relative(parent, name))?;
        let absolute = self
            .sandbox
            .resolve(&self.durable, &relative, ResolveChecks::default())?;
        if !self.durable.exists(&absolute).await? {
            return Ok(SameNameCheck { has_same_file: false, has_same_folder: false });
        }
        let is_dir = absolute.is_dir();
        Ok(SameNameCheck { has_same_file: !is_dir, has_same_folder: is_dir })
    }

    // ---- content ----

    /// Decompresses an archive into a sibling named by stripping the archive
    /// suffix, auto-renaming if that name is taken.
    pub async fn decompress(&self, path: &str) -> Result<EntryDescriptor> {
        let relative = PathSandbox::normalize_relative(path)?;
        let src = self
            .sandbox
            .resolve(&self.durable, &relative, ResolveChecks::existing_file())?;
        let name = leaf_of(&relative);
        let (base, suffix) = strip_archive_suffix(name).ok_or_else(|| {
            SandboxFsError::unsupported(format!("Not a recognized archive name: {name}"))
        })?;
        debug!(path = %relative, suffix, "decompressing archive");

        let parent = src.parent().unwrap_or_else(|| self.sandbox.root());
        let mut dst = parent.join(base);
        if self.durable.exists_sync(&dst) {
            dst = self.names.resolve_duplicate_path(&self.durable, &dst)?.0;
        }

        let this = self.clone();
        let (src_path, dst_path) = (src.clone(), dst.clone());
        task::spawn_blocking(move || {
            this.codec.decompress(&src_path, &dst_path)?;
            if !this.durable.exists_sync(&dst_path) {
                return Err(SandboxFsError::unsupported("Archive contained no entries"));
            }
            this.durable
                .normalize_permissions_sync(&dst_path, this.cfg.storage.permission_mode)
        })
        .await??;

        self.describe_resolved(dst, true).await
    }

    /// Overwrites an existing file under an exclusive advisory lock; a
    /// concurrent writer makes this fail fast with `Locked`.
    pub async fn update(&self, path: &str, content: UpdateContent) -> Result<EntryDescriptor> {
        let target = self
            .sandbox
            .resolve(&self.durable, path, ResolveChecks::existing_file())?;
        let bytes = match content {
            UpdateContent::Text(text) => text.into_bytes(),
            UpdateContent::Json(value) => {
                let mut bytes = serde_json::to_vec_pretty(&value)?;
                bytes.push(b'\n');
                bytes
            }
        };
        self.durable.write_file_exclusive(&target, bytes).await?;
        self.durable
            .normalize_permissions(&target, self.cfg.storage.permission_mode)
            .await?;
        self.describe_resolved(target, false).await
    }

    /// Capped tabular preview of a CSV file.
    pub async fn preview_tabular(
        &self,
        path: &str,
        limits: TabularLimits,
        separator: u8,
    ) -> Result<TabularPreview> {
        let target = self
            .sandbox
            .resolve(&self.durable, path, ResolveChecks::existing_file())?;
        let this = self.clone();
        task::spawn_blocking(move || this.preview.tabular_sync(&target, limits, separator)).await?
    }

    // ---- shared validation ----

    fn ensure_not_protected(&self, relative: &str) -> Result<()> {
        if self.protected.as_deref() == Some(relative) {
            return Err(SandboxFsError::protected(relative));
        }
        Ok(())
    }

    /// Point-in-time free-space floor before any growing write. Advisory:
    /// racing writers can still overshoot; the goal is early rejection.
    fn ensure_free_space(&self, growth: u64) -> Result<()> {
        let required = growth.saturating_add(self.cfg.storage.min_free_bytes);
        let available = self.durable.free_space_sync(self.sandbox.root())?;
        if required > available {
            return Err(SandboxFsError::InsufficientSpace { required, available });
        }
        Ok(())
    }
}

fn leaf_of(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}

fn parent_of(relative: &str) -> &str {
    match relative.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &relative[..i],
    }
}

fn join_relative(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn check_self_containment(src_rel: &str, dst_rel: &str) -> Result<()> {
    if dst_rel.starts_with(&format!("{src_rel}/")) {
        return Err(SandboxFsError::SelfContainment {
            src: src_rel.to_string(),
            dest: dst_rel.to_string(),
        });
    }
    Ok(())
}
