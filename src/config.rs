use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Engine tunables. Built once per deployment and injected into every component
/// at construction; nothing reads ambient global state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub preview: PreviewConfig,
    pub naming: NamingConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PreviewConfig {
    /// Text and JSON content is only inlined below this many bytes.
    pub text_limit_bytes: u64,
    /// Images are only base64-inlined below this many bytes.
    pub image_limit_bytes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamingConfig {
    /// Stem used for newly created files and folders ("Untitled", "Untitled1", ...).
    pub untitled_stem: String,
    /// Suffix token inserted before the ordinal when auto-renaming collisions
    /// ("report.txt" -> "report-copy1.txt").
    pub duplicate_token: String,
    /// Extension marking a dot-prefixed file as an in-flight upload placeholder.
    pub upload_extension: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path (relative to the tenant root) exempt from delete, move and
    /// directory-rename. Empty string disables the protection.
    pub protected_path: String,
    /// Minimum free bytes that must remain on the volume after any growing write.
    pub min_free_bytes: u64,
    /// Hard cap on entries returned by a single directory listing.
    pub max_list_entries: usize,
    /// Mode applied recursively after mutations that create or move content.
    pub permission_mode: u32,
    /// Re-read parent directory ownership before existence probes, as a
    /// best-effort workaround for stale NFS attribute caches.
    pub refresh_attr_cache: bool,
    /// Use native cp/du/chmod subprocesses on Linux instead of portable walks.
    pub native_tools: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preview: PreviewConfig {
                text_limit_bytes: 10 * 1024 * 1024,
                image_limit_bytes: 20 * 1024 * 1024,
            },
            naming: NamingConfig {
                untitled_stem: "Untitled".to_string(),
                duplicate_token: "-copy".to_string(),
                upload_extension: "temp_upload".to_string(),
            },
            storage: StorageConfig {
                protected_path: "/CODE".to_string(),
                min_free_bytes: 4 * 1024 * 1024,
                max_list_entries: 2000,
                permission_mode: 0o777,
                refresh_attr_cache: false,
                native_tools: false,
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| "Failed to parse config file")?;
        Ok(config)
    }
}
