use std::fs::File;
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::{Result, SandboxFsError};

/// Archive suffixes the engine recognizes for decompression. Ordered so
/// compound suffixes match before their tails.
pub const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tar.bz2", ".tar.bz", ".tar.xz", ".zip", ".tgz", ".tbz2", ".tbz", ".txz",
];

/// Splits `name` into (base, suffix) on the first recognized archive suffix.
pub fn strip_archive_suffix(name: &str) -> Option<(&str, &str)> {
    for suffix in ARCHIVE_SUFFIXES {
        if let Some(base) = name.strip_suffix(suffix) {
            if !base.is_empty() {
                return Some((base, suffix));
            }
        }
    }
    None
}

/// External decompression collaborator. The engine only derives destination
/// paths and normalizes what a codec leaves behind; container internals stay
/// out of reach. Implementations distinguish "not a valid archive"
/// (`UnsupportedFormat`) from other failures.
pub trait ArchiveCodec: Send + Sync {
    fn decompress(&self, src: &Path, dest: &Path) -> Result<()>;
}

/// Default codec for the gzip-tarball family (.tar.gz / .tgz). Other
/// containers are expected to be served by a codec injected from outside.
#[derive(Debug, Default, Clone)]
pub struct TarballCodec;

impl ArchiveCodec for TarballCodec {
    fn decompress(&self, src: &Path, dest: &Path) -> Result<()> {
        let name = src.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if !(name.ends_with(".tar.gz") || name.ends_with(".tgz")) {
            return Err(SandboxFsError::unsupported(format!(
                "No codec available for archive: {name}"
            )));
        }
        let file = File::open(src)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.unpack(dest).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidInput || e.kind() == std::io::ErrorKind::InvalidData {
                SandboxFsError::unsupported(format!("Not a valid gzip tarball: {e}"))
            } else {
                SandboxFsError::Io(e)
            }
        })?;
        Ok(())
    }
}
