//! Sandboxed workspace filesystem engine.
//!
//! Every tenant gets one confined root directory. All mutations validate
//! their paths against that root, resolve name collisions deterministically,
//! and fsync what they touch before reporting success.

pub mod config;
pub mod error;
pub mod filesystem;

pub use config::{Config, NamingConfig, PreviewConfig, StorageConfig};
pub use error::{Result, SandboxFsError};
pub use filesystem::{
    ArchiveCodec, ContentFormat, EntryDescriptor, KindLimit, MutationExecutor, PasteMode,
    SameNameCheck, TabularLimits, TabularPreview, TarballCodec, UpdateContent,
};
