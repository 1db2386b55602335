pub mod archive;
pub mod durable;
pub mod entry;
pub mod executor;
pub mod mime;
pub mod names;
pub mod path;
pub mod preview;

pub use archive::{strip_archive_suffix, ArchiveCodec, TarballCodec};
pub use durable::DurableFs;
pub use entry::EntryDescriptor;
pub use executor::{KindLimit, MutationExecutor, PasteMode, SameNameCheck, UpdateContent};
pub use mime::{extension_of, format_for, mime_for, ContentFormat};
pub use names::NameResolver;
pub use path::{PathSandbox, ResolveChecks};
pub use preview::{PreviewPipeline, TabularLimits, TabularPreview};
