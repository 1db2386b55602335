use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxFsError>;

/// Every failure the engine can surface to a caller. Each domain variant maps to
/// a stable machine code and an HTTP-style status so the routing layer above can
/// render it without matching on the enum.
#[derive(Error, Debug)]
pub enum SandboxFsError {
    #[error("Illegal path: {0}")]
    IllegalPath(String),

    #[error("Name exceeds 255 UTF-8 bytes: {0}")]
    NameTooLong(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("A {} named {name} already exists", if *is_dir { "directory" } else { "file" })]
    AlreadyExists { name: String, is_dir: bool },

    #[error("{path} is {}", if *expected_dir { "not a directory" } else { "a directory, not a file" })]
    WrongKind { path: String, expected_dir: bool },

    #[error("Protected path may not be modified: {0}")]
    ProtectedPath(String),

    #[error("Cannot place {src} inside itself at {dest}")]
    SelfContainment { src: String, dest: String },

    #[error("Insufficient free space: {available} bytes available, {required} required")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Target is locked by a concurrent writer: {0}")]
    Locked(String),

    #[error("Too many entries: {count} exceeds the cap of {limit}")]
    TooManyEntries { count: usize, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SandboxFsError {
    pub fn illegal_path(msg: impl Into<String>) -> Self {
        Self::IllegalPath(msg.into())
    }

    pub fn name_too_long(msg: impl Into<String>) -> Self {
        Self::NameTooLong(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn protected(msg: impl Into<String>) -> Self {
        Self::ProtectedPath(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        Self::Locked(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalPath(_) => "illegal_path",
            Self::NameTooLong(_) => "name_too_long",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::WrongKind { .. } => "wrong_kind",
            Self::ProtectedPath(_) => "protected_path",
            Self::SelfContainment { .. } => "self_containment",
            Self::InsufficientSpace { .. } => "insufficient_space",
            Self::Encoding(_) => "encoding_error",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Locked(_) => "locked",
            Self::TooManyEntries { .. } => "too_many_entries",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Toml(_) => "config_error",
            Self::Task(_) | Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP-equivalent status for the routing layer.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::AlreadyExists { .. } | Self::Locked(_) => 409,
            Self::IllegalPath(_)
            | Self::NameTooLong(_)
            | Self::WrongKind { .. }
            | Self::SelfContainment { .. }
            | Self::UnsupportedFormat(_)
            | Self::Encoding(_)
            | Self::TooManyEntries { .. } => 400,
            Self::ProtectedPath(_) => 403,
            Self::InsufficientSpace { .. } => 507,
            _ => 500,
        }
    }
}
