use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for bakex operations.
///
/// Structured variants for the failure surfaces of the extraction pipeline:
/// stream I/O, backup framing, decompression, encryption detection, catalog
/// resolution, and export. Per-page and per-record problems are *not*
/// errors — the pipeline logs and skips those; only phase-level failures
/// surface here.
#[derive(Error, Debug)]
pub enum BakError {
    // === Input / stream errors ===
    /// Backup file not found on disk.
    #[error("backup file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Backup file exists but is empty.
    #[error("backup file is empty: '{path}'")]
    EmptyFile { path: PathBuf },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Short read (fewer bytes than expected).
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    // === Backup format errors ===
    /// A required structural invariant of the backup stream is violated.
    #[error("backup format error: {detail}")]
    Format { detail: String },

    /// A page header carries a format version other than 1.
    #[error("unsupported page format version {version}")]
    UnsupportedVersion { version: u8 },

    /// Every decoder failed on a compressed block.
    #[error("decompression failed: {detail}")]
    Decompression { detail: String },

    // === Encryption (terminal for the direct path) ===
    /// The database is protected by Transparent Data Encryption.
    #[error("TDE detected: direct parsing is not possible without the certificate")]
    TdeEncrypted,

    /// The backup itself is encrypted.
    #[error("backup encryption detected: direct parsing is not possible")]
    BackupEncrypted,

    // === Catalog / extraction errors ===
    /// Catalog reconstruction succeeded but the table is not in it.
    #[error("table not found: {schema}.{table}")]
    TableNotFound { schema: String, table: String },

    /// The table resolved but no allocation unit maps it to a page stamp.
    #[error("no page allocation mapping for table {schema}.{table} (object_id {object_id})")]
    PageObjIdUnknown {
        schema: String,
        table: String,
        object_id: i32,
    },

    /// A page failed a structural check during decoding.
    #[error("page corruption at ({file_id}:{page_id}): {detail}")]
    PageCorruption {
        file_id: i32,
        page_id: i32,
        detail: String,
    },

    // === Output errors ===
    /// The output sink refused a row or could not be opened.
    #[error("export error: {detail}")]
    Export { detail: String },

    // === Configuration ===
    /// Command-line or programmatic configuration is malformed.
    #[error("configuration error: {detail}")]
    Config { detail: String },
}

/// Coarse error discriminants, mirrored in diagnostics and exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FileIo,
    Format,
    UnsupportedVersion,
    Decompression,
    TdeEncryption,
    BackupEncryption,
    TableNotFound,
    PageCorruption,
    Export,
    Config,
}

impl BakError {
    /// The surface discriminant of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound { .. }
            | Self::EmptyFile { .. }
            | Self::Io(_)
            | Self::ShortRead { .. } => ErrorKind::FileIo,
            Self::Format { .. } => ErrorKind::Format,
            Self::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Self::Decompression { .. } => ErrorKind::Decompression,
            Self::TdeEncrypted => ErrorKind::TdeEncryption,
            Self::BackupEncrypted => ErrorKind::BackupEncryption,
            Self::TableNotFound { .. } | Self::PageObjIdUnknown { .. } => ErrorKind::TableNotFound,
            Self::PageCorruption { .. } => ErrorKind::PageCorruption,
            Self::Export { .. } => ErrorKind::Export,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Whether the caller should retry through the live-restore fallback.
    ///
    /// Encryption is terminal for the direct path but not for the overall
    /// system; everything else is either fatal or fixable by the user.
    pub const fn wants_restore_fallback(&self) -> bool {
        matches!(self, Self::TdeEncrypted | Self::BackupEncrypted)
    }

    /// Process exit code for CLI use: 1 = extraction failure, 2 = bad config.
    pub const fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => 2,
            _ => 1,
        }
    }

    /// Create a backup-format error.
    pub fn format(detail: impl Into<String>) -> Self {
        Self::Format {
            detail: detail.into(),
        }
    }

    /// Create a decompression error.
    pub fn decompression(detail: impl Into<String>) -> Self {
        Self::Decompression {
            detail: detail.into(),
        }
    }

    /// Create an export error.
    pub fn export(detail: impl Into<String>) -> Self {
        Self::Export {
            detail: detail.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// Create a page-corruption diagnostic.
    pub fn page_corruption(file_id: i32, page_id: i32, detail: impl Into<String>) -> Self {
        Self::PageCorruption {
            file_id,
            page_id,
            detail: detail.into(),
        }
    }
}

/// Result type alias using `BakError`.
pub type Result<T> = std::result::Result<T, BakError>;
