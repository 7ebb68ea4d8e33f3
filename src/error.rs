use crate::migrate::MigrationState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObfuscatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Unknown decoder alias: {0}")]
    UnknownAlias(String),

    #[error("Unknown argument alias: {0}")]
    UnknownArgument(String),

    #[error("Scheme {scheme} expected marker {expected:?} at offset {offset}")]
    MarkerMismatch {
        scheme: &'static str,
        expected: &'static str,
        offset: usize,
    },

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Decoded unit is not valid UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),

    #[error("Not an obfuscated unit: {0}")]
    NotObfuscated(String),

    #[error("Plain tree {0} does not exist or is not a directory")]
    PlainTreeMissing(PathBuf),

    #[error("Previous obfuscated output exists at {0}")]
    ObfuscatedOutputExists(PathBuf),

    #[error("Previous backup exists at {0}, refusing to overwrite recovery point")]
    BackupExists(PathBuf),

    #[error("Destination {0} lies inside the source tree")]
    DestinationInsideSource(PathBuf),

    #[error("Source tree already contains reserved file {0}")]
    ReservedName(PathBuf),

    #[error("{count} entries could not be mirrored, first: {first}")]
    WalkFailed { count: usize, first: String },

    #[error("Dependency manifest {0} not found")]
    ManifestMissing(PathBuf),

    #[error("Dependency manifest {path} is malformed: {reason}")]
    ManifestMalformed { path: PathBuf, reason: String },

    #[error("Could not move {plain} to backup {backup}: {source}")]
    BackupRenameFailed {
        plain: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not promote {obfuscated} to {plain}: {source}; original tree restored")]
    PromotionRolledBack {
        obfuscated: PathBuf,
        plain: PathBuf,
        #[source]
        source: std::io::Error,
        /// Digest comparison of the restored tree, when verification ran
        verified: Option<bool>,
    },

    #[error(
        "IRRECOVERABLE: promotion of {obfuscated} failed ({promote_error}) and restoring \
         {backup} to {plain} also failed ({restore_error}); manual intervention required"
    )]
    Irrecoverable {
        plain: PathBuf,
        obfuscated: PathBuf,
        backup: PathBuf,
        promote_error: std::io::Error,
        restore_error: std::io::Error,
    },

    #[error("Migration cannot {action} from state {state:?}")]
    InvalidState {
        action: &'static str,
        state: MigrationState,
    },

    #[error("Migration failed during {step:?}: {source}")]
    Step {
        step: MigrationState,
        #[source]
        source: Box<ObfuscatorError>,
    },
}

impl ObfuscatorError {
    /// True when the tree triple is left in a state no automated step can repair.
    pub fn is_irrecoverable(&self) -> bool {
        match self {
            Self::Irrecoverable { .. } => true,
            Self::Step { source, .. } => source.is_irrecoverable(),
            _ => false,
        }
    }

    /// True for failures that happened before any destructive step.
    pub fn is_precondition(&self) -> bool {
        match self {
            Self::PlainTreeMissing(_)
            | Self::ObfuscatedOutputExists(_)
            | Self::BackupExists(_)
            | Self::ReservedName(_)
            | Self::ManifestMissing(_)
            | Self::ManifestMalformed { .. } => true,
            // The manifest is re-read after promotion; by then the tree has moved.
            Self::Step { step, source } => {
                *step != MigrationState::ManifestPatching && source.is_precondition()
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ObfuscatorError>;
