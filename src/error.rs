use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ImporterError {
    #[error("username or password not specified")]
    #[diagnostic(help("pass -u <username> and -p <password> (or set OMERO_PASSWORD)"))]
    MissingCredentials,

    #[error("the port specified is invalid: {0}")]
    InvalidPort(String),

    #[error("the target specified is invalid: {0}")]
    InvalidTarget(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid entity reference: {0}")]
    InvalidEntityRef(String),

    #[error("invalid key/value pair: {0}")]
    InvalidKeyValue(String),

    #[error("invalid table: {0}")]
    InvalidTable(String),

    #[error("OMERO service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("OMERO.web returned status {status}: {message}")]
    ServiceStatus { status: u16, message: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("unexpected response from OMERO: {0}")]
    UnexpectedResponse(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("`{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("import into dataset {dataset} failed: {message}")]
    Import { dataset: i64, message: String },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("not found on the server: {0}")]
    EntityNotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("session already closed")]
    SessionClosed,

    #[error("import finished with {skipped} skipped directories and {failed} failed batches")]
    PartialImport { skipped: usize, failed: usize },
}
