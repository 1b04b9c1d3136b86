//! Error types shared by the show engine.

use thiserror::Error;

/// Failure applying a structural patch. The store is left untouched.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid path '{0}': must be empty or start with '/'")]
    InvalidPointer(String),
    #[error("invalid escape sequence in path segment '{0}'")]
    InvalidEscape(String),
    #[error("no value at '{0}'")]
    MissingTarget(String),
    #[error("value at '{0}' is not a mapping or sequence")]
    NotAContainer(String),
    #[error("invalid sequence index '{segment}' in '{path}'")]
    InvalidIndex { path: String, segment: String },
    #[error("the root cannot be removed")]
    CannotRemoveRoot,
    #[error("patched state does not match the show schema: {0}")]
    Schema(#[from] serde_json::Error),
    #[error("patched state violates an invariant: {0}")]
    Invariant(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BracketError {
    #[error("cannot generate a bracket with {0} slots, need between 4 and 1024")]
    InvalidBracketSize(usize),
}

/// Error returned by every `StateStore` mutation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Bracket(#[from] BracketError),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
    #[error("environment variable {key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
