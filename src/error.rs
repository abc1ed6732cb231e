use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{source_kind} firmware source requires a non-empty {field}")]
    MissingField {
        source_kind: &'static str,
        field: &'static str,
    },

    #[error("{source_kind} firmware source has invalid {field} {value:?}")]
    InvalidRef {
        source_kind: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("git executable not found: {0}")]
    GitNotFound(String),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefineError {
    #[error("define {key} has value {value:?} which is not one of {allowed:?}")]
    InvalidEnumValue {
        key: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("define {key} expects a number, got {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("define {key} text must not contain line breaks or control characters")]
    InvalidText { key: String },

    #[error("define key {0:?} is not a valid identifier")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("device {id} rejected: {reason}")]
    InvalidDevice { id: String, reason: String },

    #[error("duplicate device id {0}")]
    DuplicateDevice(String),

    #[error("failed to parse device catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while reading {program} output: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
