//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error on '{path}': {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("unsupported hook kind '{kind}' for '{name}': only Job resources can carry kcm/hooks")]
    UnsupportedHookKind { kind: String, name: String },

    #[error("invalid annotation {annotation}='{value}' on {resource}: {reason}")]
    InvalidAnnotation {
        resource: String,
        annotation: String,
        value: String,
        reason: String,
    },

    #[error("invalid field {field}={value} on {resource}: {reason}")]
    InvalidField {
        resource: String,
        field: String,
        value: String,
        reason: String,
    },

    #[error("invalid deletion selector for kind '{kind}': either name or labels must be set")]
    InvalidSelector { kind: String },

    #[error("no usable cluster credentials: set a kubeconfig (with optional context) or both server and token")]
    EmptyCredentials,

    #[error("invalid manifest file name '{path}'")]
    InvalidManifestName { path: String },

    #[error("Values merge error: {message}")]
    ValuesMerge { message: String },
}

impl CoreError {
    pub fn file(path: &std::path::Path, source: std::io::Error) -> Self {
        CoreError::File {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
