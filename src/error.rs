use std::path::PathBuf;

use thiserror::Error;

/// Fatal problems with an identifier input file. Each variant names the file
/// and the constraint it broke.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("input file does not exist: {0}")]
    Missing(PathBuf),

    #[error("unsupported input format '{ext}' for {path}: only .xml and .json are supported")]
    UnsupportedFormat { path: PathBuf, ext: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: JSON must be an array of strings, e.g. [\"ID1\", \"ID2\"]")]
    NotAnArray { path: PathBuf },

    #[error("{path}: element {index} of the JSON array is not a string")]
    NonStringElement { path: PathBuf, index: usize },

    #[error("{path}: JSON array is empty or contains only empty/whitespace strings")]
    NoUsableEntries { path: PathBuf },
}
