use crate::data_set::KeyNotFound;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for docmerge operations
#[derive(Error, Debug)]
pub enum DocmergeError {
    /// IO error when reading or writing files
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The template archive is missing or cannot be opened
    #[error("File {path} not found")]
    InvalidFile { path: PathBuf },

    /// The supplied data is not a JSON object
    #[error("Invalid data set: {message}")]
    InvalidData { message: String },

    /// The output path exists and `force` was not given
    #[error("Output path already exists: {path}")]
    OutputPathAlreadyExists { path: PathBuf },

    /// A document part is not well-formed XML
    #[error("XML error in {part}: {message}")]
    Xml { part: String, message: String },

    /// Block markers are missing or improperly nested
    #[error("{message}")]
    Template { message: String },

    /// A field references a filter outside the known set
    #[error("Unknown filter: {name}")]
    UnknownFilter { name: String },

    /// A field instruction could not be parsed as a merge field
    #[error("Invalid merge field instruction: {instruction}")]
    InvalidInstruction { instruction: String },

    /// One or more keys could not be resolved against the data set
    #[error("{0}")]
    Merge(MergeErrors),

    /// Resolution reported success but a placeholder survived in the output
    #[error("Merge fields were not fully replaced in {part}")]
    NotFullyReplaced { part: String },

    /// Regex compilation error
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Archive error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocmergeError {
    pub(crate) fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DocmergeError>;

/// Lookup failures keyed by the raw field key, in order of first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MergeErrors(IndexMap<String, Vec<KeyNotFound>>);

impl MergeErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, raw_key: &str, failure: KeyNotFound) {
        self.0.entry(raw_key.to_string()).or_default().push(failure);
    }

    /// Appends every failure of `other`, keeping first-occurrence key order.
    pub fn merge(&mut self, other: MergeErrors) {
        for (key, failures) in other.0 {
            self.0.entry(key).or_default().extend(failures);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, raw_key: &str) -> Option<&[KeyNotFound]> {
        self.0.get(raw_key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[KeyNotFound])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for MergeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Merge failed for {} key(s): ", self.len())?;
        for (i, (key, failures)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{key} => [")?;
            for (j, failure) in failures.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{failure}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
