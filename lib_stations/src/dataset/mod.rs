//! # Record Dataset
//!
//! The read-only input the streaming engine replays. A dataset is an ordered
//! collection of lists; each list is an ordered, non-empty run of [`Record`]s and is
//! identified only by its position, which becomes the `streamId` on the wire.
//!
//! ## Sources:
//! - **Built-in sample**: a small set of charging stations compiled into the binary,
//!   used when no dataset file is configured.
//! - **JSON file**: an array of arrays of records, loaded once at startup.
//!
//! The dataset is validated on construction and never mutated afterwards; the rest of
//! the crate shares it behind an `Arc`.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Record and location types carried inside `station_update` messages.
pub mod record;

pub use record::{Location, Record};

const BUILTIN_STATIONS: &str = include_str!("../../data/charging_stations.json");

/// Errors raised while loading or validating a dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dataset is not a valid array of record lists: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("dataset contains no lists")]
    NoLists,

    #[error("dataset list {0} is empty")]
    EmptyList(usize),
}

/// # Dataset
///
/// The immutable collection of record lists. One stream is opened per list on every
/// connection, in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    lists: Vec<Vec<Record>>,
}

impl Dataset {
    /// Builds a dataset, rejecting an empty collection or any empty list.
    pub fn new(lists: Vec<Vec<Record>>) -> Result<Self, DatasetError> {
        if lists.is_empty() {
            return Err(DatasetError::NoLists);
        }
        if let Some(index) = lists.iter().position(Vec::is_empty) {
            return Err(DatasetError::EmptyList(index));
        }
        Ok(Self { lists })
    }

    /// Parses a JSON array of record arrays.
    pub fn from_json_str(json: &str) -> Result<Self, DatasetError> {
        let lists: Vec<Vec<Record>> = serde_json::from_str(json)?;
        Self::new(lists)
    }

    /// Loads a dataset file from disk.
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let json = fs::read_to_string(path).map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// The sample charging station data shipped with the crate.
    pub fn builtin() -> Result<Self, DatasetError> {
        Self::from_json_str(BUILTIN_STATIONS)
    }

    /// Number of lists, which is also the number of streams per connection.
    pub fn stream_count(&self) -> usize {
        self.lists.len()
    }

    /// The list backing stream `index`.
    pub fn list(&self, index: usize) -> Option<&[Record]> {
        self.lists.get(index).map(Vec::as_slice)
    }

    /// Iterates `(stream index, list)` pairs in stream order.
    pub fn streams(&self) -> impl Iterator<Item = (usize, &[Record])> {
        self.lists.iter().map(Vec::as_slice).enumerate()
    }
}
