//! Durable slot for session reset markers, so a restart still honours them.

use std::path::{Path, PathBuf};

use taskline_core::ResetMarkers;
use thiserror::Error;

const FILE_NAME: &str = "reset-markers.json";

#[derive(Debug, Error)]
pub enum ResetStoreError {
    #[error("reset store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reset store at {path} is corrupt: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON file `{ session id: cutover timestamp }`.
#[derive(Debug, Clone)]
pub struct ResetStore {
    path: PathBuf,
}

impl ResetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty marker set.
    pub fn load(&self) -> Result<ResetMarkers, ResetStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ResetMarkers::new()),
            Err(source) => {
                return Err(ResetStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&text).map_err(|source| ResetStoreError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    /// Write via a sibling temp file and rename, so readers never see a
    /// half-written file.
    pub fn save(&self, markers: &ResetMarkers) -> Result<(), ResetStoreError> {
        let io_err = |source| ResetStoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(markers).map_err(|source| ResetStoreError::Decode {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}
