//! Storage for finished match histories
//!
//! With a directory configured each history is written out as a
//! `match-<id>.txt` text file holding the encoded payload and nothing is
//! kept in memory. Without one, the most recent payloads are kept in a
//! bounded in-memory cache.

use log::{info, warn};
use shared::history::{self, MatchHistory};
use shared::{HistoryError, MatchId};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to encode history: {0}")]
    Encode(#[from] HistoryError),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub struct Archive {
    dir: Option<PathBuf>,
    capacity: usize,
    /// Oldest first; only used without a directory
    recent: VecDeque<(MatchId, String)>,
}

impl Archive {
    pub fn new(dir: Option<PathBuf>, capacity: usize) -> Self {
        Self {
            dir,
            capacity,
            recent: VecDeque::new(),
        }
    }

    pub fn path_for(dir: &Path, match_id: MatchId) -> PathBuf {
        dir.join(format!("match-{}.txt", match_id))
    }

    /// Encodes a history and stores the payload; returns the payload
    pub async fn store(&mut self, history: &MatchHistory) -> Result<String, ArchiveError> {
        let payload = history::encode(history)?;

        match &self.dir {
            Some(dir) => {
                let path = Self::path_for(dir, history.match_id);
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|source| ArchiveError::Write {
                        path: dir.clone(),
                        source,
                    })?;
                tokio::fs::write(&path, payload.as_bytes())
                    .await
                    .map_err(|source| ArchiveError::Write {
                        path: path.clone(),
                        source,
                    })?;
                info!(
                    "Archived match {} ({} entries) to {}",
                    history.match_id,
                    history.len(),
                    path.display()
                );
            }
            None => {
                self.recent.retain(|(id, _)| *id != history.match_id);
                self.recent.push_back((history.match_id, payload.clone()));
                while self.recent.len() > self.capacity {
                    if let Some((evicted, _)) = self.recent.pop_front() {
                        info!("Dropping archived match {} from memory", evicted);
                    }
                }
                info!(
                    "Archived match {} ({} entries, {} bytes)",
                    history.match_id,
                    history.len(),
                    payload.len()
                );
            }
        }

        Ok(payload)
    }

    /// Stored payload for a match, if there is one
    pub async fn load(&self, match_id: MatchId) -> Result<Option<String>, ArchiveError> {
        let dir = match &self.dir {
            Some(dir) => dir,
            None => {
                return Ok(self
                    .recent
                    .iter()
                    .find(|(id, _)| *id == match_id)
                    .map(|(_, payload)| payload.clone()))
            }
        };

        let path = Self::path_for(dir, match_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArchiveError::Read { path, source }),
        }
    }

    /// Decodes a stored history; None when missing or unreadable
    pub async fn restore(&self, match_id: MatchId) -> Option<MatchHistory> {
        let payload = match self.load(match_id).await {
            Ok(payload) => payload?,
            Err(e) => {
                warn!("Could not load history for match {}: {}", match_id, e);
                return None;
            }
        };
        let restored = history::decode(&payload);
        if restored.is_none() {
            warn!("Stored history for match {} is unreadable", match_id);
        }
        restored
    }

    /// Payloads currently held in memory
    pub fn cached(&self) -> usize {
        self.recent.len()
    }
}
