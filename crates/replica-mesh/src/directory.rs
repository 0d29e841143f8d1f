//! Directory services supplying raw peer descriptors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::warn;

use crate::BoxFuture;
use crate::error::DirectoryError;
use crate::peer::PeerDescriptor;

/// Aggregate numbers reported by a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryStats {
    /// Descriptors the directory currently lists.
    pub total_peers: usize,
    /// Distinct team ids across those descriptors.
    pub total_teams: usize,
}

impl DirectoryStats {
    /// Computes stats over a descriptor listing.
    #[must_use]
    pub fn from_descriptors(descriptors: &[PeerDescriptor]) -> Self {
        let mut teams: Vec<&str> = descriptors
            .iter()
            .flat_map(|d| d.metadata.team_affiliations.iter().map(String::as_str))
            .collect();
        teams.sort_unstable();
        teams.dedup();
        Self {
            total_peers: descriptors.len(),
            total_teams: teams.len(),
        }
    }
}

/// External status service listing the peers of the mesh.
pub trait Directory: Send + Sync {
    /// Lists every peer the directory knows about.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Unavailable`] when the directory has nothing
    /// to serve, or [`DirectoryError::Transport`] when it cannot be reached.
    fn list_peers(&self) -> BoxFuture<'_, Result<Vec<PeerDescriptor>, DirectoryError>>;

    /// Returns aggregate numbers about the mesh.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Directory::list_peers`].
    fn network_stats(&self) -> BoxFuture<'_, Result<DirectoryStats, DirectoryError>>;
}

#[derive(Debug, Clone)]
enum Listing {
    Serving(Vec<PeerDescriptor>),
    Unavailable,
    Failing(String),
}

/// In-memory directory.
///
/// Serves whatever was last set; can be switched to unavailable or failing,
/// and paused so a listing blocks until released.
#[derive(Debug)]
pub struct StaticDirectory {
    listing: RwLock<Listing>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StaticDirectory {
    /// Creates a directory serving `descriptors`.
    #[must_use]
    pub fn new(descriptors: Vec<PeerDescriptor>) -> Self {
        Self {
            listing: RwLock::new(Listing::Serving(descriptors)),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Creates a directory that reports [`DirectoryError::Unavailable`].
    #[must_use]
    pub fn unavailable() -> Self {
        let directory = Self::default();
        directory.set_unavailable();
        directory
    }

    /// Replaces the served descriptors.
    pub fn set_peers(&self, descriptors: Vec<PeerDescriptor>) {
        *self.listing.write() = Listing::Serving(descriptors);
    }

    /// Makes subsequent listings report unavailable.
    pub fn set_unavailable(&self) {
        *self.listing.write() = Listing::Unavailable;
    }

    /// Makes subsequent listings fail with a transport error.
    pub fn set_failing(&self, reason: impl Into<String>) {
        *self.listing.write() = Listing::Failing(reason.into());
    }

    /// Blocks subsequent listings until the returned [`Notify`] is notified
    /// once per blocked call.
    pub fn pause(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Stops blocking listings.
    pub fn resume(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.notify_waiters();
        }
    }

    /// Returns how many times [`Directory::list_peers`] was called.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn current(&self) -> Result<Vec<PeerDescriptor>, DirectoryError> {
        match &*self.listing.read() {
            Listing::Serving(descriptors) => Ok(descriptors.clone()),
            Listing::Unavailable => Err(DirectoryError::Unavailable),
            Listing::Failing(reason) => Err(DirectoryError::Transport(reason.clone())),
        }
    }
}

impl Directory for StaticDirectory {
    fn list_peers(&self) -> BoxFuture<'_, Result<Vec<PeerDescriptor>, DirectoryError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.current()
        })
    }

    fn network_stats(&self) -> BoxFuture<'_, Result<DirectoryStats, DirectoryError>> {
        Box::pin(async move {
            self.current()
                .map(|descriptors| DirectoryStats::from_descriptors(&descriptors))
        })
    }
}

/// Directory backed by a JSON file holding an array of descriptors.
///
/// The file is re-read on every listing. A missing file means the directory
/// is unavailable; entries that do not deserialize are skipped.
#[derive(Debug, Clone)]
pub struct FileDirectory {
    path: PathBuf,
}

impl FileDirectory {
    /// Creates a directory reading from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<PeerDescriptor>, DirectoryError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DirectoryError::Unavailable);
            }
            Err(err) => {
                return Err(DirectoryError::Transport(format!(
                    "{}: {err}",
                    self.path.display()
                )));
            }
        };

        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|err| DirectoryError::Transport(format!("{}: {err}", self.path.display())))?;

        let mut descriptors = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<PeerDescriptor>(entry) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(err) => {
                    warn!(
                        path = %self.path.display(),
                        index,
                        error = %err,
                        "Skipping unreadable directory entry"
                    );
                }
            }
        }
        Ok(descriptors)
    }
}

impl Directory for FileDirectory {
    fn list_peers(&self) -> BoxFuture<'_, Result<Vec<PeerDescriptor>, DirectoryError>> {
        Box::pin(self.load())
    }

    fn network_stats(&self) -> BoxFuture<'_, Result<DirectoryStats, DirectoryError>> {
        Box::pin(async move {
            let descriptors = self.load().await?;
            Ok(DirectoryStats::from_descriptors(&descriptors))
        })
    }
}
