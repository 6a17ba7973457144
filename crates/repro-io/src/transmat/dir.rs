//! Plain directory transport
//!
//! The URL names a local directory used as a content-addressed warehouse:
//! committed trees are stored under `<warehouse>/<hash>`. Materializing looks
//! for `<warehouse>/<hash>` first and otherwise treats the warehouse itself as
//! the tree.

use async_trait::async_trait;
use repro_core::{fail_open::fail_open_sync, ContentHash, ReproError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{Materialized, Transmat};
use crate::fs::{copy_tree, remove_tree};
use crate::placer::RemoveOnTeardown;
use crate::scan::scan_tree;

const KIND: &str = "dir";

/// Transmat for trees stored as plain directories
#[derive(Debug, Clone)]
pub struct DirTransmat {
    staging_dir: PathBuf,
}

impl DirTransmat {
    /// Materialized trees are staged under `staging_dir`
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    fn warehouse(url: &str) -> Result<PathBuf> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        if path.is_empty() {
            return Err(ReproError::Transport(
                "dir transmat needs a warehouse URL".to_string(),
            ));
        }
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl Transmat for DirTransmat {
    fn kind(&self) -> &str {
        KIND
    }

    async fn scan(&self, path: &Path) -> Result<ContentHash> {
        let path = path.to_path_buf();
        blocking(move || scan_tree(&path)).await
    }

    #[instrument(skip(self), fields(kind = KIND))]
    async fn materialize(&self, hash: &ContentHash, url: &str) -> Result<Materialized> {
        let warehouse = Self::warehouse(url)?;
        let addressed = warehouse.join(hash.as_str());
        let source = if addressed.is_dir() { addressed } else { warehouse };
        if !source.exists() {
            return Err(ReproError::Transport(format!(
                "nothing to fetch at {}",
                source.display()
            )));
        }

        let staged = self.staging_dir.join(format!("dir-{}", Uuid::new_v4()));
        let expected = hash.clone();
        debug!("Staging {} into {}", source.display(), staged.display());

        let path = staged.clone();
        blocking(move || {
            copy_tree(&source, &path).map_err(|e| {
                ReproError::Transport(format!("failed to fetch {}: {}", source.display(), e))
            })?;
            let actual = scan_tree(&path)?;
            if actual != expected {
                return Err(discard_corrupt(&path, &expected, &actual));
            }
            Ok(())
        })
        .await
        .map_err(|e| {
            fail_open_sync("staging cleanup", || remove_tree(&staged));
            e
        })?;

        Ok(Materialized {
            path: staged.clone(),
            emplacement: Box::new(RemoveOnTeardown::new(staged)),
        })
    }

    #[instrument(skip(self), fields(kind = KIND))]
    async fn commit(&self, path: &Path, url: &str) -> Result<ContentHash> {
        let source = path.to_path_buf();
        if url.is_empty() {
            return blocking(move || scan_tree(&source)).await;
        }

        let warehouse = Self::warehouse(url)?;
        let hash = blocking(move || {
            let hash = scan_tree(&source)?;
            let dest = warehouse.join(hash.as_str());
            if dest.exists() {
                debug!("{} already stored", hash);
                return Ok(hash);
            }

            // ship to a private name first so concurrent commits never see a partial tree
            let pending = warehouse.join(format!(".pending-{}", Uuid::new_v4()));
            let shipped = copy_tree(&source, &pending)
                .and_then(|_| scan_tree(&pending))
                .map_err(|e| match e {
                    err @ ReproError::Integrity { .. } => err,
                    other => ReproError::Transport(format!(
                        "failed to ship to {}: {}",
                        pending.display(),
                        other
                    )),
                });
            let shipped = match shipped {
                Ok(shipped) => shipped,
                Err(e) => {
                    fail_open_sync("pending shipment cleanup", || remove_tree(&pending));
                    return Err(e);
                }
            };
            if shipped != hash {
                return Err(discard_corrupt(&pending, &hash, &shipped));
            }

            if let Err(e) = std::fs::rename(&pending, &dest) {
                fail_open_sync("pending shipment cleanup", || remove_tree(&pending));
                if !dest.exists() {
                    return Err(ReproError::Transport(format!(
                        "failed to store {}: {}",
                        dest.display(),
                        e
                    )));
                }
            }
            Ok(hash)
        })
        .await?;

        info!("Committed {} to {}", hash, url);
        Ok(hash)
    }
}

/// Remove a tree that failed verification; the integrity error always wins
fn discard_corrupt(path: &Path, expected: &ContentHash, actual: &ContentHash) -> ReproError {
    fail_open_sync("discard of unverified tree", || remove_tree(path));
    ReproError::Integrity {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ReproError::Transport(format!("transport task failed: {}", e)))?
}
