//! Content-addressed data transport
//!
//! A [`Transmat`] moves trees between remote storage and the local host, and
//! verifies every tree it moves against its content hash.

mod dir;

pub use dir::DirTransmat;

use async_trait::async_trait;
use repro_core::{ContentHash, ReproError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::placer::Emplacement;

/// Content materialized on the local host
#[derive(Debug)]
pub struct Materialized {
    /// Where the verified content now lives
    pub path: PathBuf,
    /// Releases the staging area when the job is done with it
    pub emplacement: Box<dyn Emplacement>,
}

/// Transport for one content-addressing scheme
#[async_trait]
pub trait Transmat: Send + Sync {
    /// Name used in formulas (`Input.kind`, `OutputSpec.kind`)
    fn kind(&self) -> &str;

    /// Hash the content at `path` without modifying it
    async fn scan(&self, path: &Path) -> Result<ContentHash>;

    /// Fetch the content addressed by `hash` from `url` and verify it
    async fn materialize(&self, hash: &ContentHash, url: &str) -> Result<Materialized>;

    /// Ship the content at `path` to `url`, returning its hash.
    ///
    /// An empty `url` only hashes.
    async fn commit(&self, path: &Path, url: &str) -> Result<ContentHash>;
}

/// Lookup of transmats by type name
#[derive(Clone, Default)]
pub struct TransmatRegistry {
    transmats: HashMap<String, Arc<dyn Transmat>>,
}

impl TransmatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in transmats, staging under `staging_dir`
    pub fn with_defaults(staging_dir: impl Into<PathBuf>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DirTransmat::new(staging_dir)));
        registry
    }

    pub fn register(&mut self, transmat: Arc<dyn Transmat>) {
        self.transmats.insert(transmat.kind().to_string(), transmat);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn Transmat>> {
        self.transmats
            .get(kind)
            .cloned()
            .ok_or_else(|| ReproError::UnknownType {
                registry: "transmat",
                name: kind.to_string(),
            })
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.transmats.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = TransmatRegistry::with_defaults("/tmp/staging");
        assert_eq!(registry.kinds(), vec!["dir"]);
        assert_eq!(registry.get("dir").unwrap().kind(), "dir");

        let err = registry.get("ipfs").err().unwrap();
        assert!(matches!(err, ReproError::UnknownType { name, .. } if name == "ipfs"));
    }
}
