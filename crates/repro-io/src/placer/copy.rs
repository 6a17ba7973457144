//! Placement by plain recursive copy

use repro_core::Result;
use std::path::Path;
use tracing::debug;

use super::{assembly_error, Emplacement, Placer, RemoveOnTeardown};
use crate::fs::{copy_tree, remove_tree};

/// Copies the source into place. Writes at the destination can never reach
/// the source, so bare mounts cannot be honored.
///
/// Whatever an earlier placement left at the destination is replaced, the
/// same way a mount shadows what lies beneath it.
#[derive(Debug, Clone, Default)]
pub struct CopyPlacer;

impl CopyPlacer {
    pub fn new() -> Self {
        Self
    }
}

impl Placer for CopyPlacer {
    fn place(
        &self,
        source: &Path,
        dest: &Path,
        writable: bool,
        bare_mount: bool,
    ) -> Result<Box<dyn Emplacement>> {
        if bare_mount {
            return Err(assembly_error(
                "copy placer cannot bare-mount",
                source,
                "use mount placement",
            ));
        }

        debug!(
            "Copying {} to {} (writable: {})",
            source.display(),
            dest.display(),
            writable
        );
        remove_tree(dest).map_err(|e| assembly_error("failed to clear", dest, e))?;
        copy_tree(source, dest).map_err(|e| assembly_error("failed to copy into", dest, e))?;

        Ok(Box::new(RemoveOnTeardown::new(dest)))
    }
}
