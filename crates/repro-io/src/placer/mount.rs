//! Placement by bind and overlay mounts (Linux, needs CAP_SYS_ADMIN)

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use repro_core::{fail_open::fail_open_sync, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::{assembly_error, Emplacement, Placer};
use crate::fs::remove_tree;

/// Bind-mounts the source at the destination, read-only unless writable.
///
/// A writable bind mount exposes the source itself, so it is only made for
/// bare mounts.
#[derive(Debug, Clone, Default)]
pub struct BindPlacer;

impl BindPlacer {
    pub fn new() -> Self {
        Self
    }
}

impl Placer for BindPlacer {
    fn place(
        &self,
        source: &Path,
        dest: &Path,
        writable: bool,
        bare_mount: bool,
    ) -> Result<Box<dyn Emplacement>> {
        if writable && !bare_mount {
            return Err(assembly_error(
                "bind placer cannot isolate writes to",
                dest,
                "use an overlay for writable placements",
            ));
        }

        debug!("Bind-mounting {} at {}", source.display(), dest.display());
        mount(
            Some(source),
            dest,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|e| assembly_error("failed to bind-mount at", dest, e))?;

        let emplacement = Unmount {
            target: dest.to_path_buf(),
            layer: None,
        };

        if !writable {
            // read-only needs a second pass; MS_RDONLY is ignored on the initial bind
            if let Err(e) = mount(
                None::<&str>,
                dest,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            ) {
                super::release_quietly(Box::new(emplacement));
                return Err(assembly_error("failed to make read-only", dest, e));
            }
        }

        Ok(Box::new(emplacement))
    }
}

/// Overlays a private writable layer on top of the source
#[derive(Debug, Clone)]
pub struct OverlayPlacer {
    scratch_dir: PathBuf,
}

impl OverlayPlacer {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }
}

impl Placer for OverlayPlacer {
    fn place(
        &self,
        source: &Path,
        dest: &Path,
        _writable: bool,
        bare_mount: bool,
    ) -> Result<Box<dyn Emplacement>> {
        if bare_mount {
            return Err(assembly_error(
                "overlay placer cannot bare-mount",
                source,
                "use a bind mount",
            ));
        }

        let layer = self.scratch_dir.join(format!("layer-{}", Uuid::new_v4()));
        let upper = layer.join("upper");
        let work = layer.join("work");
        fs::create_dir_all(&upper).map_err(|e| assembly_error("failed to create", &upper, e))?;
        fs::create_dir_all(&work).map_err(|e| assembly_error("failed to create", &work, e))?;

        let options = format!(
            "lowerdir={},upperdir={},workdir={}",
            source.display(),
            upper.display(),
            work.display()
        );
        debug!("Overlay-mounting {} at {}", source.display(), dest.display());

        if let Err(e) = mount(
            Some("overlay"),
            dest,
            Some("overlay"),
            MsFlags::empty(),
            Some(options.as_str()),
        ) {
            fail_open_sync("overlay layer cleanup", || remove_tree(&layer));
            return Err(assembly_error("failed to overlay-mount at", dest, e));
        }

        Ok(Box::new(Unmount {
            target: dest.to_path_buf(),
            layer: Some(layer),
        }))
    }
}

/// Unmounts a placement and discards its private layer, if any
#[derive(Debug)]
struct Unmount {
    target: PathBuf,
    layer: Option<PathBuf>,
}

impl Emplacement for Unmount {
    fn target(&self) -> &Path {
        &self.target
    }

    fn teardown(self: Box<Self>) -> Result<()> {
        umount2(self.target.as_path(), MntFlags::MNT_DETACH)
            .map_err(|e| assembly_error("failed to unmount", &self.target, e))?;
        if let Some(layer) = &self.layer {
            remove_tree(layer)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repro_core::ReproError;

    // Actual mounting needs privileges; only the refusal paths are checked here.

    #[test]
    fn test_bind_refuses_writable_isolated() {
        let err = BindPlacer::new()
            .place(Path::new("/src"), Path::new("/dest"), true, false)
            .unwrap_err();
        assert!(matches!(err, ReproError::Assembly(_)));
    }

    #[test]
    fn test_overlay_refuses_bare_mount() {
        let err = OverlayPlacer::new("/tmp")
            .place(Path::new("/src"), Path::new("/dest"), true, true)
            .unwrap_err();
        assert!(matches!(err, ReproError::Assembly(_)));
    }
}
