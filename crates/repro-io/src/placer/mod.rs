//! Placing materialized content into a job filesystem
//!
//! A [`Placer`] maps one source tree onto one destination path and hands back
//! an [`Emplacement`] that knows how to undo exactly that placement.

mod copy;
#[cfg(target_os = "linux")]
mod mount;

pub use copy::CopyPlacer;
#[cfg(target_os = "linux")]
pub use mount::{BindPlacer, OverlayPlacer};

use repro_core::{fail_open::fail_open_sync, PlacerMode, ReproError, Result};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::remove_tree;

/// One reversible filesystem placement
pub trait Emplacement: Send + Debug {
    /// The path this emplacement occupies
    fn target(&self) -> &Path;

    /// Undo the placement. Called at most once.
    fn teardown(self: Box<Self>) -> Result<()>;
}

/// Places a source tree at a destination path
pub trait Placer: Send + Sync {
    /// Make `dest` hold the content of `source`.
    ///
    /// When `writable` is set and `bare_mount` is not, later writes at `dest`
    /// must not reach `source`. With `bare_mount` they must.
    fn place(
        &self,
        source: &Path,
        dest: &Path,
        writable: bool,
        bare_mount: bool,
    ) -> Result<Box<dyn Emplacement>>;
}

/// Emplacement whose release deletes a path
#[derive(Debug)]
pub struct RemoveOnTeardown {
    path: PathBuf,
}

impl RemoveOnTeardown {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Emplacement for RemoveOnTeardown {
    fn target(&self) -> &Path {
        &self.path
    }

    fn teardown(self: Box<Self>) -> Result<()> {
        remove_tree(&self.path)
    }
}

/// Routes each placement by its flags: read-only and bare placements go to
/// `direct`, writable isolated placements go to `cow`.
pub struct CompositePlacer {
    direct: Arc<dyn Placer>,
    cow: Arc<dyn Placer>,
}

impl CompositePlacer {
    pub fn new(direct: Arc<dyn Placer>, cow: Arc<dyn Placer>) -> Self {
        Self { direct, cow }
    }
}

impl Placer for CompositePlacer {
    fn place(
        &self,
        source: &Path,
        dest: &Path,
        writable: bool,
        bare_mount: bool,
    ) -> Result<Box<dyn Emplacement>> {
        if bare_mount || !writable {
            self.direct.place(source, dest, writable, bare_mount)
        } else {
            self.cow.place(source, dest, writable, bare_mount)
        }
    }
}

/// Build the placer for a configured mode.
///
/// `scratch_dir` holds copy-on-write layers for mount mode.
pub fn for_mode(mode: PlacerMode, scratch_dir: &Path) -> Result<Arc<dyn Placer>> {
    match mode {
        PlacerMode::Copy => Ok(Arc::new(CopyPlacer::new())),
        #[cfg(target_os = "linux")]
        PlacerMode::Mount => Ok(Arc::new(CompositePlacer::new(
            Arc::new(BindPlacer::new()),
            Arc::new(OverlayPlacer::new(scratch_dir)),
        ))),
        #[cfg(not(target_os = "linux"))]
        PlacerMode::Mount => {
            let _ = scratch_dir;
            Err(ReproError::Config(
                "mount placement is only supported on Linux".to_string(),
            ))
        }
    }
}

/// Tear down a boxed emplacement, logging rather than propagating failure
pub(crate) fn release_quietly(emplacement: Box<dyn Emplacement>) {
    let target = emplacement.target().display().to_string();
    fail_open_sync(&format!("release of {}", target), || emplacement.teardown());
}

pub(crate) fn assembly_error(what: &str, path: &Path, err: impl std::fmt::Display) -> ReproError {
    ReproError::Assembly(format!("{} {}: {}", what, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<&'static str>>,
        name: &'static str,
    }

    #[derive(Debug)]
    struct Nothing(PathBuf);

    impl Emplacement for Nothing {
        fn target(&self) -> &Path {
            &self.0
        }

        fn teardown(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    impl Placer for Recording {
        fn place(
            &self,
            _source: &Path,
            dest: &Path,
            _writable: bool,
            _bare_mount: bool,
        ) -> Result<Box<dyn Emplacement>> {
            self.calls.lock().unwrap().push(self.name);
            Ok(Box::new(Nothing(dest.to_path_buf())))
        }
    }

    #[test]
    fn test_composite_routes_by_flags() {
        let direct = Arc::new(Recording {
            name: "direct",
            ..Default::default()
        });
        let cow = Arc::new(Recording {
            name: "cow",
            ..Default::default()
        });
        let placer = CompositePlacer::new(direct.clone(), cow.clone());

        let p = Path::new("/x");
        placer.place(p, p, false, false).unwrap();
        placer.place(p, p, true, true).unwrap();
        placer.place(p, p, true, false).unwrap();

        assert_eq!(*direct.calls.lock().unwrap(), vec!["direct", "direct"]);
        assert_eq!(*cow.calls.lock().unwrap(), vec!["cow"]);
    }

    #[test]
    fn test_remove_on_teardown() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("staged");
        std::fs::create_dir_all(path.join("deep")).unwrap();

        let emplacement: Box<dyn Emplacement> = Box::new(RemoveOnTeardown::new(&path));
        assert_eq!(emplacement.target(), path.as_path());
        emplacement.teardown().unwrap();
        assert!(!path.exists());
    }
}
