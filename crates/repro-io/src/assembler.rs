//! Composing a job filesystem out of many placements
//!
//! Parts are placed parents-first and released children-first. An
//! [`Assembly`] releases everything it recorded when torn down or dropped, so
//! a job's filesystem is dismantled on every exit path, including early
//! failure and task cancellation.

use repro_core::{fail_open::fail_open_sync, ReproError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::placer::{assembly_error, Emplacement, Placer};

/// One item to place into a job filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyPart {
    /// Materialized content on the host
    pub source: PathBuf,
    /// Absolute path inside the job filesystem
    pub target: String,
    pub writable: bool,
    pub bare_mount: bool,
}

impl AssemblyPart {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            writable: true,
            bare_mount: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn bare(mut self) -> Self {
        self.bare_mount = true;
        self
    }
}

/// Drives a [`Placer`] to build one job filesystem
#[derive(Clone)]
pub struct Assembler {
    placer: Arc<dyn Placer>,
}

impl Assembler {
    pub fn new(placer: Arc<dyn Placer>) -> Self {
        Self { placer }
    }

    /// Assemble `parts` under `base`.
    ///
    /// If any placement fails, everything placed so far is released before
    /// the error is returned.
    pub fn assemble(&self, base: &Path, parts: Vec<AssemblyPart>) -> Result<Assembly> {
        let mut assembly = Assembly::new();
        self.assemble_into(&mut assembly, base, parts)?;
        Ok(assembly)
    }

    /// Assemble `parts` under `base`, recording into a caller-owned assembly.
    ///
    /// On failure the already recorded emplacements stay in `assembly` for the
    /// caller to tear down.
    pub fn assemble_into(
        &self,
        assembly: &mut Assembly,
        base: &Path,
        mut parts: Vec<AssemblyPart>,
    ) -> Result<()> {
        parts.sort_by(|a, b| a.target.cmp(&b.target));

        for part in parts {
            let dest = base.join(part.target.trim_start_matches('/'));
            let dir = if part.source.is_dir() {
                dest.as_path()
            } else {
                dest.parent().unwrap_or(base)
            };
            fs::create_dir_all(dir).map_err(|e| assembly_error("failed to create", dir, e))?;

            debug!("Placing {} at {}", part.source.display(), part.target);
            let emplacement = self
                .placer
                .place(&part.source, &dest, part.writable, part.bare_mount)
                .map_err(|e| match e {
                    err @ ReproError::Assembly(_) => err,
                    other => assembly_error("failed to place", &dest, other),
                })?;
            assembly.record(emplacement);
        }
        Ok(())
    }
}

/// The set of emplacements that make up one job filesystem
#[derive(Debug, Default)]
pub struct Assembly {
    emplacements: Vec<Box<dyn Emplacement>>,
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a placement; it will be released before anything
    /// recorded earlier.
    pub fn record(&mut self, emplacement: Box<dyn Emplacement>) {
        self.emplacements.push(emplacement);
    }

    pub fn len(&self) -> usize {
        self.emplacements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emplacements.is_empty()
    }

    /// Release every recorded emplacement, most recent first.
    ///
    /// Keeps going past failures so one stuck mount cannot strand the rest;
    /// the first failure is returned. Safe to call repeatedly.
    pub fn teardown(&mut self) -> Result<()> {
        let mut first_err = None;
        let mut failures = 0;

        while let Some(emplacement) = self.emplacements.pop() {
            let target = emplacement.target().display().to_string();
            debug!("Releasing {}", target);
            if let Err(e) = emplacement.teardown() {
                warn!("Failed to release {}: {}", target, e);
                failures += 1;
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) if failures == 1 => Err(e),
            Some(e) => Err(ReproError::Assembly(format!(
                "{} releases failed; first: {}",
                failures, e
            ))),
        }
    }
}

impl Drop for Assembly {
    fn drop(&mut self) {
        if !self.emplacements.is_empty() {
            fail_open_sync("assembly teardown", || self.teardown());
        }
    }
}
