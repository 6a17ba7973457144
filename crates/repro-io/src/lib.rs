//! # repro-io
//!
//! Moving content in and out of jobs for Repro.
//!
//! This crate provides:
//! - Deterministic content hashing of filesystem trees
//! - Transmats: hash-verified materialize/commit per content-addressing scheme
//! - Placers: copy, bind and overlay placement of one tree at one path
//! - The assembler that composes a job filesystem with guaranteed teardown

pub mod assembler;
pub mod fs;
pub mod placer;
pub mod scan;
pub mod transmat;

pub use assembler::{Assembler, Assembly, AssemblyPart};
pub use placer::{CompositePlacer, CopyPlacer, Emplacement, Placer, RemoveOnTeardown};
pub use scan::scan_tree;
pub use transmat::{DirTransmat, Materialized, Transmat, TransmatRegistry};
