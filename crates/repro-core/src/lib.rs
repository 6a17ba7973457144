//! # repro-core
//!
//! Core types for the Repro formula runner.
//!
//! Repro runs declaratively described computations ("formulas") and lets
//! callers check that they are reproducible: put the same things in, get the
//! same things out.
//!
//! ## Core Paradigm
//!
//! - Inputs are content-addressed; their hashes are always verified
//! - URLs are transport details and never part of a formula's identity
//! - The conjecture (inputs, accents, flagged outputs) is the reproducibility fingerprint
//! - The root filesystem is just another input, at location `/`

pub mod config;
mod conjecture;
mod error;
pub mod fail_open;
mod patch;
mod types;
mod validate;

pub use config::{PlacerMode, ReproConfig};
pub use conjecture::conjecture_hash;
pub use error::{ErrorKind, JobError, ReproError, Result};
pub use patch::{apply_patch, parse_env_assignment};
pub use types::*;
pub use validate::{normalize_location, validate};
