//! Final formula validation before submission

use std::collections::HashSet;

use crate::types::{Formula, OutputSpec, ROOT_LOCATION, STDIO_LOCATION};
use crate::{ReproError, Result};

/// Validate a formula and fill in the outputs every run needs.
///
/// On success the returned formula has normalized locations, inputs and
/// outputs sorted by location, exactly one root input, and a `$stdio` output.
pub fn validate(mut formula: Formula) -> Result<Formula> {
    for input in &mut formula.inputs {
        if input.kind.is_empty() {
            return Err(ReproError::Validation(format!(
                "input at {:?} has no type",
                input.location
            )));
        }
        if input.hash.is_empty() {
            return Err(ReproError::Validation(format!(
                "input at {:?} has no hash; every input must be content-addressed",
                input.location
            )));
        }
        input.location = normalize_location(&input.location)?;
    }

    let mut seen = HashSet::new();
    for input in &formula.inputs {
        if !seen.insert(input.location.as_str()) {
            return Err(ReproError::Validation(format!(
                "more than one input at location {:?}",
                input.location
            )));
        }
    }
    if !seen.contains(ROOT_LOCATION) {
        return Err(ReproError::Validation(
            "formula has no root filesystem input (location \"/\")".to_string(),
        ));
    }

    for output in &mut formula.outputs {
        if output.kind.is_empty() {
            return Err(ReproError::Validation(format!(
                "output at {:?} has no type",
                output.location
            )));
        }
        if output.location != STDIO_LOCATION {
            output.location = normalize_location(&output.location)?;
        }
    }

    let mut seen = HashSet::new();
    for output in &formula.outputs {
        if !seen.insert(output.location.as_str()) {
            return Err(ReproError::Validation(format!(
                "more than one output at location {:?}",
                output.location
            )));
        }
    }
    if !seen.contains(STDIO_LOCATION) {
        formula.outputs.push(OutputSpec::stdio());
    }

    if formula.accents.entrypoint.is_empty() {
        return Err(ReproError::Validation(
            "formula has no entrypoint".to_string(),
        ));
    }

    formula.inputs.sort_by(|a, b| a.location.cmp(&b.location));
    formula.outputs.sort_by(|a, b| a.location.cmp(&b.location));

    Ok(formula)
}

/// Canonical form of a job filesystem path: absolute, no trailing slash,
/// no empty, `.` or `..` segments.
pub fn normalize_location(location: &str) -> Result<String> {
    if !location.starts_with('/') {
        return Err(ReproError::Validation(format!(
            "location {:?} must be an absolute path",
            location
        )));
    }

    let mut segments = Vec::new();
    for segment in location.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(ReproError::Validation(format!(
                    "location {:?} must not contain '..'",
                    location
                )))
            }
            s => segments.push(s),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}
