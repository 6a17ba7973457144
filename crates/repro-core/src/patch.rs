//! Layering partial formulas on top of a base formula

use crate::types::{Accents, Formula};
use crate::{ReproError, Result};

impl Formula {
    /// Merge `overlay` into this formula.
    ///
    /// Non-empty scalar fields of the overlay replace the base's, maps merge
    /// key-wise with the overlay winning, and inputs/outputs are replaced by
    /// location (new locations are appended). The base is left untouched if
    /// the overlay is malformed.
    pub fn apply_patch(&mut self, overlay: &Formula) -> Result<()> {
        check_overlay(overlay)?;

        for input in &overlay.inputs {
            match self.inputs.iter_mut().find(|i| i.location == input.location) {
                Some(existing) => *existing = input.clone(),
                None => self.inputs.push(input.clone()),
            }
        }

        for output in &overlay.outputs {
            match self
                .outputs
                .iter_mut()
                .find(|o| o.location == output.location)
            {
                Some(existing) => *existing = output.clone(),
                None => self.outputs.push(output.clone()),
            }
        }

        if overlay.scheduling_info.is_some() {
            self.scheduling_info = overlay.scheduling_info.clone();
        }

        merge_accents(&mut self.accents, &overlay.accents);
        Ok(())
    }

    /// An overlay holding only environment assignments of the form `KEY=val`
    pub fn env_patch<S: AsRef<str>>(assignments: &[S]) -> Result<Formula> {
        let mut overlay = Formula::default();
        for assignment in assignments {
            let (key, value) = parse_env_assignment(assignment.as_ref())?;
            overlay.accents.env.insert(key, value);
        }
        Ok(overlay)
    }
}

/// Merge `overlay` onto `base`, returning the merged formula
pub fn apply_patch(mut base: Formula, overlay: &Formula) -> Result<Formula> {
    base.apply_patch(overlay)?;
    Ok(base)
}

/// Split `KEY=val` at the first `=`
pub fn parse_env_assignment(assignment: &str) -> Result<(String, String)> {
    match assignment.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        Some(_) => Err(ReproError::Validation(format!(
            "env assignment {:?} has an empty name",
            assignment
        ))),
        None => Err(ReproError::Validation(format!(
            "env assignment {:?} must have an equal sign (like 'KEY=val')",
            assignment
        ))),
    }
}

fn check_overlay(overlay: &Formula) -> Result<()> {
    for input in &overlay.inputs {
        if input.location.is_empty() {
            return Err(ReproError::Validation(
                "patch input has no location".to_string(),
            ));
        }
    }
    for output in &overlay.outputs {
        if output.location.is_empty() {
            return Err(ReproError::Validation(
                "patch output has no location".to_string(),
            ));
        }
    }
    for key in overlay.accents.env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(ReproError::Validation(format!(
                "patch env name {:?} is not a valid variable name",
                key
            )));
        }
    }
    Ok(())
}

fn merge_accents(base: &mut Accents, overlay: &Accents) {
    if !overlay.os.is_empty() {
        base.os = overlay.os.clone();
    }
    if !overlay.arch.is_empty() {
        base.arch = overlay.arch.clone();
    }
    if !overlay.entrypoint.is_empty() {
        base.entrypoint = overlay.entrypoint.clone();
    }
    for (k, v) in &overlay.env {
        base.env.insert(k.clone(), v.clone());
    }
    for (k, v) in &overlay.custom {
        base.custom.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Input, OutputSpec, SchedulingInfo};
    use std::collections::BTreeMap;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_merges_with_overlay_precedence() {
        let mut base = Formula::default();
        base.accents.env = env(&[("K", "v1"), ("J", "x")]);
        let mut overlay = Formula::default();
        overlay.accents.env = env(&[("K", "v2")]);

        let merged = apply_patch(base, &overlay).unwrap();
        assert_eq!(merged.accents.env, env(&[("K", "v2"), ("J", "x")]));
    }

    #[test]
    fn test_scalars_replace_only_when_set() {
        let mut base = Formula::default();
        base.accents.os = "linux".into();
        base.accents.arch = "amd64".into();
        base.accents.entrypoint = vec!["/bin/a".into()];

        let mut overlay = Formula::default();
        overlay.accents.arch = "arm64".into();

        base.apply_patch(&overlay).unwrap();
        assert_eq!(base.accents.os, "linux");
        assert_eq!(base.accents.arch, "arm64");
        assert_eq!(base.accents.entrypoint, vec!["/bin/a".to_string()]);
    }

    #[test]
    fn test_inputs_and_outputs_replace_by_location() {
        let mut base = Formula::default();
        base.inputs.push(Input::new("dir", "old", "", "/"));
        base.outputs.push(OutputSpec::new("dir", "/out"));

        let mut overlay = Formula::default();
        overlay.inputs.push(Input::new("dir", "new", "", "/"));
        overlay.inputs.push(Input::new("dir", "lib", "", "/lib"));
        overlay
            .outputs
            .push(OutputSpec::new("dir", "/out").with_conjecture(true));
        overlay.scheduling_info = Some(SchedulingInfo::new(serde_json::json!({"cpus": 2})));

        base.apply_patch(&overlay).unwrap();
        assert_eq!(base.inputs.len(), 2);
        assert_eq!(base.root_input().unwrap().hash.as_str(), "new");
        assert!(base.output("/out").unwrap().conjecture);
        assert!(base.scheduling_info.is_some());
    }

    #[test]
    fn test_malformed_overlay_leaves_base_untouched() {
        let mut base = Formula::default();
        base.accents.os = "linux".into();
        let mut overlay = Formula::default();
        overlay.accents.os = "plan9".into();
        overlay.accents.env = env(&[("A=B", "c")]);

        let err = base.apply_patch(&overlay).unwrap_err();
        assert!(matches!(err, ReproError::Validation(_)));
        assert_eq!(base.accents.os, "linux");
    }

    #[test]
    fn test_parse_env_assignment() {
        assert_eq!(
            parse_env_assignment("KEY=a=b").unwrap(),
            ("KEY".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_env_assignment("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_assignment("NOSEP").is_err());
        assert!(parse_env_assignment("=val").is_err());
    }

    #[test]
    fn test_env_patch() {
        let overlay = Formula::env_patch(&["A=1", "B=2"]).unwrap();
        assert_eq!(overlay.accents.env, env(&[("A", "1"), ("B", "2")]));
        assert!(Formula::env_patch(&["broken"]).is_err());
    }
}
