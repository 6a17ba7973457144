//! Conjecture hashing
//!
//! `h(inputs || accents || filter(outputs, conjecture))` is the reproducibility
//! fingerprint of a run. Two runs of the same formula must agree on it; if they
//! don't, the task is not deterministic.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::types::{Accents, ContentHash, Formula, Input, Output, OutputSpec};

/// Hash of a formula's conjecture together with the outputs of one run.
///
/// Only outputs flagged `conjecture` contribute, with the hash found under
/// their location in `outputs`. URLs and scheduling info never contribute, and
/// the order of inputs and outputs in the formula is irrelevant.
pub fn conjecture_hash(formula: &Formula, outputs: &BTreeMap<String, Output>) -> ContentHash {
    let mut hasher = Sha256::new();
    hash_inputs(&mut hasher, &formula.inputs);
    hash_accents(&mut hasher, &formula.accents);

    let specs = conjecture_outputs(&formula.outputs);
    hash_len(&mut hasher, specs.len());
    for spec in specs {
        hash_output_spec(&mut hasher, spec);
        let committed = outputs
            .get(&spec.location)
            .and_then(|o| o.hash.as_ref())
            .map(ContentHash::as_str)
            .unwrap_or("");
        hash_str(&mut hasher, committed);
    }

    ContentHash::new(hex::encode(hasher.finalize()))
}

impl Formula {
    /// Fingerprint of everything that is fixed before a run: inputs, accents
    /// and which outputs are asserted to be deterministic.
    pub fn setup_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        hash_inputs(&mut hasher, &self.inputs);
        hash_accents(&mut hasher, &self.accents);

        let specs = conjecture_outputs(&self.outputs);
        hash_len(&mut hasher, specs.len());
        for spec in specs {
            hash_output_spec(&mut hasher, spec);
        }

        ContentHash::new(hex::encode(hasher.finalize()))
    }

    /// Outputs whose hashes disagree between two runs of this formula
    pub fn diverging_outputs<'a>(
        &'a self,
        first: &BTreeMap<String, Output>,
        second: &BTreeMap<String, Output>,
    ) -> Vec<&'a str> {
        conjecture_outputs(&self.outputs)
            .into_iter()
            .filter(|spec| {
                let a = first.get(&spec.location).and_then(|o| o.hash.as_ref());
                let b = second.get(&spec.location).and_then(|o| o.hash.as_ref());
                a != b
            })
            .map(|spec| spec.location.as_str())
            .collect()
    }
}

fn conjecture_outputs(outputs: &[OutputSpec]) -> Vec<&OutputSpec> {
    let mut specs: Vec<&OutputSpec> = outputs.iter().filter(|o| o.conjecture).collect();
    specs.sort_by(|a, b| a.location.cmp(&b.location));
    specs
}

fn hash_inputs(hasher: &mut Sha256, inputs: &[Input]) {
    let mut sorted: Vec<&Input> = inputs.iter().collect();
    sorted.sort_by(|a, b| a.location.cmp(&b.location));

    hash_len(hasher, sorted.len());
    for input in sorted {
        hash_str(hasher, &input.kind);
        hash_str(hasher, input.hash.as_str());
        hash_str(hasher, &input.location);
    }
}

fn hash_accents(hasher: &mut Sha256, accents: &Accents) {
    hash_str(hasher, &accents.os);
    hash_str(hasher, &accents.arch);

    // argv order is meaningful, so the entrypoint is hashed as given
    hash_len(hasher, accents.entrypoint.len());
    for arg in &accents.entrypoint {
        hash_str(hasher, arg);
    }

    hash_map(hasher, &accents.env);
    hash_map(hasher, &accents.custom);
}

fn hash_output_spec(hasher: &mut Sha256, spec: &OutputSpec) {
    hash_str(hasher, &spec.kind);
    hash_str(hasher, &spec.location);
}

fn hash_map(hasher: &mut Sha256, map: &BTreeMap<String, String>) {
    hash_len(hasher, map.len());
    for (k, v) in map {
        hash_str(hasher, k);
        hash_str(hasher, v);
    }
}

fn hash_str(hasher: &mut Sha256, s: &str) {
    hasher.update(s.as_bytes());
    hasher.update([0u8]);
}

fn hash_len(hasher: &mut Sha256, n: usize) {
    hasher.update((n as u64).to_be_bytes());
}
