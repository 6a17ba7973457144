//! Core type definitions for Repro formulas
//!
//! A [`Formula`] describes `(inputs, computation) -> (outputs)`. The parts of a
//! formula that should determine its result are called the *conjecture*:
//! every input (minus its URL), all [`Accents`], and each output that has its
//! `conjecture` flag set. [`SchedulingInfo`] and URLs never take part.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{JobError, ReproError, Result};

/// Location of the root filesystem input. Exactly one input must have it.
pub const ROOT_LOCATION: &str = "/";

/// Reserved output location for the combined stdout/stderr capture
pub const STDIO_LOCATION: &str = "$stdio";

/// Key of the synthetic exit code entry in a result document
pub const EXITCODE_KEY: &str = "$exitcode";

/// Type of the synthetic exit code entry in a result document
pub const EXITCODE_TYPE: &str = "exitcode";

/// Transmat type used for outputs that `validate` supplies
pub const DEFAULT_OUTPUT_TYPE: &str = "dir";

/// Identity hash of a piece of content, as produced by a transmat scan
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A data source fed into the beginning of a computation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    /// Transmat implementation name ("dir", "tar", ...)
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Identifying hash of the input data, always verified
    #[serde(default)]
    pub hash: ContentHash,
    /// Where the data can be fetched from. Not part of the conjecture.
    #[serde(default)]
    pub url: String,
    /// Path inside the job filesystem where the input is placed
    #[serde(default)]
    pub location: String,
}

impl Input {
    pub fn new(
        kind: impl Into<String>,
        hash: impl Into<ContentHash>,
        url: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            hash: hash.into(),
            url: url.into(),
            location: location.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.location == ROOT_LOCATION
    }
}

/// Where to pick up data once the task completes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Path collected from the job filesystem, or [`STDIO_LOCATION`]
    #[serde(default)]
    pub location: String,
    /// Where to ship the data. Empty means "hash only". Not part of the conjecture.
    #[serde(default)]
    pub url: String,
    /// Whether this output is expected to be identical on every run
    #[serde(default)]
    pub conjecture: bool,
}

impl OutputSpec {
    pub fn new(kind: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            location: location.into(),
            url: String::new(),
            conjecture: false,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_conjecture(mut self, conjecture: bool) -> Self {
        self.conjecture = conjecture;
        self
    }

    /// The output that captures combined stdout/stderr
    pub fn stdio() -> Self {
        Self::new(DEFAULT_OUTPUT_TYPE, STDIO_LOCATION)
    }
}

/// An output after task completion: its spec plus the committed hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    #[serde(flatten)]
    pub spec: OutputSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
}

impl Output {
    pub fn committed(spec: OutputSpec, hash: ContentHash) -> Self {
        Self {
            spec,
            hash: Some(hash),
        }
    }

    pub fn pending(spec: OutputSpec) -> Self {
        Self { spec, hash: None }
    }
}

/// Executor-independent constraints and information about a task.
/// All of it is part of the conjecture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accents {
    /// OS restriction; linux presumed if empty
    #[serde(default)]
    pub os: String,
    /// Architecture restriction; x86_64 presumed if empty
    #[serde(default)]
    pub arch: String,
    /// Executable and arguments to invoke as the task
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// User-defined bag, anything goes
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

/// Executor-specific parameters. Opaque to the core and decoded lazily by
/// whichever scheduler or executor consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulingInfo(serde_json::Value);

impl SchedulingInfo {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Decode into the consumer's own parameter type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.0.clone()).map_err(|e| {
            ReproError::Validation(format!("Unusable scheduling info: {}", e))
        })
    }
}

/// Serializable description of a computation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(
        rename = "schedulingInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduling_info: Option<SchedulingInfo>,
    #[serde(default)]
    pub accents: Accents,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
}

impl Formula {
    /// Decode a formula (or patch) document from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| ReproError::Validation(format!("Malformed formula document: {}", e)))
    }

    /// Read and decode a formula (or patch) document from a file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReproError::Validation(format!(
                "Could not read formula file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&content).map_err(|e| match e {
            ReproError::Validation(msg) => {
                ReproError::Validation(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// The root filesystem input, if present
    pub fn root_input(&self) -> Option<&Input> {
        self.inputs.iter().find(|i| i.is_root())
    }

    /// Look up an output spec by location
    pub fn output(&self, location: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.location == location)
    }
}

/// Final outcome of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Process exit code; -1 when the process never ran or was killed by a signal
    pub exit_code: i32,
    /// Set when the job could not complete; a non-zero exit alone is not an error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Committed outputs keyed by output location
    #[serde(default)]
    pub outputs: BTreeMap<String, Output>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResult {
    /// A job that could not run to completion
    pub fn failed(error: impl Into<JobError>) -> Self {
        Self {
            exit_code: -1,
            error: Some(error.into()),
            outputs: BTreeMap::new(),
            started_at: None,
            finished_at: Some(Utc::now()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }
}

/// The original formula joined with the outputs of its run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub inputs: Vec<Input>,
    #[serde(
        rename = "schedulingInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scheduling_info: Option<SchedulingInfo>,
    pub accents: Accents,
    pub outputs: BTreeMap<String, Output>,
    /// Present only when the job could not run to completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl ResultDocument {
    /// Join a formula with its job result.
    ///
    /// Outputs that were never committed keep an empty hash; the exit code is
    /// recorded under [`EXITCODE_KEY`].
    pub fn new(formula: &Formula, result: &JobResult) -> Self {
        let mut outputs: BTreeMap<String, Output> = formula
            .outputs
            .iter()
            .map(|spec| (spec.location.clone(), Output::pending(spec.clone())))
            .collect();

        for (key, output) in &result.outputs {
            outputs.insert(key.clone(), output.clone());
        }

        outputs.insert(
            EXITCODE_KEY.to_string(),
            Output::committed(
                OutputSpec::new(EXITCODE_TYPE, ""),
                ContentHash::new(result.exit_code.to_string()),
            ),
        );

        Self {
            inputs: formula.inputs.clone(),
            scheduling_info: formula.scheduling_info.clone(),
            accents: formula.accents.clone(),
            outputs,
            error: result.error.clone(),
        }
    }

    /// Single-line JSON rendering
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "inputs": [
            {"type": "dir", "hash": "abc", "url": "file:///store", "location": "/"}
        ],
        "schedulingInfo": {"memory": "2G"},
        "accents": {
            "entrypoint": ["/bin/echo", "hi"],
            "env": {"PATH": "/bin"}
        },
        "outputs": [
            {"type": "dir", "location": "/out", "conjecture": true}
        ]
    }"#;

    #[test]
    fn test_decode_formula_document() {
        let formula = Formula::from_json_str(DOC).unwrap();
        assert_eq!(formula.inputs.len(), 1);
        assert!(formula.root_input().is_some());
        assert_eq!(formula.inputs[0].hash.as_str(), "abc");
        assert_eq!(formula.accents.entrypoint, vec!["/bin/echo", "hi"]);
        assert_eq!(formula.accents.os, "");
        assert!(formula.output("/out").unwrap().conjecture);
        assert_eq!(formula.output("/out").unwrap().url, "");
    }

    #[test]
    fn test_decode_malformed_document() {
        let err = Formula::from_json_str("{\"inputs\": 7}").unwrap_err();
        assert!(matches!(err, ReproError::Validation(_)));
    }

    #[test]
    fn test_scheduling_info_decodes_lazily() {
        #[derive(Deserialize)]
        struct Hints {
            memory: String,
        }

        let formula = Formula::from_json_str(DOC).unwrap();
        let info = formula.scheduling_info.unwrap();
        let hints: Hints = info.decode().unwrap();
        assert_eq!(hints.memory, "2G");

        let err = info.decode::<Vec<u32>>().unwrap_err();
        assert!(matches!(err, ReproError::Validation(_)));
    }

    #[test]
    fn test_result_document_has_exitcode() {
        let formula = Formula::from_json_str(DOC).unwrap();
        let mut result = JobResult {
            exit_code: 3,
            error: None,
            outputs: BTreeMap::new(),
            started_at: None,
            finished_at: None,
        };
        result.outputs.insert(
            "/out".to_string(),
            Output::committed(formula.outputs[0].clone(), ContentHash::new("f00")),
        );

        let doc = ResultDocument::new(&formula, &result);
        let exit = &doc.outputs[EXITCODE_KEY];
        assert_eq!(exit.spec.kind, EXITCODE_TYPE);
        assert_eq!(exit.hash, Some(ContentHash::new("3")));
        assert_eq!(doc.outputs["/out"].hash, Some(ContentHash::new("f00")));

        let line = doc.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"$exitcode\""));
    }

    #[test]
    fn test_result_document_keeps_uncommitted_outputs() {
        let formula = Formula::from_json_str(DOC).unwrap();
        let result = JobResult::failed(JobError::new(crate::ErrorKind::Execution, "no launch"));

        let doc = ResultDocument::new(&formula, &result);
        assert_eq!(doc.outputs["/out"].hash, None);
        assert_eq!(doc.outputs[EXITCODE_KEY].hash, Some(ContentHash::new("-1")));
    }

    #[test]
    fn test_result_document_separates_failure_from_exit() {
        let formula = Formula::from_json_str(DOC).unwrap();

        let failed = JobResult::failed(JobError::new(crate::ErrorKind::Execution, "no launch"));
        let line = ResultDocument::new(&formula, &failed).to_json_line().unwrap();
        assert!(line.contains("no launch"));
        assert!(line.contains("\"error\""));

        let exited = JobResult {
            exit_code: -1,
            error: None,
            outputs: BTreeMap::new(),
            started_at: None,
            finished_at: None,
        };
        let doc = ResultDocument::new(&formula, &exited);
        assert!(doc.error.is_none());
        assert!(!doc.to_json_line().unwrap().contains("\"error\""));
        assert_eq!(doc.outputs[EXITCODE_KEY].hash, Some(ContentHash::new("-1")));
    }
}
