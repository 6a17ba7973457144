//! End-to-end runs through the host executor

use repro_core::{
    validate, ErrorKind, Formula, Input, OutputSpec, ReproConfig, EXITCODE_KEY, STDIO_LOCATION,
};
use repro_executor::{Executor, HostExecutor, JobId, StreamKind};
use repro_io::scan_tree;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn executor(tmp: &TempDir) -> HostExecutor {
    let config = ReproConfig {
        work_dir: tmp.path().join("work"),
        ..Default::default()
    };
    HostExecutor::new(&config).unwrap()
}

fn root_tree(tmp: &TempDir) -> std::path::PathBuf {
    let root = bare_root_tree(tmp);
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::copy("/bin/sh", root.join("bin/sh")).unwrap();
    root
}

fn bare_root_tree(tmp: &TempDir) -> std::path::PathBuf {
    let root = tmp.path().join("rootfs");
    fs::create_dir_all(root.join("etc")).unwrap();
    fs::write(root.join("etc/motd"), "welcome\n").unwrap();
    root
}

fn formula(root: &Path, script: &str) -> Formula {
    let mut formula = Formula::default();
    formula.inputs.push(Input::new(
        "dir",
        scan_tree(root).unwrap(),
        root.to_str().unwrap(),
        "/",
    ));
    formula.accents.entrypoint = vec!["/bin/sh".into(), "-c".into(), script.into()];
    formula
        .outputs
        .push(OutputSpec::new("dir", "/out").with_conjecture(true));
    validate(formula).unwrap()
}

#[tokio::test]
async fn test_exit_code_propagation() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);
    let id = JobId::new();

    let formula = formula(&root, "cat etc/motd; echo done > out/status; exit 3");
    let mut job = executor.run(id, formula.clone()).await;
    let output = job.take_output().unwrap().collect().await;
    let result = job.wait().await;

    assert_eq!(result.exit_code, 3);
    assert!(result.error.is_none());
    assert_eq!(output, b"welcome\n");
    assert!(result.outputs.contains_key("/out"));
    assert!(result.outputs.contains_key(STDIO_LOCATION));
    assert!(result.started_at.is_some() && result.finished_at.is_some());

    let doc = repro_core::ResultDocument::new(&formula, &result);
    assert_eq!(
        doc.outputs[EXITCODE_KEY].hash.as_ref().unwrap().as_str(),
        "3"
    );

    assert!(!tmp.path().join("work/jobs").join(id.to_string()).exists());
    assert_eq!(fs::read(root.join("etc/motd")).unwrap(), b"welcome\n");
}

#[tokio::test]
async fn test_conjecture_outputs_are_stable() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);
    let formula = formula(&root, "echo 42 > out/answer");

    let first = executor.run(JobId::new(), formula.clone()).await.wait().await;
    let second = executor.run(JobId::new(), formula.clone()).await.wait().await;

    assert_eq!(first.exit_code, 0);
    assert!(formula.diverging_outputs(&first.outputs, &second.outputs).is_empty());
    assert_eq!(
        repro_core::conjecture_hash(&formula, &first.outputs),
        repro_core::conjecture_hash(&formula, &second.outputs)
    );
}

#[tokio::test]
async fn test_tagged_streams() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);

    let mut job = executor
        .run(JobId::new(), formula(&root, "echo oops >&2"))
        .await;
    let mut output = job.take_output().unwrap();
    let event = output.next_event().await.unwrap();
    assert_eq!(event.stream, StreamKind::Stderr);
    assert_eq!(event.data, b"oops\n");
    assert_eq!(job.wait().await.exit_code, 0);
}

#[tokio::test]
async fn test_launch_failure_is_reported() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);
    let id = JobId::new();

    let mut formula = formula(&root, "true");
    formula.accents.entrypoint = vec!["/nonexistent/entrypoint".into()];
    let result = executor.run(id, formula).await.wait().await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Execution);
    assert_eq!(result.exit_code, -1);
    assert!(result.outputs.is_empty());
    assert!(!tmp.path().join("work/jobs").join(id.to_string()).exists());
}

#[tokio::test]
async fn test_entrypoint_comes_from_job_root() {
    let tmp = TempDir::new().unwrap();
    let root = bare_root_tree(&tmp);
    let executor = executor(&tmp);

    let result = executor
        .run(JobId::new(), formula(&root, "exit 0"))
        .await
        .wait()
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Execution);
    assert!(error.message().contains("not found in job root"));
    assert_eq!(result.exit_code, -1);
}

#[tokio::test]
async fn test_bare_entrypoint_searches_path_in_root() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);

    let mut formula = formula(&root, "exit 5");
    formula.accents.entrypoint[0] = "sh".into();
    formula.accents.env.insert("PATH".into(), "/bin".into());
    let result = executor.run(JobId::new(), formula).await.wait().await;

    assert!(result.error.is_none());
    assert_eq!(result.exit_code, 5);
}

#[tokio::test]
async fn test_corrupt_input_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);

    let mut formula = formula(&root, "true");
    formula.inputs[0].hash = "0000".into();
    let result = executor.run(JobId::new(), formula).await.wait().await;

    assert_eq!(result.error.unwrap().kind, ErrorKind::Integrity);
    let staged = fs::read_dir(tmp.path().join("work/staging"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(staged, 0);
}

#[tokio::test]
async fn test_unknown_input_type() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);

    let mut formula = formula(&root, "true");
    formula.inputs[0].kind = "tar".into();
    let result = executor.run(JobId::new(), formula).await.wait().await;

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transport);
    assert!(error.message().contains("tar"));
}

#[tokio::test]
async fn test_outputs_shipped_to_warehouse() {
    let tmp = TempDir::new().unwrap();
    let root = root_tree(&tmp);
    let executor = executor(&tmp);
    let warehouse = tmp.path().join("warehouse");
    fs::create_dir_all(&warehouse).unwrap();

    let mut formula = formula(&root, "echo shipped > out/file");
    let out = formula
        .outputs
        .iter_mut()
        .find(|o| o.location == "/out")
        .unwrap();
    out.url = warehouse.to_str().unwrap().to_string();
    let result = executor.run(JobId::new(), formula).await.wait().await;

    let hash = result.outputs["/out"].hash.clone().unwrap();
    let stored = warehouse.join(hash.as_str());
    assert_eq!(fs::read(stored.join("file")).unwrap(), b"shipped\n");
}
