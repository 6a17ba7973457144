//! Host executor
//!
//! Runs the entrypoint as a plain child process of this one, rooted in the
//! assembled job directory. The program itself is looked up inside that root,
//! so the root input decides what runs. There is no chroot: the program sees
//! the host filesystem through absolute paths, and its own dynamic loader and
//! libraries come from the host. Beyond that it gets only a cleared
//! environment and a private working tree, so this is the reference backend
//! for trusted formulas and for tests.

use async_trait::async_trait;
use chrono::Utc;
use repro_core::{
    fail_open::fail_open_sync, Accents, Formula, JobResult, Output, ReproConfig, ReproError,
    Result, STDIO_LOCATION,
};
use repro_io::{fs::remove_tree, placer, Assembler, Assembly, AssemblyPart, TransmatRegistry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::executor::Executor;
use crate::job::{job_channel, Job, JobId, JobSink, StreamKind};

const CHUNK_SIZE: usize = 8192;

/// Search path used when the formula sets no `PATH`
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Name of the combined output file inside the `$stdio` output
pub const STDIO_LOG: &str = "log";

/// Executor that runs jobs directly on this host
#[derive(Clone)]
pub struct HostExecutor {
    jobs_dir: PathBuf,
    transmats: TransmatRegistry,
    assembler: Assembler,
}

/// What a job got to before it stopped
struct Outcome {
    exit_code: i32,
    outputs: BTreeMap<String, Output>,
}

impl HostExecutor {
    /// Build a host executor from configuration
    pub fn new(config: &ReproConfig) -> Result<Self> {
        let placer = placer::for_mode(config.placer, &config.work_dir.join("layers"))?;
        Ok(Self::with_parts(
            config.jobs_dir(),
            TransmatRegistry::with_defaults(config.staging_dir()),
            Assembler::new(placer),
        ))
    }

    pub fn with_parts(
        jobs_dir: impl Into<PathBuf>,
        transmats: TransmatRegistry,
        assembler: Assembler,
    ) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
            transmats,
            assembler,
        }
    }

    /// Run one job to completion and report through `sink`
    async fn drive(self, sink: JobSink, formula: Formula, launched: oneshot::Sender<()>) {
        let started_at = Utc::now();
        let job_dir = self.jobs_dir.join(sink.id().to_string());
        let mut assembly = Assembly::new();
        let mut outcome = Outcome {
            exit_code: -1,
            outputs: BTreeMap::new(),
        };

        let error = self
            .execute(&sink, &formula, &job_dir, &mut assembly, &mut outcome, launched)
            .await
            .err();
        if let Some(e) = &error {
            warn!("Job {} failed: {}", sink.id(), e);
        }

        // the assembly is released on a blocking thread; if that thread is
        // lost, dropping the assembly still releases it
        let released = tokio::task::spawn_blocking(move || {
            let result = assembly.teardown();
            if result.is_ok() {
                fail_open_sync("job directory cleanup", || remove_tree(&job_dir));
            }
            result
        })
        .await;
        match released {
            Ok(Ok(())) => debug!("Released job {}", sink.id()),
            Ok(Err(e)) => warn!("Teardown of job {} incomplete: {}", sink.id(), e),
            Err(e) => warn!("Teardown task for job {} failed: {}", sink.id(), e),
        }

        sink.finish(JobResult {
            exit_code: outcome.exit_code,
            error: error.map(Into::into),
            outputs: outcome.outputs,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        });
    }

    async fn execute(
        &self,
        sink: &JobSink,
        formula: &Formula,
        job_dir: &Path,
        assembly: &mut Assembly,
        outcome: &mut Outcome,
        launched: oneshot::Sender<()>,
    ) -> Result<()> {
        check_platform(&formula.accents)?;
        let (program, args) = formula
            .accents
            .entrypoint
            .split_first()
            .ok_or_else(|| ReproError::Validation("entrypoint is empty".to_string()))?;

        let root = job_dir.join("root");
        let stdio_dir = job_dir.join("stdio");
        for dir in [&root, &stdio_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                ReproError::Assembly(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }

        // staging areas are recorded first so they are released last
        let mut parts = Vec::with_capacity(formula.inputs.len());
        for input in &formula.inputs {
            let transmat = self.transmats.get(&input.kind)?;
            let materialized = transmat.materialize(&input.hash, &input.url).await?;
            parts.push(AssemblyPart::new(
                materialized.path.clone(),
                input.location.clone(),
            ));
            assembly.record(materialized.emplacement);
        }
        self.assemble(assembly, &root, parts).await?;

        for spec in &formula.outputs {
            if spec.location != STDIO_LOCATION {
                let dir = root.join(spec.location.trim_start_matches('/'));
                std::fs::create_dir_all(&dir).map_err(|e| {
                    ReproError::Assembly(format!("failed to create {}: {}", dir.display(), e))
                })?;
            }
        }

        let executable = resolve_program(&root, program, &formula.accents.env)?;
        info!(
            "Launching {:?} from {}",
            formula.accents.entrypoint,
            executable.display()
        );
        let mut command = Command::new(&executable);
        #[cfg(unix)]
        command.arg0(program);
        let mut child = command
            .args(args)
            .current_dir(&root)
            .env_clear()
            .envs(&formula.accents.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReproError::Execution(format!("failed to launch {}: {}", program, e)))?;
        let _ = launched.send(());

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, StreamKind::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, StreamKind::Stderr, tx.clone()));
        }
        drop(tx);

        let mut log = tokio::fs::File::create(stdio_dir.join(STDIO_LOG)).await?;
        while let Some((stream, data)) = rx.recv().await {
            log.write_all(&data).await?;
            sink.emit(stream, data);
        }
        log.flush().await?;
        drop(log);

        let status = child
            .wait()
            .await
            .map_err(|e| ReproError::Execution(format!("failed to wait for {}: {}", program, e)))?;
        outcome.exit_code = status.code().unwrap_or(-1);
        info!("Job {} exited with code {}", sink.id(), outcome.exit_code);

        for spec in &formula.outputs {
            let path = if spec.location == STDIO_LOCATION {
                stdio_dir.clone()
            } else {
                root.join(spec.location.trim_start_matches('/'))
            };
            let transmat = self.transmats.get(&spec.kind)?;
            let hash = transmat.commit(&path, &spec.url).await?;
            debug!("Output {} committed as {}", spec.location, hash);
            outcome
                .outputs
                .insert(spec.location.clone(), Output::committed(spec.clone(), hash));
        }
        Ok(())
    }

    async fn assemble(
        &self,
        assembly: &mut Assembly,
        root: &Path,
        parts: Vec<AssemblyPart>,
    ) -> Result<()> {
        let assembler = self.assembler.clone();
        let root = root.to_path_buf();
        let mut owned = std::mem::take(assembly);
        let (owned, result) = tokio::task::spawn_blocking(move || {
            let result = assembler.assemble_into(&mut owned, &root, parts);
            (owned, result)
        })
        .await
        .map_err(|e| ReproError::Assembly(format!("assembly task failed: {}", e)))?;
        *assembly = owned;
        result
    }
}

#[async_trait]
impl Executor for HostExecutor {
    fn name(&self) -> &str {
        "host"
    }

    #[instrument(skip_all, fields(job = %id))]
    async fn run(&self, id: JobId, formula: Formula) -> Job {
        let (job, sink) = job_channel(id);
        let (launched_tx, launched_rx) = oneshot::channel();
        tokio::spawn(
            self.clone()
                .drive(sink, formula, launched_tx)
                .in_current_span(),
        );
        // resolves on launch, or when the driver gives up before launching
        let _ = launched_rx.await;
        job
    }
}

async fn pump<R>(
    mut reader: R,
    stream: StreamKind,
    tx: mpsc::UnboundedSender<(StreamKind, Vec<u8>)>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send((stream, buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Reading {} failed: {}", stream, e);
                break;
            }
        }
    }
}

/// Find the file an entrypoint names inside the assembled root.
///
/// Names containing a slash are taken relative to the root; bare names are
/// searched along the formula's `PATH`, each entry also read inside the root.
fn resolve_program(
    root: &Path,
    program: &str,
    env: &BTreeMap<String, String>,
) -> Result<PathBuf> {
    let candidates: Vec<PathBuf> = if program.contains('/') {
        vec![root.join(program.trim_start_matches('/'))]
    } else {
        env.get("PATH")
            .map(String::as_str)
            .unwrap_or(DEFAULT_PATH)
            .split(':')
            .filter(|dir| !dir.is_empty())
            .map(|dir| root.join(dir.trim_start_matches('/')).join(program))
            .collect()
    };

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            ReproError::Execution(format!("entrypoint {} not found in job root", program))
        })
}

fn canonical_arch(arch: &str) -> &str {
    match arch {
        "amd64" | "x86_64" => "x86_64",
        "arm64" | "aarch64" => "aarch64",
        "386" | "x86" => "x86",
        other => other,
    }
}

/// Refuse formulas pinned to a different OS or architecture
fn check_platform(accents: &Accents) -> Result<()> {
    let host_os = std::env::consts::OS;
    if !accents.os.is_empty() && accents.os != host_os {
        return Err(ReproError::Execution(format!(
            "formula requires os {:?}, host is {:?}",
            accents.os, host_os
        )));
    }
    let host_arch = std::env::consts::ARCH;
    if !accents.arch.is_empty() && canonical_arch(&accents.arch) != canonical_arch(host_arch) {
        return Err(ReproError::Execution(format!(
            "formula requires arch {:?}, host is {:?}",
            accents.arch, host_arch
        )));
    }
    Ok(())
}
