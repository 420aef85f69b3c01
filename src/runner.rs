//! Sandboxed solver subprocess runner.
//!
//! One invocation = one isolated working directory under the configured
//! workroot, a fixed argv (nothing user-controlled reaches the command
//! line), a hard wall-clock deadline, and guaranteed cleanup on every exit
//! path including timeout and panic.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use rand::RngCore;
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::settings::Settings;

/// Typed failure modes of one solver invocation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("solver timed out after {0} s")]
    Timeout(u64),
    #[error("solver exited with code {code}: {stderr_tail}")]
    NonZeroExit { code: i32, stderr_tail: String },
    #[error("solver produced no output file")]
    NoOutputFile,
    #[error("geometry data error — check wire definitions")]
    Geometry,
    #[error("segment data error — check segmentation")]
    Segment,
    #[error("solver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Removes the run's files and directory when dropped, so cleanup happens on
/// every exit path. Failures are logged, never raised.
struct WorkdirGuard {
    dir: PathBuf,
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        for name in ["input.out", "input.nec"] {
            let path = self.dir.join(name);
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("cleanup failed for {}: {e}", path.display());
                }
            }
        }
        if let Err(e) = std::fs::remove_dir(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("cleanup failed for {}: {e}", self.dir.display());
            }
        }
    }
}

/// One-shot solver executor.
#[derive(Debug, Clone)]
pub struct SolverRunner {
    bin: String,
    workroot: PathBuf,
    timeout: Duration,
}

impl SolverRunner {
    pub fn new(settings: &Settings) -> Self {
        Self {
            bin: settings.nec_bin.clone(),
            workroot: PathBuf::from(&settings.nec_workdir),
            timeout: settings.sim_timeout(),
        }
    }

    pub fn with_paths(bin: impl Into<String>, workroot: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            workroot: workroot.into(),
            timeout,
        }
    }

    /// Execute the solver on `deck` and return the raw report text.
    pub async fn run(&self, deck: &str) -> Result<String, RunnerError> {
        let run_id = random_run_id();
        let workdir = self.workroot.join(&run_id);
        let input_file = workdir.join("input.nec");
        let output_file = workdir.join("input.out");

        tokio::fs::create_dir_all(&workdir).await?;
        let _guard = WorkdirGuard {
            dir: workdir.clone(),
        };

        tokio::fs::write(&input_file, deck.as_bytes()).await?;

        debug!(%run_id, workdir = %workdir.display(), "running solver");

        let child = Command::new(&self.bin)
            .arg("-i")
            .arg(&input_file)
            .arg("-o")
            .arg(&output_file)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let timeout_s = self.timeout.as_secs();
        let out = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                error!(%run_id, "solver timed out after {timeout_s} s");
                return Err(RunnerError::Timeout(timeout_s));
            }
        };

        let stderr_tail = tail_lossy(&out.stderr, 500);
        if !out.status.success() {
            let code = out.status.code().unwrap_or(-1);
            error!(%run_id, code, stderr = %stderr_tail, "solver failed");
            return Err(RunnerError::NonZeroExit { code, stderr_tail });
        }
        if !stderr_tail.trim().is_empty() {
            warn!(%run_id, "solver stderr: {stderr_tail}");
        }

        let raw = match tokio::fs::read(&output_file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RunnerError::NoOutputFile);
            }
            Err(e) => return Err(e.into()),
        };
        let output = String::from_utf8_lossy(&raw).into_owned();

        if output.contains("GEOMETRY DATA ERROR") {
            return Err(RunnerError::Geometry);
        }
        if output.contains("SEGMENT DATA ERROR") {
            return Err(RunnerError::Segment);
        }

        debug!(%run_id, output_size = output.len(), "solver run complete");
        Ok(output)
    }
}

/// Short random run id, 48 bits of entropy.
fn random_run_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn tail_lossy(bytes: &[u8], n: usize) -> String {
    let start = bytes.len().saturating_sub(n);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// True when the directory contains no per-run leftovers.
pub fn workroot_is_clean(workroot: &Path) -> bool {
    match std::fs::read_dir(workroot) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn stub_solver(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake_nec");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn runner_with(stub: &Path, root: &Path, secs: u64) -> SolverRunner {
        SolverRunner::with_paths(
            stub.to_str().unwrap(),
            root,
            Duration::from_secs(secs),
        )
    }

    #[tokio::test]
    async fn copies_deck_through_stub_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let workroot = tmp.path().join("runs");
        let stub = stub_solver(tmp.path(), r#"cat "$2" > "$4""#);
        let runner = runner_with(&stub, &workroot, 10);

        let output = runner.run("CM test\nCE\nEN\n").await.unwrap();
        assert!(output.contains("CM test"));
        assert!(workroot_is_clean(&workroot));
    }

    #[tokio::test]
    async fn timeout_kills_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let workroot = tmp.path().join("runs");
        let stub = stub_solver(tmp.path(), "sleep 30");
        let runner = runner_with(&stub, &workroot, 1);

        let err = runner.run("EN\n").await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout(1)));
        assert!(workroot_is_clean(&workroot));
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let workroot = tmp.path().join("runs");
        let stub = stub_solver(tmp.path(), "echo boom >&2; exit 3");
        let runner = runner_with(&stub, &workroot, 10);

        match runner.run("EN\n").await.unwrap_err() {
            RunnerError::NonZeroExit { code, stderr_tail } => {
                assert_eq!(code, 3);
                assert!(stderr_tail.contains("boom"));
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
        assert!(workroot_is_clean(&workroot));
    }

    #[tokio::test]
    async fn missing_output_file_is_typed() {
        let tmp = tempfile::tempdir().unwrap();
        let workroot = tmp.path().join("runs");
        let stub = stub_solver(tmp.path(), "true");
        let runner = runner_with(&stub, &workroot, 10);

        let err = runner.run("EN\n").await.unwrap_err();
        assert!(matches!(err, RunnerError::NoOutputFile));
        assert!(workroot_is_clean(&workroot));
    }

    #[tokio::test]
    async fn geometry_error_text_classified() {
        let tmp = tempfile::tempdir().unwrap();
        let workroot = tmp.path().join("runs");
        let stub = stub_solver(tmp.path(), r#"echo "GEOMETRY DATA ERROR" > "$4""#);
        let runner = runner_with(&stub, &workroot, 10);

        let err = runner.run("EN\n").await.unwrap_err();
        assert!(matches!(err, RunnerError::Geometry));
        assert!(workroot_is_clean(&workroot));
    }
}
