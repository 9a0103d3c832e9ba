// src/exec/command.rs

//! Job body that runs an external tool through the shell.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dag::{JobContext, JobFn, JobFuture, JobOutput, JobValue};
use crate::errors::JobError;
use crate::template::render_inputs;

/// Runs a command line with `sh -c`.
///
/// The command is rendered at graph construction time except for `{in:N}`
/// placeholders, which are filled from the job's resolved inputs when it
/// runs. On success the job publishes its well-known output path (or
/// `null` when it has none).
#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
    output: Option<PathBuf>,
    workdir: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            output: None,
            workdir: None,
        }
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl JobFn for ShellCommand {
    fn call(&self, ctx: JobContext) -> JobFuture {
        let this = self.clone();
        Box::pin(async move { this.run(ctx).await })
    }

    fn describe(&self) -> String {
        format!("sh:{}", self.command)
    }
}

impl ShellCommand {
    async fn run(self, ctx: JobContext) -> Result<JobOutput, JobError> {
        let line = render_inputs(&self.command, ctx.inputs())?;

        info!(job = %ctx.label, attempt = ctx.attempt, cmd = %line, "running command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so everything the shell starts can be killed
        // together.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            JobError::failed(format!("spawning `{}`: {}", line, e))
        })?;
        let _group = ProcessGroup::new(child.id(), ctx.label.clone());

        // Always drain both pipes so the child never blocks on a full buffer.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain(stdout, ctx.label.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain(stderr, ctx.label.clone(), "stderr"));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| JobError::failed(format!("waiting for `{}`: {}", line, e)))?;

        if !status.success() {
            return Err(JobError::Command {
                command: line,
                code: status.code().unwrap_or(-1),
            });
        }

        let value = match &self.output {
            Some(path) => JobValue::String(path.display().to_string()),
            None => JobValue::Null,
        };
        Ok(JobOutput::value(value))
    }
}

/// Kills the command's process group when dropped: on completion, on
/// timeout (the body task is aborted) and when the run shuts down. Tools
/// started in the background by the command line end with the job.
struct ProcessGroup {
    pgid: Option<u32>,
    label: String,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>, label: String) -> Self {
        Self { pgid, label }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid else {
            return;
        };
        if cfg!(unix) {
            // A group with no members left is not an error worth reporting.
            let killed = std::process::Command::new("kill")
                .args(["-KILL", "--", &format!("-{}", pgid)])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if let Err(e) = killed {
                warn!(job = %self.label, pgid, error = %e, "could not kill process group");
            }
        }
    }
}

async fn drain<R>(reader: R, label: String, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(job = %label, stream, "{}", line);
    }
}
