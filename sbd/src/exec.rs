// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use slog::{info, Logger};
use tokio::process::{Child, Command};

use strata_bench_common::{BenchError, Result};

use crate::spawn::SpawnSpec;

/// The parallel launch wrapper used whenever a command spans several
/// processes or machines.
const MPI_LAUNCH: &str = "mpirun";

/// A fully resolved command: what to run, with which environment, in
/// what shape, and where its output goes.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub nprocs: u32,
    pub ppn: Option<u32>,
    pub hostfile: Option<PathBuf>,
    pub redirect: Option<PathBuf>,
}

impl CommandSpec {
    /// Wrap a program and arguments in the shape and environment of a
    /// spawn spec.
    pub fn from_spawn(
        spec: &SpawnSpec,
        program: &str,
        args: Vec<String>,
    ) -> CommandSpec {
        CommandSpec {
            program: program.to_string(),
            args,
            env: spec.env.clone(),
            nprocs: spec.nprocs,
            ppn: spec.ppn,
            hostfile: spec
                .hosts
                .as_ref()
                .filter(|h| !h.is_empty())
                .map(|h| h.hostfile.clone()),
            redirect: spec.redirect.clone(),
        }
    }

    /// The argv this command runs as, including any parallel launch
    /// wrapping.  Environment variables ride along as `-genv` pairs in
    /// key order, so identical specs produce identical command lines.
    pub fn argv(&self) -> Vec<String> {
        if self.nprocs <= 1 && self.hostfile.is_none() {
            let mut argv = vec![self.program.clone()];
            argv.extend(self.args.iter().cloned());
            return argv;
        }

        let mut argv = vec![
            MPI_LAUNCH.to_string(),
            "-n".to_string(),
            self.nprocs.to_string(),
        ];
        if let Some(ppn) = self.ppn {
            argv.push("-ppn".to_string());
            argv.push(ppn.to_string());
        }
        if let Some(hostfile) = &self.hostfile {
            argv.push("-f".to_string());
            argv.push(hostfile.display().to_string());
        }
        for (key, value) in &self.env {
            argv.push("-genv".to_string());
            argv.push(key.clone());
            argv.push(value.clone());
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Handle for a command launched without waiting.  Dropping it does
/// not kill the process.
#[async_trait]
pub trait RunningProc: Send {
    async fn wait(&mut self) -> Result<ExitStatus>;
    fn try_wait(&mut self) -> Result<Option<ExitStatus>>;
}

/// The launch primitive everything runs through.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run to completion.  `Ok` carries the exit status even when the
    /// command failed; `Err` means it never launched.
    async fn run(&self, cmd: &CommandSpec) -> Result<ExitStatus>;

    /// Launch without waiting.  The returned handle is the only way
    /// to observe the process.
    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn RunningProc>>;
}

/// Run a command and require a zero exit status.
pub async fn run_checked(
    launcher: &dyn Launcher,
    cmd: &CommandSpec,
) -> Result<()> {
    let status = launcher.run(cmd).await?;
    if !status.success() {
        return Err(BenchError::CommandFailed {
            program: cmd.program.clone(),
            status,
        });
    }
    Ok(())
}

/// Real launcher: single local processes run directly, anything wider
/// goes through the parallel launch wrapper.
pub struct ShellLauncher {
    log: Logger,
}

impl ShellLauncher {
    pub fn new(log: Logger) -> ShellLauncher {
        ShellLauncher { log }
    }

    fn build(&self, cmd: &CommandSpec) -> Result<Command> {
        let argv = cmd.argv();
        info!(self.log, "run: {}", argv.join(" "));

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        // The composed environment is the whole environment.
        command.env_clear();
        command.envs(&cmd.env);

        if let Some(path) = &cmd.redirect {
            let out = File::create(path)?;
            let err = out.try_clone()?;
            command.stdout(Stdio::from(out));
            command.stderr(Stdio::from(err));
        }
        Ok(command)
    }
}

#[async_trait]
impl Launcher for ShellLauncher {
    async fn run(&self, cmd: &CommandSpec) -> Result<ExitStatus> {
        let mut command = self.build(cmd)?;
        let status = command.status().await.map_err(|e| {
            BenchError::LaunchFailed {
                program: cmd.program.clone(),
                source: e,
            }
        })?;
        Ok(status)
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn RunningProc>> {
        let mut command = self.build(cmd)?;
        let child = command.spawn().map_err(|e| BenchError::LaunchFailed {
            program: cmd.program.clone(),
            source: e,
        })?;
        Ok(Box::new(ChildProc { child }))
    }
}

struct ChildProc {
    child: Child,
}

#[async_trait]
impl RunningProc for ChildProc {
    async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }
}
