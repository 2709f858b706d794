// Copyright 2025 Oxide Computer Company

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slog::{info, warn, Logger};

use strata_bench_common::{BenchError, Result};

use crate::config::DriverConfig;
use crate::exec::{run_checked, CommandSpec, Launcher, RunningProc};
use crate::spawn::SpawnSpec;

pub const DAEMON_BIN: &str = "strata_daemon";
pub const FINALIZE_BIN: &str = "finalize_strata";

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Crashed,
}

/// Drives the storage daemon through its lifecycle.  This is the only
/// holder of the daemon's process handle; nobody else may signal or
/// wait on it.
///
/// Readiness is a fixed warm-up delay after launch, not a probe.  A
/// warm-up that proves too short shows up as workload failures.
pub struct DaemonManager {
    bin_dir: PathBuf,
    daemon_log: PathBuf,
    warmup: Duration,
    launcher: Arc<dyn Launcher>,
    state: DaemonState,
    handle: Option<Box<dyn RunningProc>>,
    log: Logger,
}

impl DaemonManager {
    pub fn new(
        cfg: &DriverConfig,
        launcher: Arc<dyn Launcher>,
        log: Logger,
    ) -> DaemonManager {
        DaemonManager {
            bin_dir: cfg.bin_dir.clone(),
            daemon_log: cfg.daemon_log(),
            warmup: Duration::from_secs(cfg.warmup_secs),
            launcher,
            state: DaemonState::NotStarted,
            handle: None,
            log,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Launch the daemon across the host set of `spec` and wait out
    /// the warm-up delay.  Any stale daemon processes from an earlier
    /// ungraceful run are killed first.
    pub async fn start(&mut self, spec: &SpawnSpec) -> Result<()> {
        match self.state {
            DaemonState::NotStarted | DaemonState::Stopped => (),
            DaemonState::Starting => {
                return Err(BenchError::DaemonBusy("starting"))
            }
            DaemonState::Ready => {
                return Err(BenchError::DaemonBusy("running"))
            }
            DaemonState::Stopping => {
                return Err(BenchError::DaemonBusy("stopping"))
            }
            DaemonState::Crashed => {
                return Err(BenchError::DaemonBusy("crashed"))
            }
        }

        // One daemon per node, or a single local daemon when there is
        // no host list.
        let nodes = spec
            .hosts
            .as_ref()
            .map(|h| h.len() as u32)
            .filter(|n| *n > 0)
            .unwrap_or(1);
        let dspec = spec
            .with_shape(nodes, Some(1))?
            .with_redirect(&self.daemon_log);

        let mut kill = CommandSpec::from_spawn(
            &dspec,
            "pkill",
            vec!["-f".to_string(), DAEMON_BIN.to_string()],
        );
        kill.redirect = None;
        // pkill exits nonzero when nothing matched, so the status is
        // not interesting.
        if let Err(e) = self.launcher.run(&kill).await {
            warn!(self.log, "stale daemon sweep failed: {}", e);
        }

        let program = self.bin_dir.join(DAEMON_BIN);
        let cmd = CommandSpec::from_spawn(
            &dspec,
            &program.display().to_string(),
            vec![],
        );
        info!(
            self.log,
            "starting {} on {} node(s)", DAEMON_BIN, nodes;
            "log" => %self.daemon_log.display(),
        );
        let mut handle = self.launcher.spawn(&cmd).await?;
        self.state = DaemonState::Starting;

        tokio::time::sleep(self.warmup).await;

        match handle.try_wait() {
            Err(e) => {
                self.state = DaemonState::Crashed;
                Err(e)
            }
            Ok(Some(status)) => {
                self.state = DaemonState::Crashed;
                Err(BenchError::DaemonCrashed(format!(
                    "{} during warm-up",
                    status
                )))
            }
            Ok(None) => {
                self.handle = Some(handle);
                self.state = DaemonState::Ready;
                info!(self.log, "daemon ready");
                Ok(())
            }
        }
    }

    /// Ask a running daemon to finalize, then wait for its process to
    /// exit.
    pub async fn stop(&mut self, spec: &SpawnSpec) -> Result<()> {
        if self.state != DaemonState::Ready {
            return Err(BenchError::DaemonNotRunning);
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(BenchError::DaemonNotRunning);
        };

        match handle.try_wait() {
            Err(e) => {
                self.state = DaemonState::Crashed;
                return Err(e);
            }
            Ok(Some(status)) => {
                self.state = DaemonState::Crashed;
                self.handle = None;
                return Err(BenchError::DaemonCrashed(format!(
                    "{} before stop",
                    status
                )));
            }
            Ok(None) => (),
        }

        self.state = DaemonState::Stopping;
        info!(self.log, "finalizing daemon");
        let program = self.bin_dir.join(FINALIZE_BIN);
        let mut fspec = spec.with_shape(1, None)?;
        fspec.redirect = None;
        let finalize = CommandSpec::from_spawn(
            &fspec,
            &program.display().to_string(),
            vec![],
        );
        if let Err(e) = run_checked(self.launcher.as_ref(), &finalize).await {
            // The daemon is still up; leave it stoppable.
            self.state = DaemonState::Ready;
            return Err(e);
        }

        let Some(mut handle) = self.handle.take() else {
            return Err(BenchError::DaemonNotRunning);
        };
        match handle.wait().await {
            Err(e) => {
                self.state = DaemonState::Crashed;
                Err(e)
            }
            Ok(status) => {
                info!(self.log, "daemon exited with {}", status);
                self.state = DaemonState::Stopped;
                Ok(())
            }
        }
    }
}
