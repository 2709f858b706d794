// Copyright 2025 Oxide Computer Company

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use slog::{info, o, Logger};
use tokio::sync::Mutex;

use strata_bench_common::Result as BenchResult;

use crate::config::DriverConfig;
use crate::daemon::DaemonManager;
#[cfg(test)]
use crate::daemon::DaemonState;
use crate::exec::{run_checked, CommandSpec, Launcher};
use crate::hosts::{HostPartitioner, HostSource, HostfileSource, LocalHosts};
use crate::spawn::{
    compose_env, AdapterMode, InterceptApi, SpawnSpec,
};

/// What a scenario wants run: shape, placement, and feature tags.
/// The driver turns this into a full spec with a composed environment
/// and resolved host partition.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub nprocs: u32,
    pub ppn: Option<u32>,
    /// How many cluster nodes to spread over; omitted means a purely
    /// local run.
    pub nodes: Option<usize>,
    pub api: Option<InterceptApi>,
    pub mode: Option<AdapterMode>,
    /// Server config name, resolved under the profile's conf dir.
    pub conf: Option<String>,
    pub redirect: Option<PathBuf>,
}

impl Default for SpawnRequest {
    fn default() -> SpawnRequest {
        SpawnRequest {
            nprocs: 1,
            ppn: None,
            nodes: None,
            api: None,
            mode: None,
            conf: None,
            redirect: None,
        }
    }
}

/// One driver invocation: the resolved configuration, the launch
/// primitive, the host partitioner, and the daemon lifecycle, all
/// threaded through to scenarios by reference.
pub struct Driver {
    cfg: DriverConfig,
    launcher: Arc<dyn Launcher>,
    hosts: HostPartitioner,
    daemon: Mutex<DaemonManager>,
    log: Logger,
}

impl Driver {
    pub fn new(
        cfg: DriverConfig,
        launcher: Arc<dyn Launcher>,
        log: Logger,
    ) -> Result<Driver> {
        let source: Box<dyn HostSource> = match &cfg.hostfile {
            Some(path) => Box::new(HostfileSource::new(path.clone())),
            None => Box::new(LocalHosts),
        };
        let hosts = HostPartitioner::new(
            source.as_ref(),
            &cfg.cache_dir,
            log.new(o!("component" => "hosts")),
        )?;
        let daemon = Mutex::new(DaemonManager::new(
            &cfg,
            Arc::clone(&launcher),
            log.new(o!("component" => "daemon")),
        ));
        Ok(Driver {
            cfg,
            launcher,
            hosts,
            daemon,
            log,
        })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.cfg
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn launcher(&self) -> &dyn Launcher {
        self.launcher.as_ref()
    }

    pub fn hosts(&self) -> &HostPartitioner {
        &self.hosts
    }

    /// Resolve a request into a runnable spec: partition the hosts,
    /// compose the environment, validate the shape.
    pub fn spawn_spec(&self, req: SpawnRequest) -> Result<SpawnSpec> {
        let hosts = match req.nodes {
            Some(nodes) => Some(self.hosts.subset(nodes)?),
            None => None,
        };
        let env = compose_env(
            &self.cfg,
            req.api,
            req.mode,
            req.conf.as_deref(),
            hosts.as_ref().map(|h| h.hostfile.as_path()),
        );
        let spec = SpawnSpec::new(
            req.nprocs,
            req.ppn,
            hosts,
            env,
            req.redirect,
            req.api,
            req.mode,
        )?;
        Ok(spec)
    }

    /// A spec covering every known node with one process each, or a
    /// single local process when there is no host list.
    pub fn all_nodes_spec(&self) -> Result<SpawnSpec> {
        let nodes = self.hosts.available();
        let req = if nodes == 0 {
            SpawnRequest::default()
        } else {
            SpawnRequest {
                nprocs: nodes as u32,
                ppn: Some(1),
                nodes: Some(nodes),
                ..Default::default()
            }
        };
        self.spawn_spec(req)
    }

    pub async fn start_daemon(&self, spec: &SpawnSpec) -> Result<()> {
        self.daemon.lock().await.start(spec).await?;
        Ok(())
    }

    pub async fn stop_daemon(&self, spec: &SpawnSpec) -> Result<()> {
        self.daemon.lock().await.stop(spec).await?;
        Ok(())
    }

    #[cfg(test)]
    pub async fn daemon_state(&self) -> DaemonState {
        self.daemon.lock().await.state()
    }

    /// A workload command for one of the strata binaries, resolved
    /// under the profile's bin dir.
    pub fn workload_command(
        &self,
        spec: &SpawnSpec,
        bin: &str,
        args: Vec<String>,
    ) -> CommandSpec {
        let program = self.cfg.bin_dir.join(bin);
        CommandSpec::from_spawn(spec, &program.display().to_string(), args)
    }

    /// Create every device directory on every node before a scenario
    /// runs.
    pub async fn prepare_devices(&self) -> Result<()> {
        let spec = self.all_nodes_spec()?;
        for (name, path) in &self.cfg.devices {
            let cmd = CommandSpec::from_spawn(
                &spec,
                "mkdir",
                vec!["-p".to_string(), path.display().to_string()],
            );
            run_checked(self.launcher.as_ref(), &cmd).await?;
            info!(self.log, "prepared device {} at {:?}", name, path);
        }
        Ok(())
    }

    /// Remove everything under every device path.  Destructive; the
    /// caller decides when this runs.
    pub fn cleanup_devices(&self) -> BenchResult<()> {
        for (name, path) in &self.cfg.devices {
            if !path.exists() {
                continue;
            }
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
            info!(self.log, "cleared device {} at {:?}", name, path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exec::fake::FakeLauncher;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn test_cfg(dir: &Path) -> DriverConfig {
        DriverConfig {
            bin_dir: PathBuf::from("/opt/strata/bin"),
            conf_dir: PathBuf::from("/opt/strata/conf"),
            cache_dir: dir.join("cache"),
            devices: BTreeMap::from([
                ("nvme".to_string(), dir.join("nvme")),
                ("ssd".to_string(), dir.join("ssd")),
            ]),
            hostfile: None,
            warmup_secs: 0,
            cleanup: true,
            quiet: true,
            search_path: "/usr/bin".to_string(),
            lib_search_path: String::new(),
        }
    }

    fn cluster_cfg(dir: &Path, hosts: &[&str]) -> DriverConfig {
        let hostfile = dir.join("master.txt");
        let mut f = fs::File::create(&hostfile).unwrap();
        for h in hosts {
            writeln!(f, "{}", h).unwrap();
        }
        let mut cfg = test_cfg(dir);
        cfg.hostfile = Some(hostfile);
        cfg
    }

    #[test]
    fn spawn_spec_resolves_hosts_and_env() {
        let dir = tempdir().unwrap();
        let cfg = cluster_cfg(dir.path(), &["n0", "n1", "n2", "n3"]);
        let d = Driver::new(cfg, Arc::new(FakeLauncher::new()), test_log())
            .unwrap();

        let spec = d
            .spawn_spec(SpawnRequest {
                nprocs: 8,
                ppn: Some(4),
                nodes: Some(2),
                mode: Some(AdapterMode::Default),
                ..Default::default()
            })
            .unwrap();

        let hosts = spec.hosts.as_ref().unwrap();
        assert_eq!(hosts.hosts, vec!["n0", "n1"]);
        assert_eq!(
            spec.env.get("STRATA_HOSTFILE").unwrap(),
            &hosts.hostfile.display().to_string()
        );
        assert!(spec.env.contains_key("STRATA_CONF"));
    }

    #[test]
    fn too_many_nodes_is_insufficient_hosts() {
        let dir = tempdir().unwrap();
        let cfg = cluster_cfg(dir.path(), &["n0"]);
        let d = Driver::new(cfg, Arc::new(FakeLauncher::new()), test_log())
            .unwrap();

        let err = d
            .spawn_spec(SpawnRequest {
                nprocs: 2,
                ppn: Some(1),
                nodes: Some(2),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("hosts"));
    }

    #[test]
    fn all_nodes_spec_shapes() {
        let dir = tempdir().unwrap();

        let local = Driver::new(
            test_cfg(dir.path()),
            Arc::new(FakeLauncher::new()),
            test_log(),
        )
        .unwrap();
        let spec = local.all_nodes_spec().unwrap();
        assert_eq!(spec.nprocs, 1);
        assert!(spec.hosts.is_none());

        let dir = tempdir().unwrap();
        let cluster = Driver::new(
            cluster_cfg(dir.path(), &["n0", "n1", "n2"]),
            Arc::new(FakeLauncher::new()),
            test_log(),
        )
        .unwrap();
        let spec = cluster.all_nodes_spec().unwrap();
        assert_eq!(spec.nprocs, 3);
        assert_eq!(spec.ppn, Some(1));
        assert_eq!(spec.hosts.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn prepare_devices_runs_mkdir_per_device() {
        let dir = tempdir().unwrap();
        let launcher = Arc::new(FakeLauncher::new());
        let d = Driver::new(
            test_cfg(dir.path()),
            launcher.clone(),
            test_log(),
        )
        .unwrap();

        d.prepare_devices().await.unwrap();
        let calls = launcher.calls();
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert_eq!(call.program, "mkdir");
            assert_eq!(call.args[0], "-p");
        }
    }

    #[test]
    fn cleanup_empties_device_dirs() {
        let dir = tempdir().unwrap();
        let cfg = test_cfg(dir.path());
        let nvme = dir.path().join("nvme");
        fs::create_dir_all(nvme.join("sub")).unwrap();
        fs::write(nvme.join("ior-data.bin"), b"x").unwrap();
        fs::write(nvme.join("sub").join("blob"), b"y").unwrap();

        let d = Driver::new(cfg, Arc::new(FakeLauncher::new()), test_log())
            .unwrap();
        d.cleanup_devices().unwrap();

        assert!(nvme.exists());
        assert_eq!(fs::read_dir(&nvme).unwrap().count(), 0);
        // Devices that never got created are skipped quietly.
        assert!(!dir.path().join("ssd").exists());
    }
}
