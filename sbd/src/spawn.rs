// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_bench_common::{BenchError, Result};

use crate::config::DriverConfig;
use crate::hosts::HostPartition;

/// Which client-side interposition library a workload runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptApi {
    Posix,
    Stdio,
    Mpiio,
    Hdf5,
}

impl std::fmt::Display for InterceptApi {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            InterceptApi::Posix => "posix",
            InterceptApi::Stdio => "stdio",
            InterceptApi::Mpiio => "mpiio",
            InterceptApi::Hdf5 => "hdf5",
        };
        write!(f, "{}", name)
    }
}

/// Service operating mode, conveyed to clients by environment
/// variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterMode {
    Default,
    Scratch,
    Bypass,
}

impl std::fmt::Display for AdapterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            AdapterMode::Default => "default",
            AdapterMode::Scratch => "scratch",
            AdapterMode::Bypass => "bypass",
        };
        write!(f, "{}", name)
    }
}

/// One unit of work: how many processes, where they run, and the
/// environment they see.  A spec never changes after construction;
/// the with_* methods hand back adjusted copies.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub nprocs: u32,
    pub ppn: Option<u32>,
    pub hosts: Option<Arc<HostPartition>>,
    pub env: BTreeMap<String, String>,
    pub redirect: Option<PathBuf>,
    pub api: Option<InterceptApi>,
    pub mode: Option<AdapterMode>,
}

impl SpawnSpec {
    pub fn new(
        nprocs: u32,
        ppn: Option<u32>,
        hosts: Option<Arc<HostPartition>>,
        env: BTreeMap<String, String>,
        redirect: Option<PathBuf>,
        api: Option<InterceptApi>,
        mode: Option<AdapterMode>,
    ) -> Result<SpawnSpec> {
        let spec = SpawnSpec {
            nprocs,
            ppn,
            hosts,
            env,
            redirect,
            api,
            mode,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        if self.nprocs < 1 {
            return Err(BenchError::InvalidShape(
                "process count must be at least 1".to_string(),
            ));
        }
        if let Some(ppn) = self.ppn {
            if ppn < 1 || ppn > self.nprocs {
                return Err(BenchError::InvalidShape(format!(
                    "{} per node exceeds {} total",
                    ppn, self.nprocs
                )));
            }
            if let Some(hosts) = &self.hosts {
                if self.nprocs as usize != ppn as usize * hosts.len() {
                    return Err(BenchError::InvalidShape(format!(
                        "{} processes cannot fill {} node(s) at {} each",
                        self.nprocs,
                        hosts.len(),
                        ppn
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether this work depends on the storage service.  Either tag
    /// alone is enough.
    pub fn uses_service(&self) -> bool {
        self.api.is_some() || self.mode.is_some()
    }

    /// Copy of this spec with a different process shape.
    pub fn with_shape(
        &self,
        nprocs: u32,
        ppn: Option<u32>,
    ) -> Result<SpawnSpec> {
        let mut spec = self.clone();
        spec.nprocs = nprocs;
        spec.ppn = ppn;
        spec.validate()?;
        Ok(spec)
    }

    /// Copy of this spec sending output to `path` instead.
    pub fn with_redirect(&self, path: &Path) -> SpawnSpec {
        let mut spec = self.clone();
        spec.redirect = Some(path.to_path_buf());
        spec
    }
}

/// Build the layered environment for one spec.  Later layers override
/// earlier ones on key collision.  The output depends only on the
/// arguments.
pub fn compose_env(
    cfg: &DriverConfig,
    api: Option<InterceptApi>,
    mode: Option<AdapterMode>,
    conf: Option<&str>,
    hostfile: Option<&Path>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    // Baseline search paths, captured once at startup.
    env.insert("PATH".to_string(), cfg.search_path.clone());
    env.insert(
        "LD_LIBRARY_PATH".to_string(),
        cfg.lib_search_path.clone(),
    );

    let service = api.is_some() || mode.is_some();
    if service {
        let conf = conf.unwrap_or("strata_server");
        let server_conf = cfg.conf_dir.join(format!("{}.yaml", conf));
        env.insert("STRATA_CONF".to_string(), path_str(&server_conf));
        env.insert(
            "STRATA_CLIENT_CONF".to_string(),
            path_str(&cfg.conf_dir.join("strata_client.yaml")),
        );
        env.insert("STRATA_TRAIT_PATH".to_string(), path_str(&cfg.bin_dir));
        env.insert(
            "STRATA_LOG_OUT".to_string(),
            path_str(&cfg.cache_dir.join("strata_client.log")),
        );
        if let Some(hostfile) = hostfile {
            env.insert("STRATA_HOSTFILE".to_string(), path_str(hostfile));
        }
    }

    match api {
        Some(InterceptApi::Hdf5) => {
            // HDF5 loads the service as a virtual file driver plugin,
            // there is nothing to preload.
            env.insert("HDF5_PLUGIN_PATH".to_string(), path_str(&cfg.bin_dir));
            env.insert("HDF5_DRIVER".to_string(), "strata".to_string());
        }
        Some(api) => {
            let lib = cfg.bin_dir.join(format!("libstrata_{}.so", api));
            env.insert("LD_PRELOAD".to_string(), path_str(&lib));
        }
        None => {}
    }

    if let Some(mode) = mode {
        env.insert("STRATA_ADAPTER_MODE".to_string(), mode.to_string());
    }

    env
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_cfg() -> DriverConfig {
        DriverConfig {
            bin_dir: PathBuf::from("/opt/strata/bin"),
            conf_dir: PathBuf::from("/opt/strata/conf"),
            cache_dir: PathBuf::from("/tmp/sbd"),
            devices: BTreeMap::new(),
            hostfile: None,
            warmup_secs: 0,
            cleanup: true,
            quiet: true,
            search_path: "/usr/bin:/bin".to_string(),
            lib_search_path: "/usr/lib".to_string(),
        }
    }

    fn plain_spec(nprocs: u32, ppn: Option<u32>) -> Result<SpawnSpec> {
        SpawnSpec::new(
            nprocs,
            ppn,
            None,
            BTreeMap::new(),
            None,
            None,
            None,
        )
    }

    fn partition(count: usize) -> Arc<HostPartition> {
        Arc::new(HostPartition {
            hosts: (0..count).map(|i| format!("n{}", i)).collect(),
            hostfile: PathBuf::from("/tmp/sbd/hosts-test.txt"),
        })
    }

    #[test]
    fn compose_is_deterministic() {
        let cfg = test_cfg();
        let a = compose_env(
            &cfg,
            Some(InterceptApi::Posix),
            Some(AdapterMode::Scratch),
            Some("strata_server_ssd"),
            None,
        );
        let b = compose_env(
            &cfg,
            Some(InterceptApi::Posix),
            Some(AdapterMode::Scratch),
            Some("strata_server_ssd"),
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn no_tags_means_no_service_keys() {
        let cfg = test_cfg();
        let env = compose_env(&cfg, None, None, None, None);
        assert_eq!(env.get("PATH").unwrap(), "/usr/bin:/bin");
        assert_eq!(env.get("LD_LIBRARY_PATH").unwrap(), "/usr/lib");
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn mode_alone_enables_service_vars() {
        let cfg = test_cfg();
        let env =
            compose_env(&cfg, None, Some(AdapterMode::Bypass), None, None);
        assert_eq!(
            env.get("STRATA_CONF").unwrap(),
            "/opt/strata/conf/strata_server.yaml"
        );
        assert_eq!(
            env.get("STRATA_CLIENT_CONF").unwrap(),
            "/opt/strata/conf/strata_client.yaml"
        );
        assert_eq!(env.get("STRATA_ADAPTER_MODE").unwrap(), "bypass");
        assert!(!env.contains_key("LD_PRELOAD"));
    }

    #[test]
    fn api_alone_enables_service_vars() {
        let cfg = test_cfg();
        let env =
            compose_env(&cfg, Some(InterceptApi::Stdio), None, None, None);
        assert!(env.contains_key("STRATA_CONF"));
        assert!(env
            .get("LD_PRELOAD")
            .unwrap()
            .ends_with("libstrata_stdio.so"));
        assert!(!env.contains_key("STRATA_ADAPTER_MODE"));
    }

    #[test]
    fn posix_preload_library() {
        let cfg = test_cfg();
        let env =
            compose_env(&cfg, Some(InterceptApi::Posix), None, None, None);
        assert!(env
            .get("LD_PRELOAD")
            .unwrap()
            .ends_with("libstrata_posix.so"));
    }

    #[test]
    fn hdf5_uses_plugin_not_preload() {
        let cfg = test_cfg();
        let env =
            compose_env(&cfg, Some(InterceptApi::Hdf5), None, None, None);
        assert_eq!(env.get("HDF5_PLUGIN_PATH").unwrap(), "/opt/strata/bin");
        assert_eq!(env.get("HDF5_DRIVER").unwrap(), "strata");
        assert!(!env.contains_key("LD_PRELOAD"));
    }

    #[test]
    fn named_conf_resolves_under_conf_dir() {
        let cfg = test_cfg();
        let env = compose_env(
            &cfg,
            None,
            Some(AdapterMode::Default),
            Some("strata_server_ssd_nvme_ram"),
            None,
        );
        assert_eq!(
            env.get("STRATA_CONF").unwrap(),
            "/opt/strata/conf/strata_server_ssd_nvme_ram.yaml"
        );
    }

    #[test]
    fn hostfile_lands_in_service_layer() {
        let cfg = test_cfg();
        let env = compose_env(
            &cfg,
            None,
            Some(AdapterMode::Default),
            None,
            Some(Path::new("/tmp/sbd/hosts-4.txt")),
        );
        assert_eq!(
            env.get("STRATA_HOSTFILE").unwrap(),
            "/tmp/sbd/hosts-4.txt"
        );

        // Without a service there is no hostfile variable either.
        let env = compose_env(
            &cfg,
            None,
            None,
            None,
            Some(Path::new("/tmp/sbd/hosts-4.txt")),
        );
        assert!(!env.contains_key("STRATA_HOSTFILE"));
    }

    #[test]
    fn shape_validation() {
        assert!(plain_spec(0, None).is_err());
        assert!(plain_spec(1, None).is_ok());
        assert!(plain_spec(4, Some(5)).is_err());
        assert!(plain_spec(4, Some(0)).is_err());
        assert!(plain_spec(4, Some(4)).is_ok());

        let spec = SpawnSpec::new(
            8,
            Some(4),
            Some(partition(2)),
            BTreeMap::new(),
            None,
            None,
            None,
        );
        assert!(spec.is_ok());

        let spec = SpawnSpec::new(
            8,
            Some(4),
            Some(partition(3)),
            BTreeMap::new(),
            None,
            None,
            None,
        );
        assert!(spec.is_err());
    }

    #[test]
    fn with_shape_leaves_source_alone() {
        let spec = plain_spec(8, Some(8)).unwrap();
        let narrow = spec.with_shape(1, None).unwrap();
        assert_eq!(spec.nprocs, 8);
        assert_eq!(spec.ppn, Some(8));
        assert_eq!(narrow.nprocs, 1);
        assert_eq!(narrow.ppn, None);

        assert!(spec.with_shape(0, None).is_err());
    }

    #[test]
    fn with_redirect_leaves_source_alone() {
        let spec = plain_spec(1, None).unwrap();
        let redirected = spec.with_redirect(Path::new("/tmp/out.log"));
        assert!(spec.redirect.is_none());
        assert_eq!(
            redirected.redirect,
            Some(PathBuf::from("/tmp/out.log"))
        );
    }

    #[test]
    fn service_detection() {
        let spec = plain_spec(1, None).unwrap();
        assert!(!spec.uses_service());

        let api_only = SpawnSpec::new(
            1,
            None,
            None,
            BTreeMap::new(),
            None,
            Some(InterceptApi::Posix),
            None,
        )
        .unwrap();
        assert!(api_only.uses_service());

        let mode_only = SpawnSpec::new(
            1,
            None,
            None,
            BTreeMap::new(),
            None,
            None,
            Some(AdapterMode::Scratch),
        )
        .unwrap();
        assert!(mode_only.uses_service());
    }
}
