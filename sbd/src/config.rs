// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use strata_bench_common::BenchError;

use crate::Args;

const DEFAULT_BIN_DIR: &str = "/opt/strata/bin";
const DEFAULT_CONF_DIR: &str = "/opt/strata/conf";
const DEFAULT_CACHE_DIR: &str = "/tmp/sbd";
const DEFAULT_WARMUP_SECS: u64 = 3;

/// A machine profile, read from a TOML file.  Everything is optional;
/// missing fields fall back to the built-in defaults and command line
/// flags override both.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub bin_dir: Option<PathBuf>,
    pub conf_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub hostfile: Option<PathBuf>,
    pub devices: Option<BTreeMap<String, PathBuf>>,
    pub warmup_secs: Option<u64>,
    pub cleanup: Option<bool>,
}

/// Fully resolved configuration for one driver invocation.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Directory holding the strata binaries and interception
    /// libraries.
    pub bin_dir: PathBuf,
    /// Directory holding the server and client YAML config files.
    pub conf_dir: PathBuf,
    /// Where hostfiles, daemon logs, and redirected benchmark output
    /// land.
    pub cache_dir: PathBuf,
    /// Device tier name to mount path.
    pub devices: BTreeMap<String, PathBuf>,
    /// Present on cluster machines, absent for purely local runs.
    pub hostfile: Option<PathBuf>,
    /// How long to wait after launching the daemon before using it.
    pub warmup_secs: u64,
    /// Remove device contents after every scenario.
    pub cleanup: bool,
    pub quiet: bool,
    /// Search paths captured once at startup so every composed
    /// environment sees the same values.
    pub search_path: String,
    pub lib_search_path: String,
}

impl DriverConfig {
    pub fn new(args: &Args) -> Result<DriverConfig> {
        let profile = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read profile {:?}", path))?;
                toml::from_str(&text)
                    .with_context(|| format!("parse profile {:?}", path))?
            }
            None => Profile::default(),
        };

        let mut devices = profile.devices.unwrap_or_else(default_devices);
        for entry in &args.device {
            let (name, path) = parse_device(entry)?;
            devices.insert(name, path);
        }

        Ok(DriverConfig {
            bin_dir: args
                .bin_dir
                .clone()
                .or(profile.bin_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BIN_DIR)),
            conf_dir: args
                .conf_dir
                .clone()
                .or(profile.conf_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONF_DIR)),
            cache_dir: args
                .cache_dir
                .clone()
                .or(profile.cache_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            devices,
            hostfile: args.hostfile.clone().or(profile.hostfile),
            warmup_secs: args
                .warmup
                .or(profile.warmup_secs)
                .unwrap_or(DEFAULT_WARMUP_SECS),
            cleanup: if args.keep_files {
                false
            } else {
                profile.cleanup.unwrap_or(true)
            },
            quiet: args.quiet,
            search_path: std::env::var("PATH").unwrap_or_default(),
            lib_search_path: std::env::var("LD_LIBRARY_PATH")
                .unwrap_or_default(),
        })
    }

    /// Mount path for a named device tier.
    pub fn device(&self, name: &str) -> Result<&Path, BenchError> {
        self.devices
            .get(name)
            .map(PathBuf::as_path)
            .ok_or_else(|| BenchError::UnknownDevice(name.to_string()))
    }

    /// The daemon's combined stdout/stderr capture file.
    pub fn daemon_log(&self) -> PathBuf {
        self.cache_dir.join("strata_daemon.log")
    }
}

fn default_devices() -> BTreeMap<String, PathBuf> {
    let mut devices = BTreeMap::new();
    devices.insert("ssd".to_string(), PathBuf::from("/tmp/strata-bench/ssd"));
    devices
        .insert("nvme".to_string(), PathBuf::from("/tmp/strata-bench/nvme"));
    devices
}

fn parse_device(text: &str) -> Result<(String, PathBuf)> {
    match text.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => bail!("device must be NAME=PATH, not {:?}", text),
    }
}
