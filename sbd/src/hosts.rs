// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use slog::{info, Logger};

use strata_bench_common::{BenchError, Result};

/// Where the master host list comes from.  There are exactly two
/// kinds of machine: a bare workstation with no host list, and a
/// cluster described by a hostfile with one hostname per line.
pub trait HostSource: Send + Sync {
    fn master_hosts(&self) -> Result<Vec<String>>;
}

pub struct LocalHosts;

impl HostSource for LocalHosts {
    fn master_hosts(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

pub struct HostfileSource {
    path: PathBuf,
}

impl HostfileSource {
    pub fn new(path: PathBuf) -> HostfileSource {
        HostfileSource { path }
    }
}

impl HostSource for HostfileSource {
    fn master_hosts(&self) -> Result<Vec<String>> {
        let text = fs::read_to_string(&self.path)?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// A stable prefix of the master host list, together with its on-disk
/// hostfile rendering for launchers that want a file.
#[derive(Debug, PartialEq, Eq)]
pub struct HostPartition {
    pub hosts: Vec<String>,
    pub hostfile: PathBuf,
}

impl HostPartition {
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Hands out host prefixes of a fixed master list.  Partitions are
/// memoized by size: asking for the same count again returns the same
/// partition and does not rewrite the hostfile artifact.
pub struct HostPartitioner {
    master: Vec<String>,
    cache_dir: PathBuf,
    cache: Mutex<BTreeMap<usize, Arc<HostPartition>>>,
    log: Logger,
}

impl HostPartitioner {
    pub fn new(
        source: &dyn HostSource,
        cache_dir: &Path,
        log: Logger,
    ) -> Result<HostPartitioner> {
        let master = source.master_hosts()?;
        fs::create_dir_all(cache_dir)?;
        Ok(HostPartitioner {
            master,
            cache_dir: cache_dir.to_path_buf(),
            cache: Mutex::new(BTreeMap::new()),
            log,
        })
    }

    /// How many hosts the master list holds.  Zero on a machine with
    /// no host list.
    pub fn available(&self) -> usize {
        self.master.len()
    }

    /// The first `count` hosts of the master list.  Growing counts
    /// always produce supersets, so scale sweeps reuse the same
    /// machines.
    pub fn subset(&self, count: usize) -> Result<Arc<HostPartition>> {
        if count > self.master.len() {
            return Err(BenchError::InsufficientHosts {
                requested: count,
                available: self.master.len(),
            });
        }

        let mut cache = self.cache.lock().unwrap();
        if let Some(part) = cache.get(&count) {
            return Ok(Arc::clone(part));
        }

        let hosts = self.master[..count].to_vec();
        let hostfile = self.cache_dir.join(format!("hosts-{}.txt", count));
        let mut text = hosts.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(&hostfile, text)?;
        info!(self.log, "wrote {} host(s) to {:?}", count, hostfile);

        let part = Arc::new(HostPartition { hosts, hostfile });
        cache.insert(count, Arc::clone(&part));
        Ok(part)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn test_log() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn cluster(dir: &Path, hosts: &[&str]) -> HostPartitioner {
        let hostfile = dir.join("master.txt");
        let mut f = fs::File::create(&hostfile).unwrap();
        for h in hosts {
            writeln!(f, "{}", h).unwrap();
        }
        let source = HostfileSource::new(hostfile);
        HostPartitioner::new(&source, dir, test_log()).unwrap()
    }

    #[test]
    fn prefix_is_stable() {
        let dir = tempdir().unwrap();
        let part = cluster(dir.path(), &["n0", "n1", "n2", "n3"]);

        let two = part.subset(2).unwrap();
        let three = part.subset(3).unwrap();
        assert_eq!(two.hosts, vec!["n0", "n1"]);
        assert_eq!(three.hosts, vec!["n0", "n1", "n2"]);
        // Smaller subsets are prefixes of larger ones.
        assert_eq!(three.hosts[..2], two.hosts[..]);
    }

    #[test]
    fn subset_is_memoized() {
        let dir = tempdir().unwrap();
        let part = cluster(dir.path(), &["n0", "n1"]);

        let first = part.subset(2).unwrap();
        let stamp = fs::metadata(&first.hostfile).unwrap().modified().unwrap();
        let again = part.subset(2).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        let stamp2 =
            fs::metadata(&again.hostfile).unwrap().modified().unwrap();
        assert_eq!(stamp, stamp2);
    }

    #[test]
    fn hostfile_artifact_contents() {
        let dir = tempdir().unwrap();
        let part = cluster(dir.path(), &["n0", "n1", "n2"]);

        let two = part.subset(2).unwrap();
        let text = fs::read_to_string(&two.hostfile).unwrap();
        assert_eq!(text, "n0\nn1\n");
    }

    #[test]
    fn insufficient_hosts() {
        let dir = tempdir().unwrap();
        let part = cluster(dir.path(), &["n0", "n1"]);

        match part.subset(3) {
            Err(BenchError::InsufficientHosts {
                requested,
                available,
            }) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected insufficient hosts, got {:?}", other),
        }
    }

    #[test]
    fn empty_subset_is_fine() {
        let dir = tempdir().unwrap();
        let part = cluster(dir.path(), &["n0"]);

        let none = part.subset(0).unwrap();
        assert!(none.is_empty());
        assert_eq!(fs::read_to_string(&none.hostfile).unwrap(), "");
    }

    #[test]
    fn local_machine_has_no_hosts() {
        let dir = tempdir().unwrap();
        let part =
            HostPartitioner::new(&LocalHosts, dir.path(), test_log()).unwrap();
        assert_eq!(part.available(), 0);
        assert!(part.subset(0).unwrap().is_empty());
        assert!(part.subset(1).is_err());
    }

    #[test]
    fn hostfile_parsing_skips_blanks() {
        let dir = tempdir().unwrap();
        let hostfile = dir.path().join("master.txt");
        fs::write(&hostfile, "n0\n\n  n1  \n\nn2\n").unwrap();
        let source = HostfileSource::new(hostfile);
        assert_eq!(source.master_hosts().unwrap(), vec!["n0", "n1", "n2"]);
    }
}
