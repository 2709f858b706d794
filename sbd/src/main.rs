// Copyright 2026 Oxide Computer Company

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use slog::o;
use tokio::runtime::Builder;

use strata_bench_common::build_logger;

mod config;
mod daemon;
mod driver;
mod exec;
mod hosts;
mod registry;
mod scenarios;
mod spawn;
mod workload;

use config::DriverConfig;
use driver::Driver;
use exec::ShellLauncher;

#[derive(Debug, Parser)]
#[clap(name = "sbd", term_width = 80)]
#[clap(about = "Strata benchmark driver", long_about = None)]
pub struct Args {
    /// Directory holding the strata binaries and interception
    /// libraries.
    #[clap(long, value_name = "DIR", action)]
    bin_dir: Option<PathBuf>,

    /// Where hostfile artifacts and captured logs land.
    #[clap(long, value_name = "DIR", action)]
    cache_dir: Option<PathBuf>,

    /// Directory holding the server and client YAML config files.
    #[clap(long, value_name = "DIR", action)]
    conf_dir: Option<PathBuf>,

    /// Machine profile TOML file.
    #[clap(long, value_name = "FILE", action)]
    config: Option<PathBuf>,

    /// Map a device tier, as NAME=PATH.  May be given more than once.
    #[clap(long, value_name = "NAME=PATH", action)]
    device: Vec<String>,

    /// Master host list with one hostname per line.
    #[clap(long, value_name = "FILE", action)]
    hostfile: Option<PathBuf>,

    /// Leave benchmark files on the devices when the scenario ends.
    #[clap(long, action)]
    keep_files: bool,

    /// Only log warnings and errors.
    #[clap(long, action)]
    quiet: bool,

    /// Seconds to wait for the daemon to settle after launching it.
    #[clap(long, value_name = "SECS", action)]
    warmup: Option<u64>,

    /// Name of the scenario to run.
    #[clap(action)]
    scenario: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = DriverConfig::new(&args)?;
    let log = build_logger(cfg.quiet);

    let runtime = Builder::new_multi_thread()
        .worker_threads(8)
        .thread_name("sbd")
        .enable_all()
        .build()
        .unwrap();

    let launcher = Arc::new(ShellLauncher::new(
        log.new(o!("component" => "launcher")),
    ));
    let driver = Driver::new(cfg, launcher, log)?;
    let registry = scenarios::build_registry();

    runtime.block_on(registry.dispatch(&driver, &args.scenario))
}
