// Copyright 2025 Oxide Computer Company

use anyhow::Result;
use byte_unit::Byte;
use slog::info;

use strata_bench_common::bytes_from_str;

use crate::driver::Driver;
use crate::exec::{run_checked, CommandSpec};
use crate::spawn::{InterceptApi, SpawnSpec};

const API_BENCH_BIN: &str = "api_bench";
const MEMCPY_BIN: &str = "memcpy_bench";
const IOR_BIN: &str = "ior";

/// The native API workloads `api_bench` understands.  All sizes are
/// byte counts; human-readable literals are converted before they get
/// here.
#[derive(Debug, Clone, Copy)]
pub enum ApiWorkload {
    PutGet { xfer: u64, count: u64 },
    CreateBucket { count: u64 },
    GetBucket { count: u64 },
    DeleteBucket { repeat: u64, count: u64 },
    DeleteBlobs { count: u64 },
    CreateBlobOneBucket { count: u64 },
    CreateBlobPerBucket { count: u64 },
}

impl ApiWorkload {
    fn subcommand(&self) -> &'static str {
        match self {
            ApiWorkload::PutGet { .. } => "putget",
            ApiWorkload::CreateBucket { .. } => "create_bkt",
            ApiWorkload::GetBucket { .. } => "get_bkt",
            ApiWorkload::DeleteBucket { .. } => "del_bkt",
            ApiWorkload::DeleteBlobs { .. } => "del_blobs",
            ApiWorkload::CreateBlobOneBucket { .. } => "create_blob_1bkt",
            ApiWorkload::CreateBlobPerBucket { .. } => "create_blob_nbkt",
        }
    }

    fn args(&self) -> Vec<String> {
        match *self {
            ApiWorkload::PutGet { xfer, count } => {
                vec![xfer.to_string(), count.to_string()]
            }
            ApiWorkload::CreateBucket { count }
            | ApiWorkload::GetBucket { count }
            | ApiWorkload::DeleteBlobs { count }
            | ApiWorkload::CreateBlobOneBucket { count }
            | ApiWorkload::CreateBlobPerBucket { count } => {
                vec![count.to_string()]
            }
            ApiWorkload::DeleteBucket { repeat, count } => {
                vec![repeat.to_string(), count.to_string()]
            }
        }
    }
}

/// Which of ior's own I/O backends to drive.  Chosen separately from
/// the interception tag so plain baseline runs can still pick a
/// backend.
#[derive(Debug, Clone, Copy)]
pub enum IorBackend {
    Posix,
    Mpiio,
    Hdf5,
}

impl IorBackend {
    /// The backend matching an interception API.
    pub fn for_api(api: InterceptApi) -> IorBackend {
        match api {
            // The stdio shim still intercepts ior's POSIX calls.
            InterceptApi::Posix | InterceptApi::Stdio => IorBackend::Posix,
            InterceptApi::Mpiio => IorBackend::Mpiio,
            InterceptApi::Hdf5 => IorBackend::Hdf5,
        }
    }

    fn flags(&self) -> Vec<String> {
        match self {
            IorBackend::Posix => {
                vec![
                    "-a".to_string(),
                    "POSIX".to_string(),
                    "-F".to_string(),
                ]
            }
            IorBackend::Mpiio => {
                vec!["-a".to_string(), "MPIIO".to_string()]
            }
            IorBackend::Hdf5 => vec!["-a".to_string(), "HDF5".to_string()],
        }
    }
}

/// Run one `api_bench` workload, bracketed by daemon start/stop when
/// the spec depends on the service.  A failing workload never skips
/// the daemon shutdown, and its error wins over a shutdown error.
pub async fn api_bench(
    d: &Driver,
    spec: &SpawnSpec,
    workload: ApiWorkload,
) -> Result<()> {
    let started = spec.uses_service();
    if started {
        d.start_daemon(spec).await?;
    }

    info!(d.log(), "api_bench {:?}", workload);
    let mut args = vec![workload.subcommand().to_string()];
    args.extend(workload.args());
    let cmd = d.workload_command(spec, API_BENCH_BIN, args);
    let run = run_checked(d.launcher(), &cmd).await;

    if started {
        let stopped = d.stop_daemon(spec).await;
        run?;
        stopped?;
    } else {
        run?;
    }
    Ok(())
}

/// A write-only ior workload against one device tier.
pub async fn ior_write(
    d: &Driver,
    spec: &SpawnSpec,
    xfer: &str,
    block_per_rank: &str,
    dev: &str,
    backend: Option<IorBackend>,
) -> Result<()> {
    ior_run(d, spec, &["-w"], xfer, block_per_rank, dev, backend).await
}

/// Write a dataset, then read it back.
pub async fn ior_write_read(
    d: &Driver,
    spec: &SpawnSpec,
    xfer: &str,
    block_per_rank: &str,
    dev: &str,
    backend: Option<IorBackend>,
) -> Result<()> {
    ior_run(d, spec, &["-w", "-r"], xfer, block_per_rank, dev, backend)
        .await
}

async fn ior_run(
    d: &Driver,
    spec: &SpawnSpec,
    ops: &[&str],
    xfer: &str,
    block_per_rank: &str,
    dev: &str,
    backend: Option<IorBackend>,
) -> Result<()> {
    let xfer = bytes_from_str(xfer)?;
    let block = bytes_from_str(block_per_rank)?;
    let data = d.config().device(dev)?.join("ior-data.bin");

    let started = spec.uses_service();
    if started {
        d.start_daemon(spec).await?;
    }

    info!(
        d.log(),
        "ior {} of {:#} blocks in {:#} transfers on {}",
        ops.join(" "),
        Byte::from_u64(block),
        Byte::from_u64(xfer),
        dev,
    );
    let mut args: Vec<String> =
        ops.iter().map(|op| op.to_string()).collect();
    args.extend([
        "-o".to_string(),
        data.display().to_string(),
        "-t".to_string(),
        xfer.to_string(),
        "-b".to_string(),
        block.to_string(),
        // Keep the dataset; scenario cleanup owns removal.
        "-k".to_string(),
    ]);
    if let Some(backend) = backend {
        args.extend(backend.flags());
    }
    let cmd = CommandSpec::from_spawn(spec, IOR_BIN, args);
    let run = run_checked(d.launcher(), &cmd).await;

    if started {
        let stopped = d.stop_daemon(spec).await;
        run?;
        stopped?;
    } else {
        run?;
    }
    Ok(())
}

/// Memory bandwidth/latency baseline.  Never touches the storage
/// service.
pub async fn memcpy_bench(
    d: &Driver,
    spec: &SpawnSpec,
    xfer: u64,
    count: u64,
) -> Result<()> {
    info!(
        d.log(),
        "memcpy {} transfers of {:#}",
        count,
        Byte::from_u64(xfer),
    );
    let cmd = d.workload_command(
        spec,
        MEMCPY_BIN,
        vec![xfer.to_string(), count.to_string()],
    );
    run_checked(d.launcher(), &cmd).await?;
    Ok(())
}
