// Copyright 2025 Oxide Computer Company

//! The benchmark scenario table.  Bodies here only pick parameters and
//! call workload builders; everything process-shaped lives in the
//! driver and the builders.

use anyhow::Result;

use strata_bench_common::bytes_from_str;

use crate::driver::{Driver, SpawnRequest};
use crate::exec::{run_checked, CommandSpec};
use crate::registry::Registry;
use crate::spawn::{AdapterMode, InterceptApi, SpawnSpec};
use crate::workload::{self, ApiWorkload, IorBackend};

/// Server profile with all three tiers enabled.
const TIERED_CONF: &str = "strata_server_ssd_nvme_ram";

/// Upper bound on operations per sweep point, so the big transfer
/// sweeps finish in reasonable time.
const OP_CAP: u64 = 128_000;

pub fn build_registry() -> Registry {
    let mut reg = Registry::new();
    reg.register("echo", |d| Box::pin(echo(d)));
    reg.register("launch", |d| Box::pin(launch(d)));
    reg.register("put_get", |d| Box::pin(put_get(d)));
    reg.register("put_get_scale", |d| Box::pin(put_get_scale(d)));
    reg.register("create_bucket", |d| Box::pin(create_bucket(d)));
    reg.register("create_bucket_scale", |d| {
        Box::pin(create_bucket_scale(d))
    });
    reg.register("get_bucket", |d| Box::pin(get_bucket(d)));
    reg.register("delete_bucket", |d| Box::pin(delete_bucket(d)));
    reg.register("delete_blobs", |d| Box::pin(delete_blobs(d)));
    reg.register("create_blob_one_bucket", |d| {
        Box::pin(create_blob_one_bucket(d))
    });
    reg.register("create_blob_per_bucket", |d| {
        Box::pin(create_blob_per_bucket(d))
    });
    reg.register("mem_bw", |d| Box::pin(mem_bw(d)));
    reg.register("mem_latency", |d| Box::pin(mem_latency(d)));
    reg.register("ior_backends", |d| Box::pin(ior_backends(d)));
    reg.register("ior_write", |d| Box::pin(ior_write(d)));
    reg.register("ior_write_scale", |d| Box::pin(ior_write_scale(d)));
    reg.register("ior_write_read", |d| Box::pin(ior_write_read(d)));
    reg.register("strata_ior_write", |d| Box::pin(strata_ior_write(d)));
    reg.register("strata_ior_write_read", |d| {
        Box::pin(strata_ior_write_read(d))
    });
    reg
}

/// A single-node spec that pulls in the storage service with the
/// default server profile.
fn service_spec(d: &Driver, nprocs: u32) -> Result<SpawnSpec> {
    d.spawn_spec(SpawnRequest {
        nprocs,
        mode: Some(AdapterMode::Default),
        ..Default::default()
    })
}

/// Fixed total work split across a growing rank count.
async fn halving_sweep(
    d: &Driver,
    make: fn(u64) -> ApiWorkload,
) -> Result<()> {
    for nprocs in [1u32, 2, 4, 8] {
        let count = OP_CAP / u64::from(nprocs);
        let spec = service_spec(d, nprocs)?;
        workload::api_bench(d, &spec, make(count)).await?;
    }
    Ok(())
}

/// Single rank, operation count doubling from 20k to 1280k.
async fn doubling_sweep(
    d: &Driver,
    make: fn(u64) -> ApiWorkload,
) -> Result<()> {
    let mut count = 20_000u64;
    while count <= 1_280_000 {
        let spec = service_spec(d, 1)?;
        workload::api_bench(d, &spec, make(count)).await?;
        count *= 2;
    }
    Ok(())
}

/// Smoke test: run `echo 5` across every node, no service involved.
async fn echo(d: &Driver) -> Result<()> {
    let spec = d.all_nodes_spec()?;
    let cmd =
        CommandSpec::from_spawn(&spec, "echo", vec!["5".to_string()]);
    run_checked(d.launcher(), &cmd).await?;
    Ok(())
}

/// Bring the daemon up on every node and shut it down again, with no
/// workload in between.
async fn launch(d: &Driver) -> Result<()> {
    let nodes = d.hosts().available();
    let spec = d.spawn_spec(SpawnRequest {
        nprocs: nodes.max(1) as u32,
        ppn: if nodes > 0 { Some(1) } else { None },
        nodes: if nodes > 0 { Some(nodes) } else { None },
        mode: Some(AdapterMode::Default),
        ..Default::default()
    })?;
    d.start_daemon(&spec).await?;
    d.stop_daemon(&spec).await?;
    Ok(())
}

async fn put_get(d: &Driver) -> Result<()> {
    let nprocs = 12u32;
    let total: u64 = 20 << 30;
    for xfer in ["4k", "1m"] {
        let xfer_bytes = bytes_from_str(xfer)?;
        let mut count = total / u64::from(nprocs) / xfer_bytes;
        if count * u64::from(nprocs) > OP_CAP {
            count = OP_CAP / u64::from(nprocs);
        }
        let spec = d.spawn_spec(SpawnRequest {
            nprocs,
            mode: Some(AdapterMode::Default),
            conf: Some(TIERED_CONF.to_string()),
            ..Default::default()
        })?;
        let work = ApiWorkload::PutGet {
            xfer: xfer_bytes,
            count,
        };
        workload::api_bench(d, &spec, work).await?;
    }
    Ok(())
}

async fn put_get_scale(d: &Driver) -> Result<()> {
    let ppn = 12u32;
    let total: u64 = 40 << 30;
    let xfer_bytes = bytes_from_str("1m")?;
    for nodes in [1usize, 2, 4] {
        let nprocs = ppn * nodes as u32;
        let mut count = total / u64::from(nprocs) / xfer_bytes;
        if count * u64::from(nprocs) > OP_CAP {
            count = OP_CAP / u64::from(nprocs);
        }
        let redirect = d
            .config()
            .cache_dir
            .join(format!("put_get_{}node.log", nodes));
        let spec = d.spawn_spec(SpawnRequest {
            nprocs,
            ppn: Some(ppn),
            nodes: Some(nodes),
            mode: Some(AdapterMode::Default),
            conf: Some(TIERED_CONF.to_string()),
            redirect: Some(redirect),
            ..Default::default()
        })?;
        let work = ApiWorkload::PutGet {
            xfer: xfer_bytes,
            count,
        };
        workload::api_bench(d, &spec, work).await?;
    }
    Ok(())
}

async fn create_bucket(d: &Driver) -> Result<()> {
    doubling_sweep(d, |count| ApiWorkload::CreateBucket { count }).await
}

async fn create_bucket_scale(d: &Driver) -> Result<()> {
    halving_sweep(d, |count| ApiWorkload::CreateBucket { count }).await
}

async fn get_bucket(d: &Driver) -> Result<()> {
    doubling_sweep(d, |count| ApiWorkload::GetBucket { count }).await
}

async fn delete_bucket(d: &Driver) -> Result<()> {
    halving_sweep(d, |count| ApiWorkload::DeleteBucket {
        repeat: 1,
        count,
    })
    .await
}

async fn delete_blobs(d: &Driver) -> Result<()> {
    halving_sweep(d, |count| ApiWorkload::DeleteBlobs { count }).await
}

async fn create_blob_one_bucket(d: &Driver) -> Result<()> {
    halving_sweep(d, |count| ApiWorkload::CreateBlobOneBucket { count })
        .await
}

async fn create_blob_per_bucket(d: &Driver) -> Result<()> {
    halving_sweep(d, |count| ApiWorkload::CreateBlobPerBucket { count })
        .await
}

/// Raw memcpy bandwidth, 16 GiB total split across the rank count.
async fn mem_bw(d: &Driver) -> Result<()> {
    let xfer = bytes_from_str("1m")?;
    let total = bytes_from_str("16g")?;
    for nprocs in [1u32, 2, 4, 8] {
        let count = total / xfer / u64::from(nprocs);
        let spec = d.spawn_spec(SpawnRequest {
            nprocs,
            ..Default::default()
        })?;
        workload::memcpy_bench(d, &spec, xfer, count).await?;
    }
    Ok(())
}

/// Small-transfer latency, 1 GiB total at 4k per copy.
async fn mem_latency(d: &Driver) -> Result<()> {
    let xfer = bytes_from_str("4k")?;
    let total = bytes_from_str("1g")?;
    for nprocs in [1u32, 2, 4, 8] {
        let count = total / xfer / u64::from(nprocs);
        let spec = d.spawn_spec(SpawnRequest {
            nprocs,
            ..Default::default()
        })?;
        workload::memcpy_bench(d, &spec, xfer, count).await?;
    }
    Ok(())
}

/// One small write through each of ior's own backends.  No service
/// tags, so the daemon never comes up and nothing is intercepted.
async fn ior_backends(d: &Driver) -> Result<()> {
    let backends =
        [IorBackend::Posix, IorBackend::Mpiio, IorBackend::Hdf5];
    for backend in backends {
        let spec = d.spawn_spec(SpawnRequest {
            nprocs: 1,
            ..Default::default()
        })?;
        workload::ior_write(d, &spec, "1m", "1g", "nvme", Some(backend))
            .await?;
    }
    Ok(())
}

/// Baseline ior write with no interception.
async fn ior_write(d: &Driver) -> Result<()> {
    let spec = d.spawn_spec(SpawnRequest {
        nprocs: 8,
        ..Default::default()
    })?;
    workload::ior_write(
        d,
        &spec,
        "1m",
        "4g",
        "nvme",
        Some(IorBackend::Posix),
    )
    .await
}

async fn ior_write_scale(d: &Driver) -> Result<()> {
    let ppn = 4u32;
    for nodes in [1usize, 2, 4] {
        let spec = d.spawn_spec(SpawnRequest {
            nprocs: ppn * nodes as u32,
            ppn: Some(ppn),
            nodes: Some(nodes),
            ..Default::default()
        })?;
        workload::ior_write(
            d,
            &spec,
            "1m",
            "4g",
            "nvme",
            Some(IorBackend::Posix),
        )
        .await?;
    }
    Ok(())
}

async fn ior_write_read(d: &Driver) -> Result<()> {
    let spec = d.spawn_spec(SpawnRequest {
        nprocs: 1,
        ..Default::default()
    })?;
    workload::ior_write_read(
        d,
        &spec,
        "1m",
        "1g",
        "nvme",
        Some(IorBackend::Posix),
    )
    .await
}

/// ior through each interception API in scratch mode.
async fn strata_ior_write(d: &Driver) -> Result<()> {
    let apis =
        [InterceptApi::Posix, InterceptApi::Mpiio, InterceptApi::Hdf5];
    for api in apis {
        let spec = d.spawn_spec(SpawnRequest {
            nprocs: 8,
            api: Some(api),
            mode: Some(AdapterMode::Scratch),
            ..Default::default()
        })?;
        workload::ior_write(
            d,
            &spec,
            "1m",
            "4g",
            "nvme",
            Some(IorBackend::for_api(api)),
        )
        .await?;
    }
    Ok(())
}

async fn strata_ior_write_read(d: &Driver) -> Result<()> {
    let api = InterceptApi::Posix;
    let spec = d.spawn_spec(SpawnRequest {
        nprocs: 8,
        api: Some(api),
        mode: Some(AdapterMode::Scratch),
        ..Default::default()
    })?;
    workload::ior_write_read(
        d,
        &spec,
        "1m",
        "2g",
        "nvme",
        Some(IorBackend::for_api(api)),
    )
    .await
}
