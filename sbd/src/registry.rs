// Copyright 2025 Oxide Computer Company

use anyhow::Result;
use futures::future::BoxFuture;
use slog::info;

use strata_bench_common::BenchError;

use crate::driver::Driver;

/// A registered scenario body.  Scenarios borrow the driver for their
/// whole run.
pub type ScenarioFn = for<'a> fn(&'a Driver) -> BoxFuture<'a, Result<()>>;

/// Name to scenario table, searched and listed in registration order.
#[derive(Default)]
pub struct Registry {
    entries: Vec<(String, ScenarioFn)>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Add a scenario under a unique name.  Names are fixed at build
    /// time, so a collision is a programming error.
    pub fn register(&mut self, name: &str, f: ScenarioFn) {
        if self.entries.iter().any(|(n, _)| n == name) {
            panic!("scenario {:?} registered twice", name);
        }
        self.entries.push((name.to_string(), f));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Run one scenario by name.  Devices are prepared before the run
    /// and cleared afterwards when the config asks for it; a scenario
    /// error always wins over a cleanup error.
    pub async fn dispatch(&self, d: &Driver, name: &str) -> Result<()> {
        let name = name.trim();
        let Some((_, f)) = self.entries.iter().find(|(n, _)| n == name)
        else {
            println!("{} was not found. Available scenarios:", name);
            for (i, n) in self.names().enumerate() {
                println!("{}: {}", i, n);
            }
            return Err(BenchError::UnknownScenario(name.to_string()).into());
        };

        info!(d.log(), "running scenario {}", name);
        d.prepare_devices().await?;
        let result = f(d).await;
        if d.config().cleanup {
            let cleanup = d.cleanup_devices();
            result?;
            cleanup?;
        } else {
            result?;
        }
        info!(d.log(), "scenario {} done", name);
        Ok(())
    }
}
