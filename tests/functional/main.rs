// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! Functional tests for the Lotus controller
//!
//! Each scenario drives `sync` against an in-memory cluster, standing in
//! for the job controller by setting Job completion counts between steps.

#[path = "../common/mod.rs"]
mod common;

mod lifecycle;

use std::sync::atomic::Ordering;

use common::*;
use lotus_operator::controller::sync;
use lotus_operator::crd::{Lotus, LotusPhase};
use lotus_operator::{Context, ControllerSettings};
use tempfile::NamedTempFile;

pub const KEY: &str = "load/load-001";

/// A controller context over a fresh fake cluster, plus the config file it
/// reads (kept alive for the duration of the test)
pub struct Harness {
    pub ctx: Context<FakeCluster>,
    _config: NamedTempFile,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SAMPLE_CONFIG)
    }

    pub fn with_config(yaml: &str) -> Self {
        let config = write_config_file(yaml);
        let settings = test_settings(&config);
        Self::with_settings(settings, config)
    }

    pub fn with_settings(settings: ControllerSettings, config: NamedTempFile) -> Self {
        let cluster = FakeCluster::new();
        let lister = cluster.lister();
        Self {
            ctx: Context::new(cluster, lister, settings, None),
            _config: config,
        }
    }

    pub fn cluster(&self) -> &FakeCluster {
        &self.ctx.client
    }

    pub fn insert(&self, lotus: &Lotus) {
        self.cluster().insert_lotus(lotus);
    }

    /// Run one sync and return the live phase afterwards
    pub async fn step(&self, key: &str) -> LotusPhase {
        sync(&self.ctx, key).await.expect("sync failed");
        let (ns, name) = key.split_once('/').unwrap();
        self.cluster().phase(ns, name)
    }

    pub fn creates(&self) -> usize {
        self.cluster().creates.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> usize {
        self.cluster().status_writes.load(Ordering::SeqCst)
    }
}
