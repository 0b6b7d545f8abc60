//! Shared fixtures: a loopback server and clients logged in to it

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use warp_nvmeof::target::{MemoryTarget, SleepyTarget, TestableTarget, WorkQueue};
use warp_nvmeof::{
    Client, ClientConfig, NvmeOfConfig, Registry, Server, Subsystem, Target, TargetSubsystem,
};

pub const TESTABLE_NQN: &str = "nqn.test:testable";
pub const MEMORY_NQN: &str = "nqn.test:mem";
pub const SLEEPY_NQN: &str = "nqn.test:sleepy";

/// Bind a server on 127.0.0.1 with an ephemeral port and start serving
pub async fn start_server(subsystems: Vec<Arc<dyn Subsystem>>) -> Server {
    let config = NvmeOfConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        drain_timeout_ms: 2_000,
        ..Default::default()
    };
    let server = Server::bind(config, Registry::new()).await.unwrap();
    for subsystem in subsystems {
        server.add_subsystem(subsystem).unwrap();
    }
    server.serve().unwrap();
    server
}

pub async fn subsystem(nqn: &str, target: Arc<dyn Target>) -> Arc<dyn Subsystem> {
    target.start().await.unwrap();
    Arc::new(TargetSubsystem::new(nqn, target).unwrap())
}

/// 8 MiB fault injecting device without delay
pub async fn testable() -> Arc<dyn Subsystem> {
    subsystem(
        TESTABLE_NQN,
        Arc::new(TestableTarget::new(8 << 20, Duration::ZERO)),
    )
    .await
}

pub async fn memory() -> Arc<dyn Subsystem> {
    subsystem(MEMORY_NQN, Arc::new(MemoryTarget::new(8 << 20))).await
}

/// Null device sleeping `delay` per request behind a work queue
pub async fn sleepy(delay: Duration) -> Arc<dyn Subsystem> {
    let target = Arc::new(WorkQueue::new(Arc::new(SleepyTarget::new(delay))));
    subsystem(SLEEPY_NQN, target).await
}

pub async fn login(server: &Server, nqn: &str) -> Client {
    login_with(server, nqn, ClientConfig::default()).await
}

pub async fn login_with(server: &Server, nqn: &str, config: ClientConfig) -> Client {
    let mut client = Client::connect(server.local_addr(), nqn, config).unwrap();
    client.login().await.unwrap();
    client
}

/// Initialize test logging once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
