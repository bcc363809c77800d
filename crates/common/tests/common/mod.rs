//! Shared setup for multi-peer integration tests
#![allow(dead_code)]

use std::time::Duration;

use ::common::file::ContentAddress;
use ::common::identity::Identity;
use ::common::testkit::TestNetwork;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

/// A network with the named peers connected in order
pub async fn network_with(names: &[&str]) -> TestNetwork {
    init_tracing();
    let mut net = TestNetwork::new();
    for name in names {
        net.add_peer(*name).await.unwrap();
    }
    net
}

/// Where `holder` keeps its shard of `file_name`
pub fn address_for(file_name: &str, holder: &str) -> ContentAddress {
    ContentAddress::derive(file_name, &Identity::from_credentials(holder, "password"))
}

/// Wait until `holder` has received its part of `file_name`
pub async fn wait_for_part(net: &TestNetwork, holder: &str, file_name: &str) {
    let address = address_for(file_name, holder);
    net.eventually(EVENT_TIMEOUT, || async {
        Ok(net.peer(holder).map(|p| p.holds(&address)).unwrap_or(false))
    })
    .await
    .unwrap();
}
