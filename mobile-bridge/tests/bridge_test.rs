//! Tests for the synchronous bridge.
//!
//! Nodes run on the constrained feature set with no bootstrap peers and no
//! local discovery, and serve on ephemeral loopback ports.

use mobile_bridge::{BridgeStage, MobileIpfs, MobileOptions};
use mobile_node::{NetDriver, NetInterface};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct NoInterfaces;

impl NetDriver for NoInterfaces {
    fn interfaces(&self) -> anyhow::Result<Vec<NetInterface>> {
        anyhow::bail!("enumeration not permitted")
    }
}

/// The socket manager is process-wide, so every test shares one cache dir
/// that outlives the individual temp dirs.
fn cache_dir() -> PathBuf {
    std::env::temp_dir().join(format!("mb-{}", std::process::id()))
}

fn create_bridge() -> (MobileIpfs, TempDir) {
    mobile_bridge::logging::init("warn");
    let base = TempDir::new().unwrap();
    let ipfs = MobileIpfs::new(MobileOptions {
        base_dir: base.path().to_path_buf(),
        cache_dir: cache_dir(),
        net_driver: Some(Arc::new(NoInterfaces)),
        ..MobileOptions::default()
    })
    .unwrap();
    (ipfs, base)
}

fn offline(ipfs: &MobileIpfs) {
    ipfs.set_config_key("Bootstrap", json!([])).unwrap();
    ipfs.set_config_key("Discovery.MDNS.Enabled", json!(false))
        .unwrap();
    ipfs.set_config_key("Addresses.API", json!("/ip4/127.0.0.1/tcp/0"))
        .unwrap();
    ipfs.set_config_key("Addresses.Gateway", json!("/ip4/127.0.0.1/tcp/0"))
        .unwrap();
}

#[test]
fn test_new_initializes_repo() {
    let (ipfs, base) = create_bridge();
    assert!(ipfs.repo_absolute_path().starts_with(base.path()));
    assert!(ipfs.repo_absolute_path().join("config").is_file());
    assert!(!ipfs.is_started());

    let err = ipfs.stop().unwrap_err();
    assert_eq!(err.stage, BridgeStage::NodeStop);
    assert_eq!(err.detail, "Node not started yet");
}

#[test]
fn test_config_keys() {
    let (ipfs, _base) = create_bridge();

    assert_eq!(
        ipfs.get_config_key("Addresses.API").unwrap(),
        json!("/ip4/127.0.0.1/tcp/5001")
    );
    ipfs.set_config_key("Bootstrap", json!([])).unwrap();
    assert_eq!(ipfs.get_config_key("Bootstrap").unwrap(), json!([]));

    let err = ipfs.get_config_key("Addresses.Missing").unwrap_err();
    assert_eq!(err.stage, BridgeStage::ConfigGetting);

    let err = ipfs
        .set_config_key("Bootstrap", json!("not a list"))
        .unwrap_err();
    assert_eq!(err.stage, BridgeStage::ConfigSetting);
}

#[test]
fn test_set_config_none_resets_identity() {
    let (ipfs, _base) = create_bridge();
    let before = ipfs.get_config_key("Identity.PeerID").unwrap();

    let mut config = ipfs.get_config().unwrap();
    config["Bootstrap"] = json!([]);
    ipfs.set_config(Some(config)).unwrap();
    assert_eq!(ipfs.get_config_key("Identity.PeerID").unwrap(), before);

    ipfs.set_config(None).unwrap();
    assert_ne!(ipfs.get_config_key("Identity.PeerID").unwrap(), before);
}

#[test]
fn test_start_stop_restart() {
    let (ipfs, _base) = create_bridge();
    offline(&ipfs);

    ipfs.start().unwrap();
    assert!(ipfs.is_started());
    assert!(ipfs.api_socket_path().exists());

    let err = ipfs.start().unwrap_err();
    assert_eq!(err.stage, BridgeStage::NodeStart);
    assert_eq!(err.detail, "Node already started");

    let gateway = ipfs
        .serve_gateway_multiaddr("/ip4/127.0.0.1/tcp/0", false)
        .unwrap();
    assert!(gateway.starts_with("/ip4/127.0.0.1/tcp/"));

    ipfs.restart().unwrap();
    assert!(ipfs.is_started());

    ipfs.stop().unwrap();
    assert!(!ipfs.is_started());
    assert!(!ipfs.api_socket_path().exists());
}

#[test]
fn test_gateway_requires_started_node() {
    let (ipfs, _base) = create_bridge();
    let err = ipfs
        .serve_gateway_multiaddr("/ip4/127.0.0.1/tcp/0", false)
        .unwrap_err();
    assert_eq!(err.stage, BridgeStage::NodeListen);
}
