//! Network lifecycle tests against stand-in daemons.
//!
//! Every external program is replaced by a shell script that idles, so these
//! tests exercise the supervision and bookkeeping without vde or qemu.

use emucomp_core::{
    BinaryPaths, Capability, ComponentConfig, ComponentId, ComponentManager, CoreError,
    EmulatorConfig, Lifetime, LifetimeUnit, ManagerConfig, NetworkComponentRequest,
    NetworkRequest, Networks, TcpGatewayConfig,
};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    manager: Arc<ComponentManager>,
    networks: Arc<Networks>,
    daemon: String,
}

fn fake_daemon(dir: &Path) -> String {
    let script = dir.join("fake-daemon");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    script.display().to_string()
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with(customize: impl FnOnce(&mut BinaryPaths)) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let daemon = fake_daemon(dir.path());
    let mut binaries = BinaryPaths {
        vde_switch: daemon.clone(),
        websocat: daemon.clone(),
        node_tcp_runner: daemon.clone(),
        ..Default::default()
    };
    customize(&mut binaries);
    let config = ManagerConfig::builder()
        .work_dir(dir.path().join("work"))
        .binaries(binaries)
        .build()
        .expect("config");
    let manager = Arc::new(ComponentManager::new(config));
    let networks = Networks::new(Arc::clone(&manager));
    Fixture {
        _dir: dir,
        manager,
        networks,
        daemon,
    }
}

impl Fixture {
    async fn emulator_with_nic(&self) -> ComponentId {
        let mut config = EmulatorConfig::new(&self.daemon);
        config.console = false;
        config.nics = vec!["52:54:00:12:34:56".into()];
        self.manager
            .create(ComponentConfig::Emulator(config))
            .await
            .expect("emulator starts")
    }

    async fn switch_endpoints(&self, network_id: &str) -> usize {
        let switch_id = self.networks.info(network_id).expect("network").switch_id;
        self.manager
            .get(switch_id, Capability::Switch)
            .await
            .expect("switch")
            .switch()
            .expect("is a switch")
            .connections_snapshot()
            .len()
    }
}

#[tokio::test]
async fn test_empty_network_lifecycle() {
    let f = fixture();
    let network = f.networks.create(NetworkRequest::default()).await.expect("create");
    assert!(network.urls.is_empty());
    assert_eq!(f.manager.count().await, 1);

    let url = f.networks.ws_connection(&network.id).await.expect("ws connection");
    assert!(url.starts_with("ws://"));
    assert!(url.contains("/ws+ethernet/"));

    f.networks.remove(&network.id).await.expect("remove");
    assert_eq!(f.manager.count().await, 0);
    assert!(matches!(
        f.networks.remove(&network.id).await,
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_member_survives_network_removal() {
    let f = fixture();
    let emulator = f.emulator_with_nic().await;
    let request = NetworkRequest {
        components: vec![NetworkComponentRequest::new(emulator.to_string())],
        ..Default::default()
    };
    let network = f.networks.create(request).await.expect("create");
    assert_eq!(f.switch_endpoints(&network.id).await, 1);

    f.networks.remove(&network.id).await.expect("remove");
    assert!(f.manager.exists(emulator).await);
    f.manager.destroy(emulator).await.expect("destroy member");
    assert_eq!(f.manager.count().await, 0);
}

#[tokio::test]
async fn test_destroying_member_unplugs_it() {
    let f = fixture();
    let emulator = f.emulator_with_nic().await;
    let network = f.networks.create(NetworkRequest::default()).await.expect("create");
    f.networks
        .add_component(&network.id, &NetworkComponentRequest::new(emulator.to_string()))
        .await
        .expect("add");
    assert_eq!(f.networks.info(&network.id).expect("info").components.len(), 1);

    f.manager.destroy(emulator).await.expect("destroy member");
    assert!(f.networks.info(&network.id).expect("info").components.is_empty());
    assert_eq!(f.switch_endpoints(&network.id).await, 0);

    f.networks.remove(&network.id).await.expect("remove");
}

#[tokio::test]
async fn test_ephemeral_member_destroyed_with_network() {
    let f = fixture();
    let emulator = f.emulator_with_nic().await;
    let mut member = NetworkComponentRequest::new(emulator.to_string());
    member.ephemeral = true;
    let request = NetworkRequest {
        components: vec![member],
        ..Default::default()
    };
    let network = f.networks.create(request).await.expect("create");

    f.networks.remove(&network.id).await.expect("remove");
    assert!(!f.manager.exists(emulator).await);
    assert_eq!(f.manager.count().await, 0);
}

#[tokio::test]
async fn test_duplicate_member_rejected() {
    let f = fixture();
    let emulator = f.emulator_with_nic().await;
    let network = f.networks.create(NetworkRequest::default()).await.expect("create");
    let member = NetworkComponentRequest::new(emulator.to_string());

    f.networks.add_component(&network.id, &member).await.expect("add");
    assert!(matches!(
        f.networks.add_component(&network.id, &member).await,
        Err(CoreError::DuplicateEndpoint(_))
    ));
    assert_eq!(f.switch_endpoints(&network.id).await, 1);

    f.networks.remove(&network.id).await.expect("remove");
    f.manager.destroy_all().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent_and_remove_drops_member() {
    let f = fixture();
    let emulator = f.emulator_with_nic().await;
    let network = f.networks.create(NetworkRequest::default()).await.expect("create");
    let id = emulator.to_string();
    f.networks
        .add_component(&network.id, &NetworkComponentRequest::new(&id))
        .await
        .expect("add");

    f.networks.disconnect_component(&network.id, &id).await.expect("disconnect");
    f.networks.disconnect_component(&network.id, &id).await.expect("second disconnect");
    assert_eq!(f.switch_endpoints(&network.id).await, 0);
    let info = f.networks.info(&network.id).expect("info");
    assert!(!info.components[0].network_info.connected);

    f.networks.remove_component(&network.id, &id).await.expect("remove member");
    assert!(f.networks.info(&network.id).expect("info").components.is_empty());
    assert!(matches!(
        f.networks.remove_component(&network.id, &id).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(f.manager.exists(emulator).await);

    f.networks.remove(&network.id).await.expect("remove");
    f.manager.destroy_all().await;
}

#[tokio::test]
async fn test_tcp_gateway_exposed_and_ephemeral() {
    let f = fixture();
    let request = NetworkRequest {
        tcp_gateway: Some(TcpGatewayConfig {
            server_ip: Some("10.0.0.2".into()),
            server_port: Some(80),
            ..Default::default()
        }),
        ..Default::default()
    };
    let network = f.networks.create(request).await.expect("create");
    let tcp = network.urls.get("tcp").expect("tcp url");
    assert!(tcp.contains("/info/tcp/"), "unexpected url {tcp}");
    assert_eq!(f.manager.count().await, 2);

    f.networks.remove(&network.id).await.expect("remove");
    assert_eq!(f.manager.count().await, 0);
    assert_eq!(f.manager.ports().available(), f.manager.config().tcp_ports.len());
}

#[tokio::test]
async fn test_failed_create_leaves_nothing_behind() {
    let f = fixture();
    let request = NetworkRequest {
        components: vec![NetworkComponentRequest::new(ComponentId::new().to_string())],
        ..Default::default()
    };
    assert!(matches!(
        f.networks.create(request).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(f.networks.sessions().is_empty());
    assert_eq!(f.manager.count().await, 0);
}

#[tokio::test]
async fn test_unpluggable_gateway_is_destroyed() {
    let f = fixture_with(|binaries| binaries.websocat = "/nonexistent/emucomp-websocat".into());
    let request = NetworkRequest {
        tcp_gateway: Some(TcpGatewayConfig {
            server_ip: Some("10.0.0.2".into()),
            server_port: Some(80),
            ..Default::default()
        }),
        ..Default::default()
    };
    assert!(matches!(
        f.networks.create(request).await,
        Err(CoreError::Spawn(_))
    ));
    assert!(f.networks.sessions().is_empty());
    assert_eq!(f.manager.count().await, 0);
    assert_eq!(f.manager.ports().available(), f.manager.config().tcp_ports.len());
}

#[tokio::test]
async fn test_unknown_network() {
    let f = fixture();
    let member = NetworkComponentRequest::new(ComponentId::new().to_string());
    assert!(matches!(
        f.networks.add_component("missing", &member).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(f.networks.ws_connection("missing").await.is_err());
    assert!(f
        .networks
        .set_lifetime("missing", &Lifetime::new(1, LifetimeUnit::Seconds))
        .is_err());
}

#[tokio::test]
async fn test_lifetime_removes_network() {
    let f = fixture();
    let request = NetworkRequest {
        lifetime: Some(Lifetime::new(500, LifetimeUnit::Milliseconds)),
        ..Default::default()
    };
    let network = f.networks.create(request).await.expect("create");
    assert!(f.networks.info(&network.id).expect("info").expires_at.is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(f.networks.sessions().is_empty());
    assert_eq!(f.manager.count().await, 0);
}

#[tokio::test]
async fn test_lifetime_unplugs_members() {
    let f = fixture();
    let emulator = f.emulator_with_nic().await;
    let request = NetworkRequest {
        components: vec![NetworkComponentRequest::new(emulator.to_string())],
        lifetime: Some(Lifetime::new(500, LifetimeUnit::Milliseconds)),
        ..Default::default()
    };
    let network = f.networks.create(request).await.expect("create");
    assert_eq!(f.switch_endpoints(&network.id).await, 1);

    let switch_id = f.networks.info(&network.id).expect("info").switch_id;
    let switch = f
        .manager
        .get(switch_id, Capability::Switch)
        .await
        .expect("switch");
    let member = f
        .networks
        .sessions()
        .get(&network.id)
        .expect("session")
        .component(emulator)
        .expect("member");
    assert!(member.info().network_info.connected);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(f.networks.sessions().is_empty());
    assert!(!member.info().network_info.connected);
    assert!(!member.is_released());
    assert!(switch.switch().expect("is a switch").connections_snapshot().is_empty());
    assert!(!f.manager.exists(switch_id).await);

    assert!(f.manager.exists(emulator).await);
    f.manager.destroy(emulator).await.expect("destroy member");
    assert_eq!(f.manager.count().await, 0);
}

#[tokio::test]
async fn test_lifetime_can_be_extended() {
    let f = fixture();
    let network = f.networks.create(NetworkRequest::default()).await.expect("create");
    f.networks
        .set_lifetime(&network.id, &Lifetime::new(300, LifetimeUnit::Milliseconds))
        .expect("short lifetime");
    f.networks
        .set_lifetime(&network.id, &Lifetime::new(1, LifetimeUnit::Hours))
        .expect("extend");

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(f.networks.info(&network.id).is_ok());
    f.networks.remove_all().await;
    assert_eq!(f.manager.count().await, 0);
}
