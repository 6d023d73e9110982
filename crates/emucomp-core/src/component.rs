//! Component type - a supervised emulator or network helper with its
//! control connectors and cleanup hooks.

use crate::config::{BinaryPaths, ManagerConfig};
use crate::connector::{
    ConsoleConnector, ControlConnector, EthernetConnector, UsbDeviceInfo, CONSOLE_PROTOCOL,
    ETHERNET_PROTOCOL,
};
use crate::emulator::{EmulatorConfig, EmulatorNode};
use crate::error::{CoreError, Result};
use crate::node_tcp::{NodeTcp, NodeTcpConfig};
use crate::ports::PortPool;
use crate::switch::VdeSwitch;
use chrono::{DateTime, Utc};
use emucomp_process::{ProcessRunner, RunnerConfig};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;
use url::Url;
use uuid::Uuid;

/// Unique identifier for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(Uuid);

impl ComponentId {
    /// Create a new random component ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ComponentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ComponentId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ComponentId {
    type Err = CoreError;

    /// Anything that is not a UUID cannot name a component.
    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| CoreError::not_found("component", s))
    }
}

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    /// Registered, nothing started yet.
    Created,
    /// Subprocesses are being started.
    Initializing,
    /// Ready for use.
    Running,
    /// Teardown in progress.
    Stopping,
    /// Torn down.
    Destroyed,
    /// Initialisation failed.
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a component is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// An emulator with console and NICs.
    Emulator,
    /// A virtual network switch.
    Switch,
    /// A TCP gateway / DHCP helper.
    NodeTcp,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Emulator => "emulator",
            Self::Switch => "switch",
            Self::NodeTcp => "nodetcp",
        };
        f.write_str(name)
    }
}

/// Creation request for a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ComponentConfig {
    /// See [`EmulatorConfig`].
    Emulator(EmulatorConfig),
    /// A virtual network switch.
    Switch,
    /// See [`NodeTcpConfig`].
    NodeTcp(NodeTcpConfig),
}

impl ComponentConfig {
    /// Kind of component this config creates.
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Emulator(_) => ComponentKind::Emulator,
            Self::Switch => ComponentKind::Switch,
            Self::NodeTcp(_) => ComponentKind::NodeTcp,
        }
    }
}

/// What a caller needs a looked-up component to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Any component.
    Any,
    /// A `qemu` console.
    Console,
    /// At least one ethernet connector, or the ability to create one.
    Ethernet,
    /// A virtual network switch.
    Switch,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "component",
            Self::Console => "console component",
            Self::Ethernet => "ethernet component",
            Self::Switch => "switch",
        };
        f.write_str(name)
    }
}

/// Future returned by a cleanup action.
pub type CleanupFuture = BoxFuture<'static, Result<()>>;

struct CleanupTask {
    name: String,
    action: Box<dyn FnOnce() -> CleanupFuture + Send>,
}

/// Everything a node needs while starting.
pub(crate) struct NodeContext<'a> {
    pub id: ComponentId,
    pub work_dir: &'a Path,
    pub binaries: &'a BinaryPaths,
    pub runner: &'a RunnerConfig,
    pub ports: &'a Arc<PortPool>,
}

/// Processes owned by a node, stopped in reverse start order.
#[derive(Default)]
pub(crate) struct ProcessGroup {
    runners: tokio::sync::Mutex<Vec<ProcessRunner>>,
}

impl ProcessGroup {
    /// Start `runner` in the background and keep it.
    pub(crate) async fn start(&self, mut runner: ProcessRunner) -> Result<()> {
        if !runner.start(false).await {
            let command = runner.command().to_string();
            runner.cleanup();
            return Err(CoreError::Spawn(command));
        }
        tracing::debug!(command = %runner.command_line(), pid = runner.pid(), "Process started");
        self.runners.lock().await.push(runner);
        Ok(())
    }

    /// Stop everything, newest first. Failures are logged.
    pub(crate) async fn stop_all(&self) {
        let runners = std::mem::take(&mut *self.runners.lock().await);
        for mut runner in runners.into_iter().rev() {
            if let Err(e) = runner.stop().await {
                tracing::warn!(command = %runner.command(), error = %e, "Stopping process failed");
            }
            runner.print_stdout();
            runner.print_stderr();
            runner.cleanup();
        }
    }
}

/// The kind-specific part of a component.
pub(crate) enum Node {
    Emulator(EmulatorNode),
    Switch(VdeSwitch),
    NodeTcp(NodeTcp),
}

impl Node {
    fn from_config(config: ComponentConfig, work_dir: &Path, manager: &ManagerConfig) -> Result<Self> {
        Ok(match config {
            ComponentConfig::Emulator(c) => Self::Emulator(EmulatorNode::new(c)?),
            ComponentConfig::Switch => {
                Self::Switch(VdeSwitch::new(work_dir, &manager.binaries, &manager.runner))
            }
            ComponentConfig::NodeTcp(c) => Self::NodeTcp(NodeTcp::new(c)?),
        })
    }

    async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<Vec<ControlConnector>> {
        match self {
            Self::Emulator(node) => node.initialize(ctx).await,
            Self::Switch(switch) => switch.initialize().await.map(|()| Vec::new()),
            Self::NodeTcp(node) => node.initialize(ctx).await,
        }
    }

    async fn destroy(&self) {
        match self {
            Self::Emulator(node) => node.destroy().await,
            Self::Switch(switch) => switch.destroy().await,
            Self::NodeTcp(node) => node.destroy().await,
        }
    }
}

/// A supervised component.
///
/// State moves `created -> initializing -> running -> stopping -> destroyed`;
/// a failed initialisation goes through `failed` and is torn down right
/// away. Teardown runs the registered cleanup hooks newest first, closes
/// the connectors, stops the component's processes and removes its working
/// directory. It happens once no matter how many callers ask for it.
pub struct Component {
    id: ComponentId,
    kind: ComponentKind,
    created_at: DateTime<Utc>,
    resource: Url,
    work_dir: PathBuf,
    binaries: BinaryPaths,
    runner: RunnerConfig,
    state: Mutex<ComponentState>,
    connectors: RwLock<Vec<ControlConnector>>,
    cleanups: Mutex<Vec<CleanupTask>>,
    lifecycle: tokio::sync::Mutex<()>,
    node: Node,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Component {
    pub(crate) fn new(id: ComponentId, config: ComponentConfig, manager: &ManagerConfig) -> Result<Self> {
        let kind = config.kind();
        let work_dir = manager.work_dir.join(id.to_string());
        let resource = manager
            .base_url
            .join(&format!("components/{id}/"))
            .map_err(|e| CoreError::Config(format!("invalid base_url: {e}")))?;
        let node = Node::from_config(config, &work_dir, manager)?;

        Ok(Self {
            id,
            kind,
            created_at: Utc::now(),
            resource,
            work_dir,
            binaries: manager.binaries.clone(),
            runner: manager.runner.clone(),
            state: Mutex::new(ComponentState::Created),
            connectors: RwLock::new(Vec::new()),
            cleanups: Mutex::new(Vec::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            node,
        })
    }

    /// Get the component ID.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Get the kind.
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Get the current state.
    pub fn state(&self) -> ComponentState {
        *self.lock_state()
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Base URL all control paths of this component live under.
    pub fn resource(&self) -> &Url {
        &self.resource
    }

    /// Private working directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn lock_state(&self) -> MutexGuard<'_, ComponentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ComponentState) {
        *self.lock_state() = state;
    }

    /// Snapshot of the registered connectors.
    pub fn connectors(&self) -> Vec<ControlConnector> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Find a connector by protocol string.
    pub fn connector(&self, protocol: &str) -> Result<ControlConnector> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.protocol() == protocol)
            .cloned()
            .ok_or_else(|| CoreError::not_found("connector", format!("{}/{protocol}", self.id)))
    }

    /// The ethernet connector of the NIC with address `hw_address`.
    pub fn ethernet_connector(&self, hw_address: &str) -> Result<Arc<EthernetConnector>> {
        let protocol = format!("{ETHERNET_PROTOCOL}+{}", hw_address.to_ascii_lowercase());
        match self.connector(&protocol)? {
            ControlConnector::Ethernet(c) => Ok(c),
            _ => Err(CoreError::not_found("connector", protocol)),
        }
    }

    /// The emulator console.
    pub fn console(&self) -> Result<ConsoleConnector> {
        match self.connector(CONSOLE_PROTOCOL)? {
            ControlConnector::Console(c) => Ok(c),
            _ => Err(CoreError::not_found("connector", CONSOLE_PROTOCOL)),
        }
    }

    /// USB devices published by this component; empty when there are none.
    pub fn usb_devices(&self) -> Vec<UsbDeviceInfo> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find_map(|c| match c {
                ControlConnector::UsbInfo(usb) => Some(usb.devices().to_vec()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Protocol to public URL of every connector.
    pub fn control_urls(&self) -> Result<BTreeMap<String, String>> {
        self.connectors()
            .iter()
            .map(|c| Ok((c.protocol(), c.control_path(&self.resource)?.to_string())))
            .collect()
    }

    /// Whether this component offers `capability`.
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Any => true,
            Capability::Switch => self.kind == ComponentKind::Switch,
            Capability::Console => self.connector(CONSOLE_PROTOCOL).is_ok(),
            Capability::Ethernet => {
                self.kind == ComponentKind::Switch
                    || self
                        .connectors
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .iter()
                        .any(|c| matches!(c, ControlConnector::Ethernet(_)))
            }
        }
    }

    /// The switch behind a switch component.
    pub fn switch(&self) -> Result<&VdeSwitch> {
        match &self.node {
            Node::Switch(switch) => Ok(switch),
            _ => Err(CoreError::TypeMismatch {
                id: self.id.to_string(),
                expected: Capability::Switch.to_string(),
                actual: self.kind.to_string(),
            }),
        }
    }

    /// Create a new ethernet connector on this switch and return its
    /// control path.
    pub fn connect_ethernet(&self) -> Result<Url> {
        let switch = self.switch()?;
        self.ensure_running()?;

        let connector = Arc::new(switch.new_ethernet_connector());
        let url = connector.control_path(&self.resource)?;
        tracing::info!(
            component_id = %self.id,
            hw_address = %connector.hw_address(),
            "Switch ethernet connector added"
        );
        self.connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ControlConnector::Ethernet(connector));
        Ok(url)
    }

    /// Forward monitor commands to the console, one per line.
    pub async fn send_monitor_commands(&self, commands: &str) -> Result<()> {
        self.ensure_running()?;
        self.console()?
            .send_commands(commands.lines(), &self.binaries, &self.runner)
            .await
    }

    fn ensure_running(&self) -> Result<()> {
        let state = self.state();
        if state != ComponentState::Running {
            return Err(CoreError::InvalidState {
                expected: ComponentState::Running.to_string(),
                actual: state.to_string(),
            });
        }
        Ok(())
    }

    /// Register an action to run when the component is torn down.
    ///
    /// Actions run newest first. Registration is refused once teardown has
    /// started.
    pub fn register_cleanup<F, Fut>(&self, name: impl Into<String>, action: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let state = self.lock_state();
        if matches!(*state, ComponentState::Stopping | ComponentState::Destroyed) {
            return Err(CoreError::InvalidState {
                expected: "live component".into(),
                actual: state.to_string(),
            });
        }
        tracing::debug!(component_id = %self.id, task = %name, "Cleanup task registered");
        self.cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CleanupTask {
                name,
                action: Box::new(move || action().boxed()),
            });
        Ok(())
    }

    /// Start the component's processes and register its connectors.
    ///
    /// On failure everything started so far is torn down before the error
    /// is returned.
    pub(crate) async fn initialize(&self, ports: &Arc<PortPool>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = self.lock_state();
            if *state != ComponentState::Created {
                return Err(CoreError::InvalidState {
                    expected: ComponentState::Created.to_string(),
                    actual: state.to_string(),
                });
            }
            *state = ComponentState::Initializing;
        }

        let start = Instant::now();
        tracing::info!(component_id = %self.id, kind = %self.kind, "Initializing component");

        let ctx = NodeContext {
            id: self.id,
            work_dir: &self.work_dir,
            binaries: &self.binaries,
            runner: &self.runner,
            ports,
        };
        let result = match tokio::fs::create_dir_all(&self.work_dir).await {
            Ok(()) => self.node.initialize(&ctx).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(connectors) => {
                self.connectors
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .extend(connectors);
                self.set_state(ComponentState::Running);
                tracing::info!(
                    component_id = %self.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Component running"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(component_id = %self.id, error = %e, "Component initialization failed");
                self.set_state(ComponentState::Failed);
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Tear the component down. Idempotent; concurrent callers wait for the
    /// first one to finish.
    pub async fn destroy(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        {
            let mut state = self.lock_state();
            if matches!(*state, ComponentState::Stopping | ComponentState::Destroyed) {
                return;
            }
            *state = ComponentState::Stopping;
        }
        let start = Instant::now();
        tracing::info!(component_id = %self.id, kind = %self.kind, "Destroying component");

        let tasks = std::mem::take(&mut *self.cleanups.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks.into_iter().rev() {
            tracing::debug!(component_id = %self.id, task = %task.name, "Running cleanup task");
            if let Err(e) = (task.action)().await {
                tracing::warn!(
                    component_id = %self.id,
                    task = %task.name,
                    error = %e,
                    "Cleanup task failed"
                );
            }
        }

        let connectors = std::mem::take(
            &mut *self
                .connectors
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for connector in &connectors {
            connector.close().await;
        }

        self.node.destroy().await;

        match tokio::fs::remove_dir_all(&self.work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                component_id = %self.id,
                path = %self.work_dir.display(),
                error = %e,
                "Failed to remove working directory"
            ),
        }

        self.set_state(ComponentState::Destroyed);
        tracing::info!(
            component_id = %self.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Component destroyed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_config(dir: &Path) -> ManagerConfig {
        ManagerConfig::builder().work_dir(dir).build().expect("config")
    }

    fn sleeper() -> ComponentConfig {
        let mut config = EmulatorConfig::new("sleep");
        config.args = vec!["30".into()];
        config.console = false;
        ComponentConfig::Emulator(config)
    }

    async fn running(dir: &Path) -> Component {
        let config = manager_config(dir);
        let ports = PortPool::new(config.tcp_ports);
        let component = Component::new(ComponentId::new(), sleeper(), &config).expect("component");
        component.initialize(&ports).await.expect("initialize");
        component
    }

    #[test]
    fn test_component_id_parse() {
        let id = ComponentId::new();
        assert_eq!(id.to_string().parse::<ComponentId>().expect("parse"), id);
        assert!(matches!(
            "not-a-uuid".parse::<ComponentId>(),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_config_tagging() {
        let switch: ComponentConfig = serde_json::from_str(r#"{"type": "switch"}"#).expect("parse");
        assert_eq!(switch.kind(), ComponentKind::Switch);

        let node: ComponentConfig =
            serde_json::from_str(r#"{"type": "nodetcp", "socksMode": true}"#).expect("parse");
        assert_eq!(node.kind(), ComponentKind::NodeTcp);

        let emulator: ComponentConfig =
            serde_json::from_str(r#"{"type": "emulator", "binary": "qemu"}"#).expect("parse");
        assert_eq!(emulator.kind(), ComponentKind::Emulator);

        assert!(serde_json::from_str::<ComponentConfig>(r#"{"type": "toaster"}"#).is_err());
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = running(dir.path()).await;
        assert_eq!(component.state(), ComponentState::Running);
        assert!(component.work_dir().exists());

        component.destroy().await;
        assert_eq!(component.state(), ComponentState::Destroyed);
        assert!(!component.work_dir().exists());
    }

    #[tokio::test]
    async fn test_hooks_run_in_reverse_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = running(dir.path()).await;
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["net-disconnect", "port-release"] {
            let log = Arc::clone(&log);
            component
                .register_cleanup(name, move || async move {
                    log.lock().expect("log").push(name);
                    Ok(())
                })
                .expect("register");
        }

        component.destroy().await;
        assert_eq!(*log.lock().expect("log"), vec!["port-release", "net-disconnect"]);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_abort_teardown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = running(dir.path()).await;
        let ran = Arc::new(Mutex::new(false));

        {
            let ran = Arc::clone(&ran);
            component
                .register_cleanup("first", move || async move {
                    *ran.lock().expect("flag") = true;
                    Ok(())
                })
                .expect("register");
        }
        component
            .register_cleanup("broken", || async { Err(CoreError::Spawn("nothing".into())) })
            .expect("register");

        component.destroy().await;
        assert!(*ran.lock().expect("flag"));
        assert_eq!(component.state(), ComponentState::Destroyed);
    }

    #[tokio::test]
    async fn test_concurrent_destroy_runs_hooks_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = Arc::new(running(dir.path()).await);
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = Arc::clone(&log);
            component
                .register_cleanup(name, move || async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    log.lock().expect("log").push(name);
                    Ok(())
                })
                .expect("register");
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let component = Arc::clone(&component);
                tokio::spawn(async move { component.destroy().await })
            })
            .collect();
        for handle in handles {
            handle.await.expect("destroy task");
        }

        assert_eq!(*log.lock().expect("log"), vec!["c", "b", "a"]);
        assert_eq!(component.state(), ComponentState::Destroyed);
    }

    #[tokio::test]
    async fn test_register_after_destroy_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = running(dir.path()).await;
        component.destroy().await;

        let result = component.register_cleanup("late", || async { Ok(()) });
        assert!(matches!(result, Err(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_failed_initialize_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = manager_config(dir.path());
        let ports = PortPool::new(config.tcp_ports);
        let mut emulator = EmulatorConfig::new("/nonexistent/emucomp-emulator");
        emulator.console = false;

        let component =
            Component::new(ComponentId::new(), ComponentConfig::Emulator(emulator), &config)
                .expect("component");
        let result = component.initialize(&ports).await;
        assert!(matches!(result, Err(CoreError::Spawn(_))));
        assert_eq!(component.state(), ComponentState::Destroyed);
        assert!(!component.work_dir().exists());
    }

    #[tokio::test]
    async fn test_switch_capability() {
        let dir = tempfile::tempdir().expect("tempdir");
        let component = running(dir.path()).await;
        assert!(component.supports(Capability::Any));
        assert!(!component.supports(Capability::Switch));
        assert!(!component.supports(Capability::Ethernet));
        assert!(matches!(
            component.switch(),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert!(matches!(
            component.connect_ethernet(),
            Err(CoreError::TypeMismatch { .. })
        ));
        component.destroy().await;
    }
}
