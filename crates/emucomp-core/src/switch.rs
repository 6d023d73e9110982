//! Virtual network switch: one `vde_switch` process plus the remote
//! endpoints bridged into it.

use crate::config::BinaryPaths;
use crate::connector::EthernetConnector;
use crate::error::{CoreError, Result};
use crate::hwaddr::random_hw_address;
use chrono::{DateTime, Utc};
use emucomp_process::{ProcessRunner, RunnerConfig};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

/// Accepted remote endpoints: ws/wss followed by printable ASCII without
/// spaces, quotes, `<`, `>`, backslash, `^`, backtick, `{`, `|` or `}`.
static ENDPOINT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^wss?://[!#-;=?-\[\]_a-z~]+$").expect("endpoint pattern is valid")
});

/// Check that `url` is an acceptable remote websocket endpoint.
pub fn validate_endpoint(url: &str) -> Result<()> {
    if ENDPOINT_PATTERN.is_match(url) {
        Ok(())
    } else {
        Err(CoreError::InvalidArgument(format!(
            "invalid websocket URL '{url}'"
        )))
    }
}

/// One live bridge between the switch and a remote endpoint.
pub struct Connection {
    endpoint: String,
    created_at: DateTime<Utc>,
    connected: AtomicBool,
    runner: tokio::sync::Mutex<ProcessRunner>,
}

impl Connection {
    /// Remote websocket URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// When the bridge was started.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// False once the bridge has been stopped.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the bridge process. Only the first call does anything.
    async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut runner = self.runner.lock().await;
        if let Err(e) = runner.stop().await {
            tracing::warn!(endpoint = %self.endpoint, error = %e, "Stopping bridge failed");
        }
        runner.print_stdout();
        runner.print_stderr();
        runner.cleanup();
        tracing::info!(endpoint = %self.endpoint, "Switch connection closed");
    }
}

enum Slot {
    /// Bridge is being spawned; blocks duplicates but is not visible yet.
    Pending,
    Live(Arc<Connection>),
}

#[derive(Default)]
struct Connections {
    slots: HashMap<String, Slot>,
    closed: bool,
}

/// A `vde_switch` and its remote connections.
///
/// Connection bookkeeping happens under a short synchronous lock that is
/// never held across a spawn or a stop, so operations on different
/// endpoints do not wait for each other. A duplicate endpoint is rejected
/// while the first bridge for it is still starting.
pub struct VdeSwitch {
    sockets_dir: PathBuf,
    binaries: BinaryPaths,
    runner_config: RunnerConfig,
    process: tokio::sync::Mutex<Option<ProcessRunner>>,
    connections: Mutex<Connections>,
}

impl VdeSwitch {
    /// A switch whose control sockets live in `<work_dir>/sockets`.
    pub fn new(work_dir: &Path, binaries: &BinaryPaths, runner_config: &RunnerConfig) -> Self {
        Self {
            sockets_dir: work_dir.join("sockets"),
            binaries: binaries.clone(),
            runner_config: runner_config.clone(),
            process: tokio::sync::Mutex::new(None),
            connections: Mutex::new(Connections::default()),
        }
    }

    /// Socket directory plugs attach to.
    pub fn sockets_dir(&self) -> &Path {
        &self.sockets_dir
    }

    fn connections(&self) -> MutexGuard<'_, Connections> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `vde_switch -s <sockets>`.
    pub async fn initialize(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Err(CoreError::InvalidState {
                expected: "not started".into(),
                actual: "started".into(),
            });
        }

        let mut runner = ProcessRunner::new(&self.binaries.vde_switch)
            .arg("-s")
            .arg(self.sockets_dir.display().to_string())
            .with_config(self.runner_config.clone());
        if !runner.start(false).await {
            runner.cleanup();
            return Err(CoreError::Spawn(self.binaries.vde_switch.clone()));
        }

        tracing::info!(
            pid = runner.pid(),
            sockets = %self.sockets_dir.display(),
            "Switch started"
        );
        *process = Some(runner);
        Ok(())
    }

    /// A fresh ethernet connector with a random address, plugged into this
    /// switch.
    pub fn new_ethernet_connector(&self) -> EthernetConnector {
        EthernetConnector::new(
            random_hw_address(),
            &self.sockets_dir,
            &self.sockets_dir,
            &self.binaries,
            self.runner_config.clone(),
        )
    }

    /// Bridge the switch to a remote websocket endpoint.
    ///
    /// Spawns `websocat --binary --exit-on-eof exec:vde_plug <url>
    /// --exec-args <sockets>`. The connection is only registered once the
    /// bridge is running.
    pub async fn connect_endpoint(&self, url: &str) -> Result<()> {
        validate_endpoint(url)?;

        {
            let mut connections = self.connections();
            if connections.closed {
                return Err(switch_closed());
            }
            if connections.slots.contains_key(url) {
                tracing::debug!(endpoint = %url, "Rejecting duplicate endpoint");
                return Err(CoreError::DuplicateEndpoint(url.to_string()));
            }
            connections.slots.insert(url.to_string(), Slot::Pending);
        }

        let mut runner = ProcessRunner::new(&self.binaries.websocat)
            .args(["--binary", "--exit-on-eof", "--ping-interval=600"])
            .arg(format!("exec:{}", self.binaries.vde_plug))
            .arg(url)
            .arg("--exec-args")
            .arg(self.sockets_dir.display().to_string())
            .with_config(self.runner_config.clone());

        if !runner.start(false).await {
            runner.cleanup();
            self.connections().slots.remove(url);
            return Err(CoreError::Spawn(self.binaries.websocat.clone()));
        }
        let pid = runner.pid();

        let connection = Arc::new(Connection {
            endpoint: url.to_string(),
            created_at: Utc::now(),
            connected: AtomicBool::new(true),
            runner: tokio::sync::Mutex::new(runner),
        });

        let rejected = {
            let mut connections = self.connections();
            if connections.closed {
                connections.slots.remove(url);
                true
            } else {
                connections
                    .slots
                    .insert(url.to_string(), Slot::Live(Arc::clone(&connection)));
                false
            }
        };
        if rejected {
            // switch was destroyed while the bridge was starting
            connection.close().await;
            return Err(switch_closed());
        }

        tracing::info!(endpoint = %url, pid, "Switch connection established");
        Ok(())
    }

    /// Stop and forget the bridge to `url`.
    pub async fn disconnect_endpoint(&self, url: &str) -> Result<()> {
        let connection = {
            let mut connections = self.connections();
            match connections.slots.remove(url) {
                Some(Slot::Live(connection)) => connection,
                Some(Slot::Pending) => {
                    // still starting, not ours to cancel
                    connections.slots.insert(url.to_string(), Slot::Pending);
                    return Err(CoreError::not_found("connection", url));
                }
                None => return Err(CoreError::not_found("connection", url)),
            }
        };
        connection.close().await;
        Ok(())
    }

    /// Whether `url` has a live bridge.
    pub fn is_connected(&self, url: &str) -> bool {
        matches!(self.connections().slots.get(url), Some(Slot::Live(_)))
    }

    /// Live connections.
    pub fn connections_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections()
            .slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(c) => Some(Arc::clone(c)),
                Slot::Pending => None,
            })
            .collect()
    }

    /// Disconnect every endpoint, then kill the switch.
    ///
    /// Refuses new connections from here on. Individual failures are logged.
    pub async fn destroy(&self) {
        let live: Vec<Arc<Connection>> = {
            let mut connections = self.connections();
            connections.closed = true;
            connections
                .slots
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Live(c) => Some(c),
                    Slot::Pending => None,
                })
                .collect()
        };

        tracing::debug!(count = live.len(), "Disconnecting switch endpoints");
        for connection in live {
            connection.close().await;
        }

        if let Some(mut runner) = self.process.lock().await.take() {
            if let Err(e) = runner.kill().await {
                tracing::warn!(error = %e, "Killing switch failed");
            }
            runner.print_stdout();
            runner.print_stderr();
            runner.cleanup();
            tracing::info!(sockets = %self.sockets_dir.display(), "Switch stopped");
        }
    }
}

fn switch_closed() -> CoreError {
    CoreError::InvalidState {
        expected: "running switch".into(),
        actual: "destroyed switch".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const URL: &str = "ws://peer.example.org:8080/components/abc/ws+ethernet/52:54:00:12:34:56";

    /// Binaries whose switch and bridge are long sleeping shell scripts.
    fn fake_binaries(dir: &Path) -> BinaryPaths {
        let script = dir.join("fake-daemon");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        let path = script.display().to_string();
        BinaryPaths {
            vde_switch: path.clone(),
            websocat: path,
            ..Default::default()
        }
    }

    async fn running_switch(dir: &Path) -> VdeSwitch {
        let switch = VdeSwitch::new(dir, &fake_binaries(dir), &RunnerConfig::default());
        switch.initialize().await.expect("switch starts");
        switch
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(validate_endpoint(URL).is_ok());
        assert!(validate_endpoint("wss://host/path?x=1&y=2").is_ok());
        assert!(validate_endpoint("http://host/path").is_err());
        assert!(validate_endpoint("ws://host/with space").is_err());
        assert!(validate_endpoint("ws://host/\"quoted\"").is_err());
        assert!(validate_endpoint("ws://host/a\\b").is_err());
        assert!(validate_endpoint("ws://").is_err());
    }

    #[tokio::test]
    async fn test_duplicate_endpoint_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let switch = running_switch(dir.path()).await;

        switch.connect_endpoint(URL).await.expect("first connect");
        assert!(matches!(
            switch.connect_endpoint(URL).await,
            Err(CoreError::DuplicateEndpoint(_))
        ));
        assert!(switch.is_connected(URL));
        assert_eq!(switch.connections_snapshot().len(), 1);

        switch.destroy().await;
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_connect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let switch = running_switch(dir.path()).await;

        let (a, b) = tokio::join!(switch.connect_endpoint(URL), switch.connect_endpoint(URL));
        assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);
        assert!(a.is_err() || b.is_err());
        assert_eq!(switch.connections_snapshot().len(), 1);

        switch.destroy().await;
    }

    #[tokio::test]
    async fn test_disconnect_unknown_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let switch = running_switch(dir.path()).await;
        assert!(matches!(
            switch.disconnect_endpoint(URL).await,
            Err(CoreError::NotFound { .. })
        ));
        switch.destroy().await;
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let switch = running_switch(dir.path()).await;

        switch.connect_endpoint(URL).await.expect("connect");
        let connection = switch.connections_snapshot().remove(0);
        switch.disconnect_endpoint(URL).await.expect("disconnect");
        assert!(!connection.is_connected());
        assert!(!switch.is_connected(URL));
        assert!(switch.disconnect_endpoint(URL).await.is_err());

        switch.connect_endpoint(URL).await.expect("reconnect");
        switch.destroy().await;
    }

    #[tokio::test]
    async fn test_bridge_spawn_failure_leaves_no_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binaries = BinaryPaths {
            websocat: "/nonexistent/emucomp-websocat".into(),
            ..fake_binaries(dir.path())
        };
        let switch = VdeSwitch::new(dir.path(), &binaries, &RunnerConfig::default());
        switch.initialize().await.expect("switch starts");

        assert!(matches!(
            switch.connect_endpoint(URL).await,
            Err(CoreError::Spawn(_))
        ));
        assert!(!switch.is_connected(URL));
        assert!(matches!(
            switch.disconnect_endpoint(URL).await,
            Err(CoreError::NotFound { .. })
        ));
        switch.destroy().await;
    }

    #[tokio::test]
    async fn test_destroy_disconnects_and_closes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let switch = running_switch(dir.path()).await;
        let other = "ws://peer.example.org/other";

        switch.connect_endpoint(URL).await.expect("connect");
        switch.connect_endpoint(other).await.expect("connect");
        let live = switch.connections_snapshot();

        switch.destroy().await;
        assert!(live.iter().all(|c| !c.is_connected()));
        assert!(switch.connections_snapshot().is_empty());
        assert!(matches!(
            switch.connect_endpoint(URL).await,
            Err(CoreError::InvalidState { .. })
        ));
        // second destroy is a no-op
        switch.destroy().await;
    }

    #[tokio::test]
    async fn test_missing_switch_binary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binaries = BinaryPaths {
            vde_switch: "/nonexistent/emucomp-vde-switch".into(),
            ..Default::default()
        };
        let switch = VdeSwitch::new(dir.path(), &binaries, &RunnerConfig::default());
        assert!(matches!(switch.initialize().await, Err(CoreError::Spawn(_))));
    }
}
