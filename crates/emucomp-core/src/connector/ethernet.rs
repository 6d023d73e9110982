//! Ethernet connector: links a virtual NIC's switch to a local unix socket.

use super::{to_websocket, ETHERNET_PROTOCOL, SOCKET_POLL_INTERVAL, SOCKET_TIMEOUT};
use crate::config::BinaryPaths;
use crate::error::{CoreError, Result};
use emucomp_process::{ProcessRunner, RunnerConfig};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::Mutex;
use url::Url;

/// An active link: the helper process and the socket it listens on.
struct Link {
    runner: ProcessRunner,
    socket: PathBuf,
}

/// Exposes one virtual NIC as a stream of raw ethernet frames.
///
/// `connect` spawns `socat unix-listen:<socket> exec:"vde_plug <switch>"` and
/// returns `<socket>` once it exists. At most one link exists at a time; a
/// second `connect` fails with [`CoreError::AlreadyConnected`] instead of
/// waiting.
pub struct EthernetConnector {
    hw_address: String,
    switch_socket: PathBuf,
    socket_dir: PathBuf,
    socat: String,
    vde_plug: String,
    runner_config: RunnerConfig,
    link: Mutex<Option<Link>>,
}

impl fmt::Debug for EthernetConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthernetConnector")
            .field("hw_address", &self.hw_address)
            .field("switch_socket", &self.switch_socket)
            .finish_non_exhaustive()
    }
}

impl EthernetConnector {
    /// Create a connector for the switch listening at `switch_socket`.
    ///
    /// Link sockets are created in `socket_dir`.
    pub fn new(
        hw_address: impl Into<String>,
        switch_socket: impl Into<PathBuf>,
        socket_dir: impl Into<PathBuf>,
        binaries: &BinaryPaths,
        runner_config: RunnerConfig,
    ) -> Self {
        Self {
            hw_address: hw_address.into(),
            switch_socket: switch_socket.into(),
            socket_dir: socket_dir.into(),
            socat: binaries.socat.clone(),
            vde_plug: binaries.vde_plug.clone(),
            runner_config,
            link: Mutex::new(None),
        }
    }

    /// Hardware address of the NIC.
    pub fn hw_address(&self) -> &str {
        &self.hw_address
    }

    /// Socket directory of the switch this connector plugs into.
    pub fn switch_socket(&self) -> &Path {
        &self.switch_socket
    }

    /// `ws+ethernet+<hwaddr>`.
    pub fn protocol(&self) -> String {
        format!("{ETHERNET_PROTOCOL}+{}", self.hw_address)
    }

    /// `ws(s)://.../components/<id>/ws+ethernet/<hwaddr>`.
    pub fn control_path(&self, resource: &Url) -> Result<Url> {
        let path = format!("{ETHERNET_PROTOCOL}/{}", self.hw_address);
        let url = resource
            .join(&path)
            .map_err(|e| CoreError::InvalidArgument(format!("invalid control path '{path}': {e}")))?;
        to_websocket(url)
    }

    /// Whether a link is currently up.
    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Start the link helper and return its socket path.
    pub async fn connect(&self, request_id: &str) -> Result<PathBuf> {
        let mut link = self
            .link
            .try_lock()
            .map_err(|_| CoreError::AlreadyConnected(self.protocol()))?;
        if link.is_some() {
            return Err(CoreError::AlreadyConnected(self.protocol()));
        }

        if request_id.is_empty()
            || !request_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidArgument(format!(
                "invalid request id '{request_id}'"
            )));
        }

        let socket = self.socket_dir.join(format!("{request_id}.sock"));
        let mut runner = ProcessRunner::new(&self.socat)
            .arg(format!("unix-listen:{}", socket.display()))
            .arg(format!("exec:{} {}", self.vde_plug, self.switch_socket.display()))
            .with_config(self.runner_config.clone());

        tracing::debug!(
            hw_address = %self.hw_address,
            socket = %socket.display(),
            "Starting ethernet link"
        );
        if !runner.start(false).await {
            runner.cleanup();
            return Err(CoreError::Spawn(self.socat.clone()));
        }

        if let Err(e) = wait_for_listener(&mut runner, &socket).await {
            tracing::warn!(hw_address = %self.hw_address, error = %e, "Ethernet link did not come up");
            if let Err(e) = runner.kill().await {
                tracing::debug!(error = %e, "Killing link helper failed");
            }
            runner.print_stderr();
            runner.cleanup();
            return Err(e);
        }

        tracing::info!(
            hw_address = %self.hw_address,
            pid = runner.pid(),
            socket = %socket.display(),
            "Ethernet link up"
        );
        *link = Some(Link {
            runner,
            socket: socket.clone(),
        });
        Ok(socket)
    }

    /// Stop the link helper and forget the link. No-op without a link.
    pub async fn close(&self) {
        let Some(mut link) = self.link.lock().await.take() else {
            return;
        };

        if let Err(e) = link.runner.stop().await {
            tracing::warn!(hw_address = %self.hw_address, error = %e, "Stopping ethernet link failed");
        }
        link.runner.print_stdout();
        link.runner.print_stderr();
        link.runner.cleanup();

        match tokio::fs::remove_file(&link.socket).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(socket = %link.socket.display(), error = %e, "Removing link socket failed")
            }
        }
        tracing::info!(hw_address = %self.hw_address, "Ethernet link closed");
    }
}

/// Wait until the helper listens on `socket`, failing early if it exits.
async fn wait_for_listener(runner: &mut ProcessRunner, socket: &Path) -> Result<()> {
    let start = Instant::now();
    loop {
        if tokio::fs::try_exists(socket).await? {
            return Ok(());
        }
        if !runner.is_running() {
            return Err(CoreError::Spawn(format!(
                "{} (exited before listening)",
                runner.command()
            )));
        }
        if start.elapsed() >= SOCKET_TIMEOUT {
            return Err(CoreError::not_found("socket", socket.display()));
        }
        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }
}
