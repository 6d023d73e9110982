//! Control connectors: typed handles on one control or data channel of a
//! component.
//!
//! The set of variants is closed. Stream-capable variants ([`Console`] and
//! [`Ethernet`]) hand out a local unix socket path on `connect`; the
//! informational variants only describe themselves.
//!
//! [`Console`]: ControlConnector::Console
//! [`Ethernet`]: ControlConnector::Ethernet

mod ethernet;

pub use ethernet::EthernetConnector;

use crate::config::BinaryPaths;
use crate::error::{CoreError, Result};
use emucomp_process::{ProcessRunner, RunnerConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Protocol of the emulator console / monitor socket.
pub const CONSOLE_PROTOCOL: &str = "qemu";
/// Protocol prefix of ethernet connectors; the full protocol is
/// `ws+ethernet+<hwaddr>`.
pub const ETHERNET_PROTOCOL: &str = "ws+ethernet";
/// Protocol of informational connectors.
pub const INFO_PROTOCOL: &str = "info";
/// Protocol of the USB device list.
pub const USB_PROTOCOL: &str = "usb";

/// How long a stream connector waits for its socket to appear.
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for a socket.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A control channel of a component.
#[derive(Debug, Clone)]
pub enum ControlConnector {
    /// Emulator console / monitor socket.
    Console(ConsoleConnector),
    /// Virtual NIC, linked on demand through a helper process.
    Ethernet(Arc<EthernetConnector>),
    /// Free-form information, e.g. the port of a TCP gateway.
    Info(InfoConnector),
    /// Metadata about USB devices that can be attached.
    UsbInfo(UsbInfoConnector),
}

impl ControlConnector {
    /// Protocol string the connector is looked up by.
    pub fn protocol(&self) -> String {
        match self {
            Self::Console(_) => CONSOLE_PROTOCOL.to_string(),
            Self::Ethernet(c) => c.protocol(),
            Self::Info(_) => INFO_PROTOCOL.to_string(),
            Self::UsbInfo(_) => USB_PROTOCOL.to_string(),
        }
    }

    /// Public URL of this channel below `resource`, the component's base URL.
    pub fn control_path(&self, resource: &Url) -> Result<Url> {
        match self {
            Self::Console(_) => to_websocket(join(resource, CONSOLE_PROTOCOL)?),
            Self::Ethernet(c) => c.control_path(resource),
            Self::Info(c) => join(resource, &format!("{INFO_PROTOCOL}/{}", c.info())),
            // the device list is served by a plain GET on the console path
            Self::UsbInfo(_) => join(resource, CONSOLE_PROTOCOL),
        }
    }

    /// Whether `connect` is supported.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Console(_) | Self::Ethernet(_))
    }

    /// Open the channel and return the local socket to stream through.
    pub async fn connect(&self, request_id: &str) -> Result<PathBuf> {
        match self {
            Self::Console(c) => c.connect().await,
            Self::Ethernet(c) => c.connect(request_id).await,
            Self::Info(_) | Self::UsbInfo(_) => Err(CoreError::InvalidArgument(format!(
                "connector '{}' cannot be streamed",
                self.protocol()
            ))),
        }
    }

    /// Release whatever `connect` set up. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Self::Ethernet(c) = self {
            c.close().await;
        }
    }
}

/// Console of an emulator, bound to a socket the emulator itself creates.
#[derive(Debug, Clone)]
pub struct ConsoleConnector {
    socket: PathBuf,
}

impl ConsoleConnector {
    /// Wrap the emulator's monitor socket.
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Path of the monitor socket.
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn connect(&self) -> Result<PathBuf> {
        wait_for_socket(&self.socket, SOCKET_TIMEOUT).await?;
        Ok(self.socket.clone())
    }

    /// Send monitor commands one line at a time.
    ///
    /// Each line runs as `echo <line> | socat - UNIX-CONNECT:<socket>`.
    /// Blank lines are skipped.
    pub async fn send_commands<'a, I>(
        &self,
        lines: I,
        binaries: &BinaryPaths,
        runner: &RunnerConfig,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in lines.into_iter().map(str::trim).filter(|l| !l.is_empty()) {
            let mut pipe = ProcessRunner::pipe(
                ProcessRunner::new(&binaries.echo)
                    .arg(line)
                    .with_config(runner.clone()),
                ProcessRunner::new(&binaries.socat)
                    .arg("-")
                    .arg(format!("UNIX-CONNECT:{}", self.socket.display()))
                    .with_config(runner.clone()),
            );
            let result = pipe.execute_with_result(true).await;
            pipe.cleanup();

            let result = result?;
            if !result.success() {
                let stderr = result.stderr_lossy();
                tracing::warn!(
                    socket = %self.socket.display(),
                    exit_code = result.exit_code,
                    stderr = %stderr.trim(),
                    "Monitor command failed"
                );
                return Err(CoreError::Spawn(format!(
                    "{} (exit code {})",
                    binaries.socat, result.exit_code
                )));
            }
            tracing::debug!(socket = %self.socket.display(), command = %line, "Monitor command sent");
        }
        Ok(())
    }
}

/// A piece of information published as a control path.
#[derive(Debug, Clone)]
pub struct InfoConnector {
    info: String,
}

impl InfoConnector {
    /// Publish `info`, e.g. `tcp/8090`.
    pub fn new(info: impl Into<String>) -> Self {
        Self { info: info.into() }
    }

    /// The published information.
    pub fn info(&self) -> &str {
        &self.info
    }
}

/// A USB device an emulator can attach through its monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDeviceInfo {
    /// Vendor name.
    pub vendor: String,
    /// Device name.
    pub device: String,
    /// USB vendor ID.
    pub id_vendor: u16,
    /// USB product ID.
    pub id_device: u16,
    /// Monitor command that attaches the device.
    pub connect_command: String,
    /// Monitor command that detaches it again.
    pub disconnect_command: String,
    /// Free-form device class.
    pub device_type: String,
}

impl UsbDeviceInfo {
    /// Describe a device, deriving the attach/detach monitor commands.
    pub fn new(
        vendor: impl Into<String>,
        device: impl Into<String>,
        id_vendor: u16,
        id_device: u16,
        device_type: impl Into<String>,
    ) -> Self {
        let qemu_id = format!("device{id_vendor:04x}{id_device:04x}");
        Self {
            vendor: vendor.into(),
            device: device.into(),
            id_vendor,
            id_device,
            connect_command: format!(
                "device_add usb-host,vendorid={id_vendor:#06x},productid={id_device:#06x},id={qemu_id}"
            ),
            disconnect_command: format!("device_del {qemu_id}"),
            device_type: device_type.into(),
        }
    }
}

/// USB devices offered by a component. No process behind it.
#[derive(Debug, Clone, Default)]
pub struct UsbInfoConnector {
    devices: Vec<UsbDeviceInfo>,
}

impl UsbInfoConnector {
    /// Publish `devices`.
    pub fn new(devices: Vec<UsbDeviceInfo>) -> Self {
        Self { devices }
    }

    /// The published devices.
    pub fn devices(&self) -> &[UsbDeviceInfo] {
        &self.devices
    }
}

fn join(resource: &Url, path: &str) -> Result<Url> {
    resource
        .join(path)
        .map_err(|e| CoreError::InvalidArgument(format!("invalid control path '{path}': {e}")))
}

/// Switch an http(s) URL to the matching ws(s) scheme.
pub(crate) fn to_websocket(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(CoreError::InvalidArgument(format!(
                "cannot derive a websocket URL from scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        CoreError::InvalidArgument(format!("cannot switch {url} to scheme {scheme}"))
    })?;
    Ok(url)
}

/// Wait until `path` exists.
pub(crate) async fn wait_for_socket(path: &Path, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        if tokio::fs::try_exists(path).await? {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(CoreError::not_found("socket", path.display()));
        }
        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> Url {
        Url::parse("http://localhost:8080/components/abc/").expect("url")
    }

    #[test]
    fn test_console_control_path() {
        let console = ControlConnector::Console(ConsoleConnector::new("/tmp/x/monitor.sock"));
        assert_eq!(console.protocol(), "qemu");
        assert_eq!(
            console.control_path(&resource()).expect("path").as_str(),
            "ws://localhost:8080/components/abc/qemu"
        );
        assert!(console.is_stream());
    }

    #[test]
    fn test_secure_base_gives_wss() {
        let console = ControlConnector::Console(ConsoleConnector::new("/tmp/x/monitor.sock"));
        let resource = Url::parse("https://eaas.example.org/components/abc/").expect("url");
        assert_eq!(
            console.control_path(&resource).expect("path").scheme(),
            "wss"
        );
    }

    #[test]
    fn test_info_control_path() {
        let info = ControlConnector::Info(InfoConnector::new("tcp/8090"));
        assert_eq!(info.protocol(), "info");
        assert_eq!(
            info.control_path(&resource()).expect("path").as_str(),
            "http://localhost:8080/components/abc/info/tcp/8090"
        );
        assert!(!info.is_stream());
    }

    #[tokio::test]
    async fn test_info_cannot_connect() {
        let usb = ControlConnector::UsbInfo(UsbInfoConnector::default());
        assert!(matches!(
            usb.connect("req").await,
            Err(CoreError::InvalidArgument(_))
        ));
        usb.close().await;
    }

    #[test]
    fn test_usb_device_commands() {
        let device = UsbDeviceInfo::new("Logitech", "Mouse", 0x046d, 0xc077, "hid");
        assert_eq!(
            device.connect_command,
            "device_add usb-host,vendorid=0x046d,productid=0xc077,id=device046dc077"
        );
        assert_eq!(device.disconnect_command, "device_del device046dc077");

        let json = serde_json::to_value(&device).expect("serialize");
        assert_eq!(json["idVendor"], 0x046d);
        assert_eq!(json["deviceType"], "hid");
    }

    #[tokio::test]
    async fn test_console_connect_waits_for_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("monitor.sock");
        let console = ConsoleConnector::new(&path);

        let writer = {
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                tokio::fs::write(&path, b"").await.expect("create socket stand-in");
            })
        };

        let connected = console.connect().await.expect("socket appears");
        assert_eq!(connected, path);
        writer.await.expect("writer task");
    }

    #[tokio::test]
    async fn test_wait_for_socket_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = wait_for_socket(&dir.path().join("never"), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_send_commands_through_pipe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("commands.log");
        // stand-in for socat: append stdin to a file
        let script = dir.path().join("fake-socat");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ncat >> '{}'\n", log.display()),
        )
        .expect("write script");
        make_executable(&script);

        let binaries = BinaryPaths {
            socat: script.display().to_string(),
            ..Default::default()
        };
        let console = ConsoleConnector::new(dir.path().join("monitor.sock"));
        console
            .send_commands(
                "info status\n\n  system_powerdown \n".lines(),
                &binaries,
                &RunnerConfig::default(),
            )
            .await
            .expect("commands sent");

        let written = std::fs::read_to_string(&log).expect("log");
        assert_eq!(written, "info status\nsystem_powerdown\n");
    }

    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }
}
