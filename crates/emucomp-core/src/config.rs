//! Manager configuration types.

use crate::error::CoreError;
use emucomp_process::RunnerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Default working directory for component state and sockets.
pub const DEFAULT_WORK_DIR: &str = "/tmp/emucomp";

/// Default public base URL that control paths are derived from.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";

/// External programs the components are built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryPaths {
    /// Virtual switch daemon.
    pub vde_switch: String,
    /// Plugs a byte stream into a switch.
    pub vde_plug: String,
    /// Link helper used for unix socket listeners and monitor commands.
    pub socat: String,
    /// WebSocket to process bridge used by remote switch connections.
    pub websocat: String,
    /// TCP gateway / DHCP helper attached to a hub.
    pub node_tcp_runner: String,
    /// Used to feed monitor commands into the link helper.
    pub echo: String,
}

impl Default for BinaryPaths {
    fn default() -> Self {
        Self {
            vde_switch: "vde_switch".into(),
            vde_plug: "vde_plug".into(),
            socat: "socat".into(),
            websocat: "/libexec/websocat".into(),
            node_tcp_runner: "/libexec/eaas-proxy".into(),
            echo: "echo".into(),
        }
    }
}

/// Inclusive range of TCP ports handed out to gateway nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    /// First port.
    pub start: u16,
    /// Last port, inclusive.
    pub end: u16,
}

impl PortRange {
    /// Create a range, rejecting `start > end`.
    pub fn new(start: u16, end: u16) -> Result<Self, CoreError> {
        if start > end {
            return Err(CoreError::Config(format!(
                "port range start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Always false; a range holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over all ports.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 8090,
            end: 8189,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PortRange {
    type Err = CoreError;

    /// Parse `start-end`, or a single port.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|e| CoreError::Config(format!("invalid port '{p}': {e}")))
        };
        match s.split_once('-') {
            Some((start, end)) => Self::new(parse(start)?, parse(end)?),
            None => {
                let port = parse(s)?;
                Self::new(port, port)
            }
        }
    }
}

/// Configuration for [`ComponentManager`](crate::ComponentManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root of per-component working directories.
    pub work_dir: PathBuf,
    /// Public base URL of the gateway; control paths are resolved against it.
    pub base_url: Url,
    /// External programs.
    pub binaries: BinaryPaths,
    /// Ports available to TCP gateway nodes.
    pub tcp_ports: PortRange,
    /// Maximum number of live components (default: 100, 0 = unlimited).
    pub max_components: usize,
    /// Settings applied to every spawned subprocess.
    pub runner: RunnerConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            base_url: default_base_url(),
            binaries: BinaryPaths::default(),
            tcp_ports: PortRange::default(),
            max_components: 100,
            runner: RunnerConfig::default(),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("DEFAULT_BASE_URL is a valid URL")
}

impl ManagerConfig {
    /// Create a new config builder.
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(CoreError::Config("work_dir is required".into()));
        }
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "base_url must be http or https, got '{}'",
                self.base_url.scheme()
            )));
        }
        if self.base_url.cannot_be_a_base() {
            return Err(CoreError::Config("base_url cannot be a base".into()));
        }
        self.runner
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))?;
        Ok(())
    }
}

/// Builder for ManagerConfig.
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Set the working directory.
    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    /// Set the public base URL.
    ///
    /// A missing trailing slash is added so relative control paths resolve
    /// below it instead of replacing its last segment.
    pub fn base_url(mut self, mut url: Url) -> Self {
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        self.config.base_url = url;
        self
    }

    /// Set the external programs.
    pub fn binaries(mut self, binaries: BinaryPaths) -> Self {
        self.config.binaries = binaries;
        self
    }

    /// Set the gateway port range.
    pub fn tcp_ports(mut self, range: PortRange) -> Self {
        self.config.tcp_ports = range;
        self
    }

    /// Set the component limit (0 = unlimited).
    pub fn max_components(mut self, max: usize) -> Self {
        self.config.max_components = max;
        self
    }

    /// Set the subprocess settings.
    pub fn runner(mut self, runner: RunnerConfig) -> Self {
        self.config.runner = runner;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<ManagerConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
