//! Configuration for the gateway.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use emucomp_core::{
    BinaryPaths, CoreError, ManagerConfig, PortRange, DEFAULT_BASE_URL, DEFAULT_WORK_DIR,
};
use emucomp_process::{RunnerConfig, DEFAULT_STOP_TIMEOUT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Configuration for the gateway server.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Public URL clients reach the gateway at.
    pub base_url: Url,

    /// Root of per-component working directories.
    pub work_dir: PathBuf,

    /// External programs.
    pub binaries: BinaryPaths,

    /// Ports handed to TCP gateway nodes.
    pub tcp_ports: PortRange,

    /// Maximum number of live components (default: 100).
    pub max_components: usize,

    /// Grace period between SIGTERM and SIGKILL.
    pub stop_timeout: Duration,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} not found: {path}")]
    MissingBinary { name: &'static str, path: String },

    #[error("invalid configuration: {0}")]
    Invalid(#[from] CoreError),
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let base = ManagerConfig::default();
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            base_url: base.base_url,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            binaries: base.binaries,
            tcp_ports: base.tcp_ports,
            max_components: base.max_components,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `EMUCOMP_HTTP_HOST` | `0.0.0.0` |
    /// | `EMUCOMP_HTTP_PORT` | `8080` |
    /// | `EMUCOMP_BASE_URL` | `http://localhost:8080/` |
    /// | `EMUCOMP_WORK_DIR` | `/tmp/emucomp` |
    /// | `EMUCOMP_VDE_SWITCH` | `vde_switch` |
    /// | `EMUCOMP_VDE_PLUG` | `vde_plug` |
    /// | `EMUCOMP_SOCAT` | `socat` |
    /// | `EMUCOMP_WEBSOCAT` | `/libexec/websocat` |
    /// | `EMUCOMP_NODE_TCP_RUNNER` | `/libexec/eaas-proxy` |
    /// | `EMUCOMP_TCP_PORTS` | `8090-8189` |
    /// | `EMUCOMP_MAX_COMPONENTS` | `100` |
    /// | `EMUCOMP_STOP_TIMEOUT_MS` | `5000` |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();

        let http_host: IpAddr = var("EMUCOMP_HTTP_HOST")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.ip());

        let http_port: u16 = var("EMUCOMP_HTTP_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.http_addr.port());

        let binary = |key: &str, fallback: String| var(key).unwrap_or(fallback);
        let binaries = BinaryPaths {
            vde_switch: binary("EMUCOMP_VDE_SWITCH", default.binaries.vde_switch),
            vde_plug: binary("EMUCOMP_VDE_PLUG", default.binaries.vde_plug),
            socat: binary("EMUCOMP_SOCAT", default.binaries.socat),
            websocat: binary("EMUCOMP_WEBSOCAT", default.binaries.websocat),
            node_tcp_runner: binary("EMUCOMP_NODE_TCP_RUNNER", default.binaries.node_tcp_runner),
            echo: default.binaries.echo,
        };

        Self {
            http_addr: SocketAddr::new(http_host, http_port),
            base_url: var("EMUCOMP_BASE_URL")
                .and_then(|v| Url::parse(&v).ok())
                .unwrap_or(default.base_url),
            work_dir: var("EMUCOMP_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.work_dir),
            binaries,
            tcp_ports: var("EMUCOMP_TCP_PORTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.tcp_ports),
            max_components: var("EMUCOMP_MAX_COMPONENTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_components),
            stop_timeout: var("EMUCOMP_STOP_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.stop_timeout),
        }
    }

    /// Build the component manager configuration.
    pub fn manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        let runner = RunnerConfig {
            stop_timeout: self.stop_timeout,
            ..Default::default()
        };
        Ok(ManagerConfig::builder()
            .work_dir(&self.work_dir)
            .base_url(self.base_url.clone())
            .binaries(self.binaries.clone())
            .tcp_ports(self.tcp_ports)
            .max_components(self.max_components)
            .runner(runner)
            .build()?)
    }

    fn required_binaries(&self) -> [(&'static str, &str); 5] {
        [
            ("vde_switch", &self.binaries.vde_switch),
            ("vde_plug", &self.binaries.vde_plug),
            ("socat", &self.binaries.socat),
            ("websocat", &self.binaries.websocat),
            ("node tcp runner", &self.binaries.node_tcp_runner),
        ]
    }

    /// Validate that all configured binaries can be found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.manager_config()?;
        for (name, path) in self.required_binaries() {
            if !binary_exists(path) {
                return Err(ConfigError::MissingBinary {
                    name,
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    ///
    /// Use this for development environments where tools may not be
    /// installed yet.
    pub fn validate_warn(&self) {
        for (name, path) in self.required_binaries() {
            if !binary_exists(path) {
                tracing::warn!(binary = name, path = %path, "Binary not found");
            }
        }
    }
}

/// A path with a separator must exist; a bare name must be on `PATH`.
fn binary_exists(program: &str) -> bool {
    if program.contains('/') {
        return Path::new(program).exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
