//! TCP gateway / DHCP helper nodes attached to their own hub.

use crate::component::{NodeContext, ProcessGroup};
use crate::connector::{ControlConnector, EthernetConnector, InfoConnector};
use crate::error::{CoreError, Result};
use crate::hwaddr::{normalize_hw_address, random_hw_address};
use crate::ports::PortLease;
use emucomp_process::ProcessRunner;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// How a gateway node behaves.
///
/// Either a DHCP server for `dhcp_network_address/dhcp_network_mask`, a
/// SOCKS5 proxy, or a plain forward to `dest_ip:dest_port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTcpConfig {
    /// Address of the node's NIC; random when absent.
    #[serde(default)]
    pub hw_address: Option<String>,
    /// Run as DHCP server.
    #[serde(default)]
    pub dhcp: bool,
    /// Network served in DHCP mode.
    #[serde(default)]
    pub dhcp_network_address: Option<String>,
    /// Netmask served in DHCP mode.
    #[serde(default)]
    pub dhcp_network_mask: Option<String>,
    /// Act as SOCKS5 proxy.
    #[serde(default)]
    pub socks_mode: bool,
    /// Optional SOCKS credentials.
    #[serde(default)]
    pub socks_user: Option<String>,
    /// Optional SOCKS credentials.
    #[serde(default)]
    pub socks_passwd: Option<String>,
    /// Forward target in plain TCP mode.
    #[serde(default)]
    pub dest_ip: Option<String>,
    /// Forward target in plain TCP mode.
    #[serde(default)]
    pub dest_port: Option<u16>,
}

/// Runner arguments and the information to publish for them.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RunnerInvocation {
    pub args: Vec<String>,
    pub info: Option<String>,
}

impl NodeTcpConfig {
    /// Build the runner command line.
    ///
    /// `guest_hw` is the address the runner uses on the hub in gateway mode.
    pub(crate) fn invocation(
        &self,
        port: u16,
        switch: &Path,
        guest_hw: &str,
    ) -> Result<RunnerInvocation> {
        let switch = switch.display().to_string();

        if self.dhcp {
            let (Some(net), Some(mask)) = (&self.dhcp_network_address, &self.dhcp_network_mask)
            else {
                return Err(invalid("dhcp mode needs a network address and mask"));
            };
            return Ok(RunnerInvocation {
                args: vec![
                    String::new(),
                    switch,
                    String::new(),
                    format!("{net}/{mask}"),
                    "dhcpd".into(),
                ],
                info: None,
            });
        }

        let mut args = vec![port.to_string(), switch, guest_hw.to_string(), "dhcp".into()];
        let info = if self.socks_mode {
            match (&self.socks_user, &self.socks_passwd) {
                (Some(user), Some(passwd)) => {
                    args.push(format!("socks5:{user}:{passwd}"));
                    format!("socks/{port}/{user}/{passwd}")
                }
                _ => {
                    args.push("socks5".into());
                    format!("socks/{port}")
                }
            }
        } else {
            let (Some(ip), Some(dest_port)) = (&self.dest_ip, self.dest_port) else {
                return Err(invalid("expected socks mode or a destination ip and port"));
            };
            args.push(ip.clone());
            args.push(dest_port.to_string());
            format!("tcp/{port}")
        };

        Ok(RunnerInvocation {
            args,
            info: Some(info),
        })
    }
}

fn invalid(reason: &str) -> CoreError {
    CoreError::InvalidArgument(format!("invalid node tcp config: {reason}"))
}

pub(crate) struct NodeTcp {
    config: NodeTcpConfig,
    hw_address: String,
    lease: Mutex<Option<PortLease>>,
    processes: ProcessGroup,
}

impl NodeTcp {
    pub(crate) fn new(config: NodeTcpConfig) -> Result<Self> {
        let hw_address = match &config.hw_address {
            Some(hw) => normalize_hw_address(hw)?,
            None => random_hw_address(),
        };
        Ok(Self {
            config,
            hw_address,
            lease: Mutex::new(None),
            processes: ProcessGroup::default(),
        })
    }

    pub(crate) async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<Vec<ControlConnector>> {
        let lease = ctx.ports.acquire()?;
        let port = lease.port();
        // held by the node so destroy releases it on every path
        *self.lease.lock().unwrap_or_else(PoisonError::into_inner) = Some(lease);

        let hub = ctx.work_dir.join(format!("nic_{}", self.hw_address));
        let invocation = self.config.invocation(port, &hub, &random_hw_address())?;

        self.processes
            .start(
                ProcessRunner::new(&ctx.binaries.vde_switch)
                    .args(["-hub", "-s"])
                    .arg(hub.display().to_string())
                    .with_config(ctx.runner.clone()),
            )
            .await?;
        self.processes
            .start(
                ProcessRunner::new(&ctx.binaries.node_tcp_runner)
                    .args(invocation.args)
                    .with_config(ctx.runner.clone()),
            )
            .await?;

        let mut connectors = Vec::new();
        if let Some(info) = invocation.info {
            tracing::info!(component_id = %ctx.id, port, info = %info, "TCP gateway listening");
            connectors.push(ControlConnector::Info(InfoConnector::new(info)));
        }
        connectors.push(ControlConnector::Ethernet(Arc::new(EthernetConnector::new(
            self.hw_address.clone(),
            &hub,
            ctx.work_dir,
            ctx.binaries,
            ctx.runner.clone(),
        ))));
        Ok(connectors)
    }

    pub(crate) async fn destroy(&self) {
        self.processes.stop_all().await;
        let lease = self.lease.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(lease);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUB: &str = "/w/nic_52:54:00:00:00:01";

    fn invoke(config: &NodeTcpConfig) -> Result<RunnerInvocation> {
        config.invocation(8090, Path::new(HUB), "52:54:00:00:00:02")
    }

    #[test]
    fn test_dhcp_mode() {
        let config = NodeTcpConfig {
            dhcp: true,
            dhcp_network_address: Some("10.0.0.0".into()),
            dhcp_network_mask: Some("24".into()),
            ..Default::default()
        };
        let invocation = invoke(&config).expect("valid");
        assert_eq!(invocation.args, ["", HUB, "", "10.0.0.0/24", "dhcpd"]);
        assert_eq!(invocation.info, None);
    }

    #[test]
    fn test_dhcp_without_network_is_invalid() {
        let config = NodeTcpConfig {
            dhcp: true,
            ..Default::default()
        };
        assert!(matches!(invoke(&config), Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_socks_mode() {
        let config = NodeTcpConfig {
            socks_mode: true,
            ..Default::default()
        };
        let invocation = invoke(&config).expect("valid");
        assert_eq!(
            invocation.args,
            ["8090", HUB, "52:54:00:00:00:02", "dhcp", "socks5"]
        );
        assert_eq!(invocation.info.as_deref(), Some("socks/8090"));
    }

    #[test]
    fn test_socks_mode_with_credentials() {
        let config = NodeTcpConfig {
            socks_mode: true,
            socks_user: Some("u".into()),
            socks_passwd: Some("p".into()),
            ..Default::default()
        };
        let invocation = invoke(&config).expect("valid");
        assert_eq!(invocation.args.last().map(String::as_str), Some("socks5:u:p"));
        assert_eq!(invocation.info.as_deref(), Some("socks/8090/u/p"));
    }

    #[test]
    fn test_tcp_forward_mode() {
        let config = NodeTcpConfig {
            dest_ip: Some("10.0.0.5".into()),
            dest_port: Some(80),
            ..Default::default()
        };
        let invocation = invoke(&config).expect("valid");
        assert_eq!(
            invocation.args,
            ["8090", HUB, "52:54:00:00:00:02", "dhcp", "10.0.0.5", "80"]
        );
        assert_eq!(invocation.info.as_deref(), Some("tcp/8090"));
    }

    #[test]
    fn test_no_mode_is_invalid() {
        assert!(invoke(&NodeTcpConfig::default()).is_err());
        let half = NodeTcpConfig {
            dest_ip: Some("10.0.0.5".into()),
            ..Default::default()
        };
        assert!(invoke(&half).is_err());
    }

    #[test]
    fn test_explicit_hw_address_validated() {
        let config = NodeTcpConfig {
            hw_address: Some("zz".into()),
            ..Default::default()
        };
        assert!(NodeTcp::new(config).is_err());
    }
}
