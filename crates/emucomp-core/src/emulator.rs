//! Emulator components: an emulator process with a monitor socket and one
//! private switch per virtual NIC.

use crate::component::{NodeContext, ProcessGroup};
use crate::connector::{
    ConsoleConnector, ControlConnector, EthernetConnector, UsbDeviceInfo, UsbInfoConnector,
};
use crate::error::Result;
use crate::hwaddr::normalize_hw_address;
use emucomp_process::ProcessRunner;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

fn default_console() -> bool {
    true
}

fn default_nic_model() -> String {
    "e1000".to_string()
}

/// How to launch an emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatorConfig {
    /// Emulator executable, e.g. `qemu-system-x86_64`.
    pub binary: String,
    /// Arguments passed before the generated monitor and NIC arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Expose a monitor socket as the `qemu` console connector.
    #[serde(default = "default_console")]
    pub console: bool,
    /// One hardware address per virtual NIC.
    #[serde(default)]
    pub nics: Vec<String>,
    /// Device model used for NICs.
    #[serde(default = "default_nic_model")]
    pub nic_model: String,
    /// USB devices published through a `usb` connector.
    #[serde(default)]
    pub usb_devices: Vec<UsbDeviceInfo>,
}

impl EmulatorConfig {
    /// A config running `binary` with no NICs and a console.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            console: true,
            nics: Vec::new(),
            nic_model: default_nic_model(),
            usb_devices: Vec::new(),
        }
    }
}

pub(crate) struct EmulatorNode {
    config: EmulatorConfig,
    processes: ProcessGroup,
}

impl EmulatorNode {
    pub(crate) fn new(mut config: EmulatorConfig) -> Result<Self> {
        config.nics = config
            .nics
            .iter()
            .map(|hw| normalize_hw_address(hw))
            .collect::<Result<_>>()?;
        Ok(Self {
            config,
            processes: ProcessGroup::default(),
        })
    }

    pub(crate) async fn initialize(&self, ctx: &NodeContext<'_>) -> Result<Vec<ControlConnector>> {
        let mut connectors = Vec::new();
        let mut args = self.config.args.clone();

        if self.config.console {
            let monitor = ctx.work_dir.join("monitor.sock");
            args.push("-monitor".into());
            args.push(format!("unix:{},server,nowait", monitor.display()));
            connectors.push(ControlConnector::Console(ConsoleConnector::new(monitor)));
        }

        for (index, hw) in self.config.nics.iter().enumerate() {
            let nic_dir = ctx.work_dir.join(format!("nic_{hw}"));
            self.processes
                .start(
                    ProcessRunner::new(&ctx.binaries.vde_switch)
                        .arg("-s")
                        .arg(nic_dir.display().to_string())
                        .with_config(ctx.runner.clone()),
                )
                .await?;
            args.extend(nic_args(index, hw, &self.config.nic_model, &nic_dir));
            connectors.push(ControlConnector::Ethernet(Arc::new(EthernetConnector::new(
                hw.clone(),
                &nic_dir,
                ctx.work_dir,
                ctx.binaries,
                ctx.runner.clone(),
            ))));
        }

        self.processes
            .start(
                ProcessRunner::new(&self.config.binary)
                    .args(args)
                    .current_dir(ctx.work_dir)
                    .with_config(ctx.runner.clone()),
            )
            .await?;

        if !self.config.usb_devices.is_empty() {
            connectors.push(ControlConnector::UsbInfo(UsbInfoConnector::new(
                self.config.usb_devices.clone(),
            )));
        }

        tracing::debug!(
            component_id = %ctx.id,
            nics = self.config.nics.len(),
            connectors = connectors.len(),
            "Emulator started"
        );
        Ok(connectors)
    }

    pub(crate) async fn destroy(&self) {
        self.processes.stop_all().await;
    }
}

fn nic_args(index: usize, hw: &str, model: &str, nic_dir: &Path) -> [String; 4] {
    [
        "-netdev".into(),
        format!("vde,id=net{index},sock={}", nic_dir.display()),
        "-device".into(),
        format!("{model},netdev=net{index},mac={hw}"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nic_args() {
        let args = nic_args(1, "52:54:00:aa:bb:cc", "e1000", Path::new("/w/nic_52:54:00:aa:bb:cc"));
        assert_eq!(
            args,
            [
                "-netdev".to_string(),
                "vde,id=net1,sock=/w/nic_52:54:00:aa:bb:cc".to_string(),
                "-device".to_string(),
                "e1000,netdev=net1,mac=52:54:00:aa:bb:cc".to_string(),
            ]
        );
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: EmulatorConfig =
            serde_json::from_str(r#"{"binary": "qemu-system-x86_64"}"#).expect("parse");
        assert_eq!(config, EmulatorConfig::new("qemu-system-x86_64"));
        assert!(config.console);
    }

    #[test]
    fn test_invalid_nic_rejected() {
        let mut config = EmulatorConfig::new("qemu");
        config.nics = vec!["not-a-mac".into()];
        assert!(EmulatorNode::new(config).is_err());
    }

    #[test]
    fn test_nics_normalized() {
        let mut config = EmulatorConfig::new("qemu");
        config.nics = vec!["52:54:00:AA:BB:CC".into()];
        let node = EmulatorNode::new(config).expect("valid");
        assert_eq!(node.config.nics, vec!["52:54:00:aa:bb:cc".to_string()]);
    }
}
