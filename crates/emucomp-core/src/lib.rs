//! # emucomp-core
//!
//! Component supervision for emulation services.
//!
//! This crate starts emulators, virtual switches and TCP gateway nodes as
//! supervised host processes, exposes their control channels as
//! connectors, and wires components together into virtual networks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   emucomp-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │    Networks     │────▶│  SessionRegistry         │    │
//! │  │   - create()    │     │  (switch + members)      │    │
//! │  │   - remove()    │     └──────────────────────────┘    │
//! │  └─────────────────┘                                     │
//! │           │                                              │
//! │           ▼                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │ComponentManager │────▶│  HashMap<ComponentId,    │    │
//! │  │   - create()    │     │           Component>     │    │
//! │  │   - get()       │     └──────────────────────────┘    │
//! │  │   - destroy()   │                │                    │
//! │  └─────────────────┘                ▼                    │
//! │                          ┌──────────────────────────┐    │
//! │  ┌─────────────────┐     │  ControlConnector        │    │
//! │  │  StreamBridge   │────▶│  console / ethernet      │    │
//! │  │  (ws ⇄ socket)  │     │  (unix sockets)          │    │
//! │  └─────────────────┘     └──────────────────────────┘    │
//! │                                                          │
//! └──────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │         emucomp-process: qemu, vde_switch, socat,        │
//! │              websocat, gateway runners                   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use emucomp_core::{ComponentConfig, ComponentManager, ManagerConfig, NetworkRequest, Networks};
//! use std::sync::Arc;
//!
//! # async fn example() -> emucomp_core::Result<()> {
//! let manager = Arc::new(ComponentManager::new(ManagerConfig::default()));
//! let networks = Networks::new(Arc::clone(&manager));
//!
//! let network = networks.create(NetworkRequest::default()).await?;
//! let url = networks.ws_connection(&network.id).await?;
//! println!("plug a client into {url}");
//!
//! networks.remove(&network.id).await?;
//! manager.destroy_all().await;
//! # Ok(())
//! # }
//! ```

mod bridge;
mod component;
mod config;
mod connector;
mod emulator;
mod error;
mod hwaddr;
mod manager;
mod network;
mod node_tcp;
mod ports;
mod switch;

pub use bridge::{
    BridgeEnd, BridgeMessage, ClientMessage, CloseFrame, StreamBridge, CLOSE_GOING_AWAY,
    CLOSE_INTERNAL_ERROR, CLOSE_NORMAL,
};
pub use component::{
    Capability, CleanupFuture, Component, ComponentConfig, ComponentId, ComponentKind,
    ComponentState,
};
pub use config::{
    BinaryPaths, ManagerConfig, ManagerConfigBuilder, PortRange, DEFAULT_BASE_URL,
    DEFAULT_WORK_DIR,
};
pub use connector::{
    ConsoleConnector, ControlConnector, EthernetConnector, InfoConnector, UsbDeviceInfo,
    UsbInfoConnector, CONSOLE_PROTOCOL, ETHERNET_PROTOCOL, INFO_PROTOCOL, USB_PROTOCOL,
};
pub use emulator::EmulatorConfig;
pub use error::{CoreError, ErrorKind, Result};
pub use hwaddr::{normalize_hw_address, random_hw_address};
pub use manager::ComponentManager;
pub use network::{
    Lifetime, LifetimeUnit, NetworkComponentRequest, NetworkConnectionInfo, NetworkRequest,
    NetworkResponse, NetworkSession, NetworkSessionInfo, Networks, SessionComponent,
    SessionComponentInfo, SessionRegistry, TcpGatewayConfig, AUTO_HW_ADDRESS,
};
pub use node_tcp::NodeTcpConfig;
pub use ports::{PortLease, PortPool};
pub use switch::{validate_endpoint, Connection, VdeSwitch};
