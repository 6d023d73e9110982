//! Virtual networks: a switch component plus the components plugged into it.
//!
//! Membership is tied to the member's lifecycle: joining a network registers
//! a cleanup hook on the member, so destroying the member unplugs it.
//! Removing a network unplugs everyone, destroys ephemeral members and then
//! the switch.

mod session;

pub use session::{
    Lifetime, LifetimeUnit, NetworkConnectionInfo, NetworkSession, NetworkSessionInfo,
    SessionComponent, SessionComponentInfo, SessionRegistry,
};

use crate::component::{Capability, ComponentConfig, ComponentId};
use crate::connector::{ETHERNET_PROTOCOL, INFO_PROTOCOL};
use crate::error::{CoreError, Result};
use crate::hwaddr::normalize_hw_address;
use crate::manager::ComponentManager;
use crate::node_tcp::NodeTcpConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Pick the first ethernet connector of a component.
pub const AUTO_HW_ADDRESS: &str = "auto";

fn auto_hw_address() -> String {
    AUTO_HW_ADDRESS.to_string()
}

/// A component to plug into a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkComponentRequest {
    /// Component ID.
    pub component_id: String,
    /// NIC to plug in, or `auto`.
    #[serde(default = "auto_hw_address")]
    pub hw_address: String,
    /// Destroy the component together with the network.
    #[serde(default)]
    pub ephemeral: bool,
    /// Label shown in the network listing.
    #[serde(default)]
    pub custom_name: Option<String>,
}

impl NetworkComponentRequest {
    /// Plug in the first NIC of `component_id`.
    pub fn new(component_id: impl Into<String>) -> Self {
        Self {
            component_id: component_id.into(),
            hw_address: auto_hw_address(),
            ephemeral: false,
            custom_name: None,
        }
    }
}

/// Gateway from the virtual network to the host's TCP stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpGatewayConfig {
    /// Offer a SOCKS5 proxy instead of a fixed forward.
    #[serde(default)]
    pub socks: bool,
    /// Optional SOCKS credentials.
    #[serde(default)]
    pub socks_user: Option<String>,
    /// Optional SOCKS credentials.
    #[serde(default)]
    pub socks_passwd: Option<String>,
    /// Guest address to forward to.
    #[serde(default)]
    pub server_ip: Option<String>,
    /// Guest port to forward to.
    #[serde(default)]
    pub server_port: Option<u16>,
}

impl From<&TcpGatewayConfig> for NodeTcpConfig {
    fn from(gateway: &TcpGatewayConfig) -> Self {
        Self {
            socks_mode: gateway.socks,
            socks_user: gateway.socks_user.clone(),
            socks_passwd: gateway.socks_passwd.clone(),
            dest_ip: gateway.server_ip.clone(),
            dest_port: gateway.server_port,
            ..Default::default()
        }
    }
}

/// Network creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequest {
    /// Components to plug in right away.
    #[serde(default)]
    pub components: Vec<NetworkComponentRequest>,
    /// Optional TCP gateway.
    #[serde(default)]
    pub tcp_gateway: Option<TcpGatewayConfig>,
    /// Optional lifetime.
    #[serde(default)]
    pub lifetime: Option<Lifetime>,
}

/// Result of creating a network.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkResponse {
    /// Network ID.
    pub id: String,
    /// Extra endpoints, e.g. `tcp` for the gateway.
    pub urls: BTreeMap<String, String>,
}

/// Network service on top of a [`ComponentManager`].
pub struct Networks {
    manager: Arc<ComponentManager>,
    sessions: SessionRegistry,
    this: Weak<Networks>,
}

impl Networks {
    /// Create the service.
    pub fn new(manager: Arc<ComponentManager>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            manager,
            sessions: SessionRegistry::new(),
            this: this.clone(),
        })
    }

    /// The component manager networks are built from.
    pub fn manager(&self) -> &Arc<ComponentManager> {
        &self.manager
    }

    /// All live sessions.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Snapshot of one network.
    pub fn info(&self, network_id: &str) -> Result<NetworkSessionInfo> {
        Ok(self.sessions.get(network_id)?.info())
    }

    /// Create a network.
    ///
    /// On any failure the partially built network is removed again.
    pub async fn create(&self, request: NetworkRequest) -> Result<NetworkResponse> {
        let switch_id = self.manager.create(ComponentConfig::Switch).await?;
        let session = Arc::new(NetworkSession::new(switch_id));
        let id = session.id().to_string();
        self.sessions.register(Arc::clone(&session));

        match self.populate(&session, &request).await {
            Ok(urls) => {
                tracing::info!(
                    network_id = %id,
                    switch_id = %switch_id,
                    components = request.components.len(),
                    "Network created"
                );
                Ok(NetworkResponse { id, urls })
            }
            Err(e) => {
                tracing::warn!(network_id = %id, error = %e, "Network creation failed");
                if let Err(re) = self.remove(&id).await {
                    tracing::warn!(network_id = %id, error = %re, "Failed to remove network");
                }
                Err(e)
            }
        }
    }

    async fn populate(
        &self,
        session: &Arc<NetworkSession>,
        request: &NetworkRequest,
    ) -> Result<BTreeMap<String, String>> {
        let mut urls = BTreeMap::new();

        if let Some(gateway) = &request.tcp_gateway {
            let gateway_id = self
                .manager
                .create(ComponentConfig::NodeTcp(NodeTcpConfig::from(gateway)))
                .await?;
            let mut member = NetworkComponentRequest::new(gateway_id.to_string());
            member.ephemeral = true;
            if let Err(e) = self.connect(session, &member).await {
                if let Err(de) = self.manager.destroy(gateway_id).await {
                    tracing::warn!(
                        component_id = %gateway_id,
                        error = %de,
                        "Failed to destroy TCP gateway"
                    );
                }
                return Err(e);
            }
            if let Some(info) = self.manager.control_urls(gateway_id).await?.remove(INFO_PROTOCOL) {
                urls.insert("tcp".to_string(), info);
            }
        }

        for member in &request.components {
            self.connect(session, member).await?;
        }

        if let Some(lifetime) = &request.lifetime {
            self.set_lifetime(session.id(), lifetime)?;
        }
        Ok(urls)
    }

    /// Plug a component into an existing network.
    pub async fn add_component(
        &self,
        network_id: &str,
        request: &NetworkComponentRequest,
    ) -> Result<()> {
        let session = self.sessions.get(network_id)?;
        self.connect(&session, request).await
    }

    async fn connect(
        &self,
        session: &Arc<NetworkSession>,
        request: &NetworkComponentRequest,
    ) -> Result<()> {
        let component = self
            .manager
            .get_component_by_id(&request.component_id, Capability::Ethernet)
            .await?;
        let component_id = component.id();
        if session.contains(component_id) {
            return Err(CoreError::DuplicateEndpoint(format!(
                "component {component_id} in network {}",
                session.id()
            )));
        }

        let url = ethernet_url(&component.control_urls()?, &request.hw_address)?;
        self.manager
            .get(session.switch_id(), Capability::Switch)
            .await?
            .switch()?
            .connect_endpoint(&url)
            .await?;

        let member = Arc::new(SessionComponent::new(
            component_id,
            url.clone(),
            request.ephemeral,
            request.custom_name.clone(),
        ));
        let registered = session.insert(Arc::clone(&member)).and_then(|()| {
            let networks = self.this.clone();
            let network_id = session.id().to_string();
            let hooked = Arc::clone(&member);
            component.register_cleanup(format!("network-disconnect/{network_id}"), move || async move {
                hooked.mark_released();
                match networks.upgrade() {
                    Some(networks) => networks.release(&network_id, &hooked).await,
                    None => Ok(()),
                }
            })
        });

        if let Err(e) = registered {
            session.remove_component(component_id);
            if let Err(de) = self.disconnect_member(session, &member).await {
                tracing::warn!(component_id = %component_id, error = %de, "Failed to undo connection");
            }
            return Err(e);
        }

        tracing::info!(
            network_id = %session.id(),
            component_id = %component_id,
            ethernet_url = %url,
            ephemeral = request.ephemeral,
            "Component connected to network"
        );
        Ok(())
    }

    /// Called from a member's cleanup hook while the member is destroyed.
    async fn release(&self, network_id: &str, member: &Arc<SessionComponent>) -> Result<()> {
        let Ok(session) = self.sessions.get(network_id) else {
            return Ok(());
        };
        session.remove_component(member.id());
        self.disconnect_member(&session, member).await
    }

    async fn disconnect_member(
        &self,
        session: &NetworkSession,
        member: &SessionComponent,
    ) -> Result<()> {
        let Some(url) = member.take_connection() else {
            return Ok(());
        };
        self.manager
            .get(session.switch_id(), Capability::Switch)
            .await?
            .switch()?
            .disconnect_endpoint(&url)
            .await?;
        tracing::info!(
            network_id = %session.id(),
            component_id = %member.id(),
            "Component disconnected from network"
        );
        Ok(())
    }

    /// Unplug a component but keep it listed as a member.
    ///
    /// Disconnecting twice is a no-op.
    pub async fn disconnect_component(&self, network_id: &str, component_id: &str) -> Result<()> {
        let session = self.sessions.get(network_id)?;
        let member = self.member(&session, component_id)?;
        self.disconnect_member(&session, &member).await
    }

    /// Unplug a component and drop it from the network. Ephemeral members
    /// are destroyed as well.
    pub async fn remove_component(&self, network_id: &str, component_id: &str) -> Result<()> {
        let session = self.sessions.get(network_id)?;
        let member = self.member(&session, component_id)?;
        session.remove_component(member.id());
        self.disconnect_member(&session, &member).await?;
        if member.is_ephemeral() && !member.is_released() {
            self.manager.destroy(member.id()).await?;
        }
        Ok(())
    }

    fn member(&self, session: &NetworkSession, component_id: &str) -> Result<Arc<SessionComponent>> {
        let id: ComponentId = component_id.parse()?;
        session
            .component(id)
            .ok_or_else(|| CoreError::not_found("network member", component_id))
    }

    /// Remove a network.
    ///
    /// Every member is unplugged, ephemeral members are destroyed, then the
    /// switch. Errors along the way are logged and do not stop the removal.
    pub async fn remove(&self, network_id: &str) -> Result<()> {
        let session = self
            .sessions
            .remove(network_id)
            .ok_or_else(|| CoreError::not_found("network", network_id))?;
        session.cancel_expiry();

        for member in session.drain_components() {
            if let Err(e) = self.disconnect_member(&session, &member).await {
                tracing::warn!(
                    network_id = %network_id,
                    component_id = %member.id(),
                    error = %e,
                    "Failed to disconnect component"
                );
            }
            if member.is_ephemeral() && !member.is_released() {
                if let Err(e) = self.manager.destroy(member.id()).await {
                    tracing::warn!(component_id = %member.id(), error = %e, "Failed to destroy ephemeral component");
                }
            }
        }

        if let Err(e) = self.manager.destroy(session.switch_id()).await {
            tracing::warn!(network_id = %network_id, error = %e, "Failed to destroy switch");
        }
        tracing::info!(network_id = %network_id, "Network removed");
        Ok(())
    }

    /// Ask the network's switch for a fresh ethernet endpoint.
    pub async fn ws_connection(&self, network_id: &str) -> Result<String> {
        let session = self.sessions.get(network_id)?;
        let url = self
            .manager
            .get(session.switch_id(), Capability::Switch)
            .await?
            .connect_ethernet()?;
        Ok(url.to_string())
    }

    /// Schedule removal of a network, replacing any earlier schedule.
    pub fn set_lifetime(&self, network_id: &str, lifetime: &Lifetime) -> Result<DateTime<Utc>> {
        let session = self.sessions.get(network_id)?;
        let duration = lifetime.as_duration()?;
        let deadline = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .ok_or_else(|| CoreError::InvalidArgument(format!("lifetime {lifetime} is too long")))?;

        let networks = self.this.clone();
        let id = network_id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(networks) = networks.upgrade() {
                networks.expire(&id).await;
            }
        });
        session.set_expiry(deadline, task);

        tracing::info!(network_id = %network_id, lifetime = %lifetime, expires_at = %deadline, "Network lifetime set");
        Ok(deadline)
    }

    async fn expire(&self, network_id: &str) {
        if let Ok(session) = self.sessions.get(network_id) {
            session.clear_expiry();
        }
        tracing::info!(network_id = %network_id, "Network lifetime expired");
        if let Err(e) = self.remove(network_id).await {
            tracing::debug!(network_id = %network_id, error = %e, "Expired network already gone");
        }
    }

    /// Remove every network. Used on shutdown.
    pub async fn remove_all(&self) {
        let ids = self.sessions.list();
        tracing::info!(count = ids.len(), "Removing all networks");
        for id in ids {
            if let Err(e) = self.remove(&id).await {
                tracing::debug!(network_id = %id, error = %e, "Network already gone");
            }
        }
    }
}

/// Control URL of the ethernet connector `hw_address` (or the first one for
/// `auto`).
fn ethernet_url(urls: &BTreeMap<String, String>, hw_address: &str) -> Result<String> {
    let prefix = format!("{ETHERNET_PROTOCOL}+");
    let found = if hw_address.eq_ignore_ascii_case(AUTO_HW_ADDRESS) {
        urls.iter()
            .find(|(protocol, _)| protocol.starts_with(&prefix))
            .map(|(_, url)| url.clone())
    } else {
        let hw = normalize_hw_address(hw_address)?;
        urls.get(&format!("{prefix}{hw}")).cloned()
    };
    found.ok_or_else(|| CoreError::not_found("ethernet connector", hw_address))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("qemu".to_string(), "ws://h/components/c/qemu".to_string()),
            (
                "ws+ethernet+52:54:00:00:00:0b".to_string(),
                "ws://h/components/c/ws+ethernet/52:54:00:00:00:0b".to_string(),
            ),
            (
                "ws+ethernet+52:54:00:00:00:0a".to_string(),
                "ws://h/components/c/ws+ethernet/52:54:00:00:00:0a".to_string(),
            ),
        ])
    }

    #[test]
    fn test_ethernet_url_auto_picks_first() {
        let url = ethernet_url(&urls(), "auto").expect("found");
        assert!(url.ends_with("52:54:00:00:00:0a"));
    }

    #[test]
    fn test_ethernet_url_explicit() {
        let url = ethernet_url(&urls(), "52:54:00:00:00:0B").expect("found");
        assert!(url.ends_with("52:54:00:00:00:0b"));
        assert!(matches!(
            ethernet_url(&urls(), "52:54:00:00:00:0c"),
            Err(CoreError::NotFound { .. })
        ));
        assert!(ethernet_url(&urls(), "nope").is_err());
        assert!(ethernet_url(&BTreeMap::new(), "auto").is_err());
    }

    #[test]
    fn test_request_defaults() {
        let request: NetworkRequest = serde_json::from_str(
            r#"{
                "components": [{"componentId": "abc"}],
                "tcpGateway": {"serverIp": "10.0.0.2", "serverPort": 80},
                "lifetime": {"value": 5, "unit": "minutes"}
            }"#,
        )
        .expect("parse");
        assert_eq!(request.components[0].hw_address, AUTO_HW_ADDRESS);
        assert!(!request.components[0].ephemeral);

        let node = NodeTcpConfig::from(request.tcp_gateway.as_ref().expect("gateway"));
        assert!(!node.socks_mode);
        assert_eq!(node.dest_port, Some(80));
        assert_eq!(request.lifetime, Some(Lifetime::new(5, LifetimeUnit::Minutes)));

        let empty: NetworkRequest = serde_json::from_str("{}").expect("parse");
        assert!(empty.components.is_empty());
    }
}
