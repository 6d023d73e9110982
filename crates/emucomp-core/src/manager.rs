//! Component manager for lifecycle management of multiple components.

use crate::component::{Capability, Component, ComponentConfig, ComponentId};
use crate::config::ManagerConfig;
use crate::error::{CoreError, Result};
use crate::ports::PortPool;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Manages multiple component instances.
///
/// The ComponentManager is the registry every other part of the service
/// goes through: it creates components, resolves them by ID and capability,
/// and destroys them. It owns the shared port pool used by gateway nodes.
///
/// # Thread Safety
///
/// The registry sits behind an async RwLock and is never held while a
/// component starts or stops, so slow teardown of one component does not
/// block lookups of the others.
pub struct ComponentManager {
    components: Arc<RwLock<HashMap<ComponentId, Arc<Component>>>>,
    ports: Arc<PortPool>,
    config: ManagerConfig,
}

impl ComponentManager {
    /// Create a new component manager.
    pub fn new(config: ManagerConfig) -> Self {
        tracing::info!(
            work_dir = %config.work_dir.display(),
            base_url = %config.base_url,
            "Creating component manager"
        );
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ports: PortPool::new(config.tcp_ports),
            config,
        }
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The shared gateway port pool.
    pub fn ports(&self) -> &Arc<PortPool> {
        &self.ports
    }

    /// Create and start a component.
    ///
    /// The component is registered before it starts so cleanup hooks can be
    /// attached while it initialises. If starting fails it is torn down and
    /// unregistered again.
    ///
    /// # Errors
    ///
    /// Returns an error if the max_components limit is reached, the config
    /// is invalid, or a required process does not start.
    pub async fn create(&self, config: ComponentConfig) -> Result<ComponentId> {
        let id = ComponentId::new();
        let component = Arc::new(Component::new(id, config, &self.config)?);

        {
            let mut components = self.components.write().await;
            if self.config.max_components > 0 && components.len() >= self.config.max_components {
                return Err(CoreError::InvalidState {
                    expected: format!("fewer than {} components", self.config.max_components),
                    actual: components.len().to_string(),
                });
            }
            components.insert(id, Arc::clone(&component));
        }

        if let Err(e) = component.initialize(&self.ports).await {
            self.components.write().await.remove(&id);
            return Err(e);
        }

        tracing::info!(component_id = %id, kind = %component.kind(), "Component registered");
        Ok(id)
    }

    /// Look up a component that offers `capability`.
    ///
    /// # Errors
    ///
    /// NotFound if no such component exists, TypeMismatch if it exists but
    /// lacks the capability.
    pub async fn get(&self, id: ComponentId, capability: Capability) -> Result<Arc<Component>> {
        let component = self
            .components
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("component", id))?;

        if !component.supports(capability) {
            return Err(CoreError::TypeMismatch {
                id: id.to_string(),
                expected: capability.to_string(),
                actual: component.kind().to_string(),
            });
        }
        Ok(component)
    }

    /// [`get`](Self::get) for a textual ID, as received from a client.
    pub async fn get_component_by_id(
        &self,
        id: &str,
        capability: Capability,
    ) -> Result<Arc<Component>> {
        self.get(id.parse()?, capability).await
    }

    /// Check if a component exists.
    pub async fn exists(&self, id: ComponentId) -> bool {
        self.components.read().await.contains_key(&id)
    }

    /// Attach a named cleanup action to a component.
    pub async fn register_cleanup_task<F, Fut>(
        &self,
        id: ComponentId,
        name: impl Into<String>,
        action: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.get(id, Capability::Any)
            .await?
            .register_cleanup(name, action)
    }

    /// Protocol to control URL map of a component.
    pub async fn control_urls(&self, id: ComponentId) -> Result<BTreeMap<String, String>> {
        self.get(id, Capability::Any).await?.control_urls()
    }

    /// Send newline separated monitor commands to a component's console.
    pub async fn forward_monitor_commands(&self, id: ComponentId, commands: &str) -> Result<()> {
        self.get(id, Capability::Console)
            .await?
            .send_monitor_commands(commands)
            .await
    }

    /// Destroy a component.
    ///
    /// Teardown finishes before the component leaves the registry, so a
    /// concurrent caller either waits for it or gets NotFound afterwards.
    pub async fn destroy(&self, id: ComponentId) -> Result<()> {
        let component = self.get(id, Capability::Any).await?;
        component.destroy().await;
        self.components.write().await.remove(&id);
        Ok(())
    }

    /// Destroy all components.
    ///
    /// This is useful for cleanup during shutdown. Teardown of individual
    /// components is best effort and never stops the loop.
    pub async fn destroy_all(&self) {
        let components = {
            let mut guard = self.components.write().await;
            std::mem::take(&mut *guard)
        };

        tracing::info!(count = components.len(), "Destroying all components");
        for (_, component) in components {
            component.destroy().await;
        }
    }

    /// List all component IDs.
    pub async fn list(&self) -> Vec<ComponentId> {
        self.components.read().await.keys().copied().collect()
    }

    /// Get the number of live components.
    pub async fn count(&self) -> usize {
        self.components.read().await.len()
    }
}
