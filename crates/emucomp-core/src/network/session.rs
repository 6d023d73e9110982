//! Network sessions: which components hang off which switch, and for how
//! long.

use crate::component::ComponentId;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Unit of a [`Lifetime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifetimeUnit {
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl LifetimeUnit {
    fn millis(self) -> u64 {
        match self {
            Self::Milliseconds => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
            Self::Days => 86_400_000,
        }
    }
}

impl FromStr for LifetimeUnit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "milliseconds" => Ok(Self::Milliseconds),
            "seconds" => Ok(Self::Seconds),
            "minutes" => Ok(Self::Minutes),
            "hours" => Ok(Self::Hours),
            "days" => Ok(Self::Days),
            _ => Err(CoreError::InvalidArgument(format!(
                "invalid lifetime unit '{s}'"
            ))),
        }
    }
}

/// How long a network lives before it is removed automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    /// Amount of `unit`.
    pub value: u64,
    /// Unit of `value`.
    pub unit: LifetimeUnit,
}

impl Lifetime {
    /// Create a lifetime.
    pub fn new(value: u64, unit: LifetimeUnit) -> Self {
        Self { value, unit }
    }

    /// The lifetime as a duration.
    pub fn as_duration(&self) -> Result<Duration> {
        self.value
            .checked_mul(self.unit.millis())
            .map(Duration::from_millis)
            .ok_or_else(|| CoreError::InvalidArgument(format!("lifetime {self} is too long")))
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.value, self.unit)
    }
}

/// Where a component is plugged into the switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnectionInfo {
    /// Ethernet control URL the switch bridges to.
    pub ethernet_url: String,
    /// Whether the bridge is still up.
    pub connected: bool,
}

/// A component's membership in a network.
#[derive(Debug)]
pub struct SessionComponent {
    id: ComponentId,
    created_at: DateTime<Utc>,
    custom_name: Option<String>,
    ephemeral: bool,
    released: AtomicBool,
    network: Mutex<NetworkConnectionInfo>,
}

impl SessionComponent {
    /// A connected member reachable at `ethernet_url`.
    pub fn new(
        id: ComponentId,
        ethernet_url: impl Into<String>,
        ephemeral: bool,
        custom_name: Option<String>,
    ) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            custom_name,
            ephemeral,
            released: AtomicBool::new(false),
            network: Mutex::new(NetworkConnectionInfo {
                ethernet_url: ethernet_url.into(),
                connected: true,
            }),
        }
    }

    /// Component ID.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Destroyed together with the network.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// The component itself has been destroyed.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Record that the component has been destroyed.
    pub fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn network(&self) -> MutexGuard<'_, NetworkConnectionInfo> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the right to disconnect.
    ///
    /// Returns the ethernet URL exactly once; later calls get `None`.
    pub fn take_connection(&self) -> Option<String> {
        let mut network = self.network();
        if !network.connected {
            return None;
        }
        network.connected = false;
        Some(network.ethernet_url.clone())
    }

    /// Serializable snapshot.
    pub fn info(&self) -> SessionComponentInfo {
        SessionComponentInfo {
            component_id: self.id,
            created_at: self.created_at,
            custom_name: self.custom_name.clone(),
            ephemeral: self.ephemeral,
            released: self.is_released(),
            network_info: self.network().clone(),
        }
    }
}

/// External view of a [`SessionComponent`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionComponentInfo {
    /// Component ID.
    pub component_id: ComponentId,
    /// When it joined the network.
    pub created_at: DateTime<Utc>,
    /// Optional label chosen by the client.
    pub custom_name: Option<String>,
    /// Destroyed together with the network.
    pub ephemeral: bool,
    /// Already destroyed.
    pub released: bool,
    /// Switch connection.
    pub network_info: NetworkConnectionInfo,
}

struct Expiry {
    deadline: DateTime<Utc>,
    task: JoinHandle<()>,
}

/// A switch and its member components.
pub struct NetworkSession {
    id: String,
    switch_id: ComponentId,
    created_at: DateTime<Utc>,
    components: Mutex<HashMap<ComponentId, Arc<SessionComponent>>>,
    expiry: Mutex<Option<Expiry>>,
}

impl fmt::Debug for NetworkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkSession")
            .field("id", &self.id)
            .field("switch_id", &self.switch_id)
            .finish_non_exhaustive()
    }
}

impl NetworkSession {
    /// A new session around the switch component `switch_id`.
    pub fn new(switch_id: ComponentId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            switch_id,
            created_at: Utc::now(),
            components: Mutex::new(HashMap::new()),
            expiry: Mutex::new(None),
        }
    }

    /// Session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The switch component.
    pub fn switch_id(&self) -> ComponentId {
        self.switch_id
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn components(&self) -> MutexGuard<'_, HashMap<ComponentId, Arc<SessionComponent>>> {
        self.components.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a member; a component can be a member only once.
    pub fn insert(&self, component: Arc<SessionComponent>) -> Result<()> {
        let mut components = self.components();
        if components.contains_key(&component.id()) {
            return Err(CoreError::DuplicateEndpoint(format!(
                "component {} in network {}",
                component.id(),
                self.id
            )));
        }
        components.insert(component.id(), component);
        Ok(())
    }

    /// Whether `id` is a member.
    pub fn contains(&self, id: ComponentId) -> bool {
        self.components().contains_key(&id)
    }

    /// Look up a member.
    pub fn component(&self, id: ComponentId) -> Option<Arc<SessionComponent>> {
        self.components().get(&id).cloned()
    }

    /// Remove a member.
    pub fn remove_component(&self, id: ComponentId) -> Option<Arc<SessionComponent>> {
        self.components().remove(&id)
    }

    /// Remove all members.
    pub fn drain_components(&self) -> Vec<Arc<SessionComponent>> {
        self.components().drain().map(|(_, c)| c).collect()
    }

    /// Snapshot of the members.
    pub fn members(&self) -> Vec<Arc<SessionComponent>> {
        self.components().values().cloned().collect()
    }

    fn expiry(&self) -> MutexGuard<'_, Option<Expiry>> {
        self.expiry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install the removal timer, cancelling any previous one.
    pub fn set_expiry(&self, deadline: DateTime<Utc>, task: JoinHandle<()>) {
        let previous = self.expiry().replace(Expiry { deadline, task });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    /// Cancel the removal timer.
    pub fn cancel_expiry(&self) {
        if let Some(expiry) = self.expiry().take() {
            expiry.task.abort();
        }
    }

    /// Forget the removal timer without cancelling it; used by the timer
    /// itself once it fires.
    pub(crate) fn clear_expiry(&self) {
        self.expiry().take();
    }

    /// When the session will be removed, if a lifetime is set.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry().as_ref().map(|e| e.deadline)
    }

    /// Serializable snapshot.
    pub fn info(&self) -> NetworkSessionInfo {
        let mut components: Vec<SessionComponentInfo> =
            self.members().iter().map(|c| c.info()).collect();
        components.sort_by_key(|c| c.created_at);
        NetworkSessionInfo {
            id: self.id.clone(),
            switch_id: self.switch_id,
            created_at: self.created_at,
            expires_at: self.expires_at(),
            components,
        }
    }
}

/// External view of a [`NetworkSession`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSessionInfo {
    /// Session ID.
    pub id: String,
    /// Switch component.
    pub switch_id: ComponentId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Scheduled removal.
    pub expires_at: Option<DateTime<Utc>>,
    /// Members.
    pub components: Vec<SessionComponentInfo>,
}

/// All live sessions by ID.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<NetworkSession>>>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session.
    pub fn register(&self, session: Arc<NetworkSession>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id().to_string(), session);
    }

    /// Look up a session.
    pub fn get(&self, id: &str) -> Result<Arc<NetworkSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("network", id))
    }

    /// Remove a session; only one caller gets it back.
    pub fn remove(&self, id: &str) -> Option<Arc<NetworkSession>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// IDs of all sessions.
    pub fn list(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether there are no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
