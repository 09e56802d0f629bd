//! State file structures for persisting tracked resources

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Cirrus that last modified this state
    pub cirrus_version: String,
    /// All tracked resources
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    /// Current state file format version
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            cirrus_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Increment serial and update the recorded version for a new state write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.cirrus_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Find a resource by type and name
    pub fn find_resource(&self, resource_type: &str, name: &str) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| r.resource_type == resource_type && r.name == name)
    }

    /// Find a resource by its remote identifier (case-insensitive)
    pub fn find_by_id(&self, id: &str) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.id.eq_ignore_ascii_case(id))
    }

    /// Add or replace a resource, keyed by type and name
    pub fn upsert_resource(&mut self, resource: ResourceState) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == resource.resource_type && r.name == resource.name)
        {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove_resource(&mut self, resource_type: &str, name: &str) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| r.resource_type == resource_type && r.name == name)?;
        Some(self.resources.remove(pos))
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "azurerm_subnet")
    pub resource_type: String,
    /// Local name from the resource document
    pub name: String,
    /// Provider name (e.g., "azurerm")
    pub provider: String,
    /// Remote identifier, the sole key for later reads, updates and deletes
    pub id: String,
    /// Attributes as last read back from the remote API
    pub attributes: Value,
    /// The last mutation's outcome is unknown; refresh before trusting `attributes`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pending: bool,
}

impl ResourceState {
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: provider.into(),
            id: id.into(),
            attributes: Value::Object(Default::default()),
            pending: false,
        }
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// Mark the recorded attributes as unconfirmed
    pub fn with_pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }
}
