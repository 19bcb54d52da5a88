use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Raw guest configuration exactly as the control plane hands it out.
pub type RawConfig = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClusterId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClusterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A registered cluster. Read-only input for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Cluster {
    pub fn in_group(&self, group: &str) -> bool {
        self.group.as_deref() == Some(group)
    }
}

/// Connected members of `group`, in registration order.
pub fn group_members(clusters: &[Cluster], group: &str) -> Vec<ClusterId> {
    clusters
        .iter()
        .filter(|c| c.connected && c.in_group(group))
        .map(|c| c.id.clone())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestType {
    Vm,
    Container,
}

impl GuestType {
    pub fn supports_live_migration(self) -> bool {
        matches!(self, GuestType::Vm)
    }
}

impl fmt::Display for GuestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestType::Vm => write!(f, "vm"),
            GuestType::Container => write!(f, "container"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub online: bool,
    #[serde(default)]
    pub maintenance: bool,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub mem_percent: f64,
    #[serde(default)]
    pub storage_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Node {
    /// Online and not in maintenance, i.e. fair game for placement decisions.
    pub fn is_schedulable(&self) -> bool {
        self.online && !self.maintenance
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub id: u32,
    pub guest_type: GuestType,
    pub node: String,
    pub status: GuestStatus,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub memory_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeSource {
    Local,
    Sdn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeDescriptor {
    pub name: String,
    pub source: BridgeSource,
}

/// One cluster's inventory as returned by a single poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterInventory {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub storages: Vec<StorageDescriptor>,
    #[serde(default)]
    pub bridges: Vec<BridgeDescriptor>,
    #[serde(default)]
    pub guests: Vec<Guest>,
}

impl ClusterInventory {
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn has_storage(&self, name: &str) -> bool {
        self.storages.iter().any(|s| s.name == name)
    }

    pub fn has_bridge(&self, name: &str) -> bool {
        self.bridges.iter().any(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeProbeResult {
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    pub in_cluster: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    pub stale_config: bool,
}

impl NodeProbeResult {
    /// A plain join will be rejected for nodes carrying cluster state.
    pub fn needs_force(&self) -> bool {
        self.in_cluster || self.stale_config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub ip: String,
    pub credentials: super::gateway::Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link0: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinResult {
    #[serde(default)]
    pub message: String,
}

/// What a cluster needs to tell a joining node about itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinInfo {
    pub cluster_name: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovalEligibility {
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub can_remove: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemovalResult {
    pub success: bool,
    pub cleanup: CleanupReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MigrationTarget {
    /// Another node of the same cluster.
    Node { node: String },
    /// A node of a different cluster, optionally under a new guest id.
    Remote {
        cluster: ClusterId,
        node: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_id: Option<u32>,
        bridge: String,
    },
}

impl MigrationTarget {
    pub fn node(&self) -> &str {
        match self {
            MigrationTarget::Node { node } | MigrationTarget::Remote { node, .. } => node,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub cluster: ClusterId,
    pub source_node: String,
    pub guest_id: u32,
    pub guest_type: GuestType,
    pub target: MigrationTarget,
    /// `None` keeps the guest on storage named like its source storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_storage: Option<String>,
    pub online: bool,
    pub with_local_disks: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestRef {
    pub cluster: ClusterId,
    pub node: String,
    pub guest_type: GuestType,
    pub id: u32,
}

impl fmt::Display for GuestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.cluster, self.node, self.guest_type, self.id)
    }
}
