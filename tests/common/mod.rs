// Scripted control plane for the workflow tests. Answers from a Script,
// remembers every call so tests can count what actually went over the wire.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use cluster_lifecycle_manager::cluster::gateway::{ClusterGateway, Credentials, GatewayResult, Session};
use cluster_lifecycle_manager::cluster::models::{
    BridgeDescriptor, BridgeSource, CleanupReport, ClusterId, ClusterInventory, Guest, GuestStatus,
    GuestType, JoinInfo, JoinRequest, JoinResult, MigrationRequest, MigrationResult, Node,
    NodeProbeResult, RawConfig, RemovalEligibility, RemovalResult, StorageDescriptor,
};
use cluster_lifecycle_manager::errors::GatewayError;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    TestConnection { ip: String },
    Join { cluster: ClusterId, ip: String, force: bool },
    JoinInfo { cluster: ClusterId },
    Eligibility { cluster: ClusterId, node: String },
    Remove { cluster: ClusterId, node: String },
    Inventory { cluster: ClusterId },
    GuestConfig { cluster: ClusterId, guest_id: u32 },
    Migrate(MigrationRequest),
    DeleteSource { cluster: ClusterId, guest_id: u32 },
}

impl Call {
    /// Calls that change something on a cluster.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Join { .. } | Call::Remove { .. } | Call::Migrate(_) | Call::DeleteSource { .. }
        )
    }
}

pub struct Script {
    pub probe: GatewayResult<NodeProbeResult>,
    pub join: GatewayResult<JoinResult>,
    pub join_info: GatewayResult<JoinInfo>,
    pub eligibility: GatewayResult<RemovalEligibility>,
    pub removal: GatewayResult<RemovalResult>,
    pub inventories: HashMap<ClusterId, GatewayResult<ClusterInventory>>,
    pub guest_configs: HashMap<u32, RawConfig>,
    pub migrate_failures: HashMap<u32, GatewayError>,
    pub delete_source: GatewayResult<()>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            probe: Ok(NodeProbeResult {
                hostname: "pve-new".into(),
                version: "8.2.4".into(),
                ..Default::default()
            }),
            join: Ok(JoinResult {
                message: "joined".into(),
            }),
            join_info: Ok(JoinInfo {
                cluster_name: "b".into(),
                fingerprint: "AA:BB".into(),
                nodes: vec!["pve-b1".into()],
            }),
            eligibility: Ok(RemovalEligibility {
                can_remove: true,
                ..Default::default()
            }),
            removal: Ok(RemovalResult {
                success: true,
                cleanup: CleanupReport {
                    success: true,
                    message: "cleaned".into(),
                },
            }),
            inventories: HashMap::new(),
            guest_configs: HashMap::new(),
            migrate_failures: HashMap::new(),
            delete_source: Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeGateway {
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
}

impl FakeGateway {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ClusterGateway for FakeGateway {
    async fn test_node_connection(
        &self,
        _session: &Session,
        ip: &str,
        _credentials: &Credentials,
    ) -> GatewayResult<NodeProbeResult> {
        self.record(Call::TestConnection { ip: ip.into() });
        self.script().probe.clone()
    }

    async fn join_node(
        &self,
        _session: &Session,
        cluster: &ClusterId,
        request: &JoinRequest,
    ) -> GatewayResult<JoinResult> {
        self.record(Call::Join {
            cluster: cluster.clone(),
            ip: request.ip.clone(),
            force: request.force,
        });
        self.script().join.clone()
    }

    async fn get_join_info(&self, _session: &Session, cluster: &ClusterId) -> GatewayResult<JoinInfo> {
        self.record(Call::JoinInfo {
            cluster: cluster.clone(),
        });
        self.script().join_info.clone()
    }

    async fn get_removal_eligibility(
        &self,
        _session: &Session,
        cluster: &ClusterId,
        node: &str,
    ) -> GatewayResult<RemovalEligibility> {
        self.record(Call::Eligibility {
            cluster: cluster.clone(),
            node: node.into(),
        });
        self.script().eligibility.clone()
    }

    async fn remove_node(
        &self,
        _session: &Session,
        cluster: &ClusterId,
        node: &str,
    ) -> GatewayResult<RemovalResult> {
        self.record(Call::Remove {
            cluster: cluster.clone(),
            node: node.into(),
        });
        self.script().removal.clone()
    }

    async fn get_cluster_inventory(
        &self,
        _session: &Session,
        cluster: &ClusterId,
    ) -> GatewayResult<ClusterInventory> {
        self.record(Call::Inventory {
            cluster: cluster.clone(),
        });
        self.script()
            .inventories
            .get(cluster)
            .cloned()
            .unwrap_or_else(|| {
                Err(GatewayError::Unreachable {
                    target: cluster.to_string(),
                })
            })
    }

    async fn get_guest_config(
        &self,
        _session: &Session,
        cluster: &ClusterId,
        _node: &str,
        _guest_type: GuestType,
        guest_id: u32,
    ) -> GatewayResult<RawConfig> {
        self.record(Call::GuestConfig {
            cluster: cluster.clone(),
            guest_id,
        });
        self.script()
            .guest_configs
            .get(&guest_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                what: format!("guest {guest_id}"),
            })
    }

    async fn migrate_guest(
        &self,
        _session: &Session,
        request: &MigrationRequest,
    ) -> GatewayResult<MigrationResult> {
        self.record(Call::Migrate(request.clone()));
        match self.script().migrate_failures.get(&request.guest_id) {
            Some(err) => Err(err.clone()),
            None => Ok(MigrationResult {
                task_id: Some(format!("UPID:{}", request.guest_id)),
                message: String::new(),
            }),
        }
    }

    async fn delete_guest_source(
        &self,
        _session: &Session,
        cluster: &ClusterId,
        _node: &str,
        _guest_type: GuestType,
        guest_id: u32,
    ) -> GatewayResult<()> {
        self.record(Call::DeleteSource {
            cluster: cluster.clone(),
            guest_id,
        });
        self.script().delete_source.clone()
    }
}

pub fn session() -> Session {
    Session::new("root@pam", "ticket")
}

pub fn credentials() -> Credentials {
    Credentials::new("root", "hunter2")
}

pub fn config(entries: &[(&str, &str)]) -> RawConfig {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn node(name: &str, load: f64, ip: Option<&str>) -> Node {
    Node {
        name: name.into(),
        online: true,
        maintenance: false,
        cpu_percent: load,
        mem_percent: load,
        storage_percent: load,
        ip: ip.map(String::from),
    }
}

pub fn vm(id: u32, node: &str, memory_mb: u64) -> Guest {
    Guest {
        id,
        guest_type: GuestType::Vm,
        node: node.into(),
        status: GuestStatus::Running,
        name: format!("vm{id}"),
        memory_mb,
    }
}

pub fn storage(name: &str, shared: bool) -> StorageDescriptor {
    StorageDescriptor {
        name: name.into(),
        kind: if shared { "rbd".into() } else { "lvmthin".into() },
        shared,
    }
}

pub fn bridge(name: &str, source: BridgeSource) -> BridgeDescriptor {
    BridgeDescriptor {
        name: name.into(),
        source,
    }
}

pub fn inventory(nodes: Vec<Node>, guests: Vec<Guest>) -> ClusterInventory {
    ClusterInventory {
        nodes,
        storages: vec![storage("local-lvm", false), storage("ceph", true)],
        bridges: vec![bridge("vmbr0", BridgeSource::Local)],
        guests,
    }
}
