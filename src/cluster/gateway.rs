use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cluster::models::{
    ClusterId, ClusterInventory, GuestType, JoinInfo, JoinRequest, JoinResult, MigrationRequest,
    MigrationResult, NodeProbeResult, RawConfig, RemovalEligibility, RemovalResult,
};
use crate::errors::GatewayError;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Operator session, threaded into every remote call instead of living in
/// some global header helper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user: String,
    pub token: String,
}

impl Session {
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }
}

/// Credentials for a node that is not (yet) reachable through a cluster API.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// keep passwords out of the logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// The hypervisor control plane, seen as a bag of black-box remote calls.
///
/// Timeouts are the implementor's business; the orchestrator never cancels
/// a call once it has been issued.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn test_node_connection(
        &self,
        session: &Session,
        ip: &str,
        credentials: &Credentials,
    ) -> GatewayResult<NodeProbeResult>;

    async fn join_node(
        &self,
        session: &Session,
        cluster: &ClusterId,
        request: &JoinRequest,
    ) -> GatewayResult<JoinResult>;

    async fn get_join_info(&self, session: &Session, cluster: &ClusterId)
        -> GatewayResult<JoinInfo>;

    async fn get_removal_eligibility(
        &self,
        session: &Session,
        cluster: &ClusterId,
        node: &str,
    ) -> GatewayResult<RemovalEligibility>;

    async fn remove_node(
        &self,
        session: &Session,
        cluster: &ClusterId,
        node: &str,
    ) -> GatewayResult<RemovalResult>;

    async fn get_cluster_inventory(
        &self,
        session: &Session,
        cluster: &ClusterId,
    ) -> GatewayResult<ClusterInventory>;

    async fn get_guest_config(
        &self,
        session: &Session,
        cluster: &ClusterId,
        node: &str,
        guest_type: GuestType,
        guest_id: u32,
    ) -> GatewayResult<RawConfig>;

    async fn migrate_guest(
        &self,
        session: &Session,
        request: &MigrationRequest,
    ) -> GatewayResult<MigrationResult>;

    async fn delete_guest_source(
        &self,
        session: &Session,
        cluster: &ClusterId,
        node: &str,
        guest_type: GuestType,
        guest_id: u32,
    ) -> GatewayResult<()>;
}
