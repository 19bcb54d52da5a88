pub mod gateway;
pub mod models;

// exports for the usual suspects
pub use gateway::{ClusterGateway, Credentials, GatewayResult, Session};
pub use models::{
    BridgeDescriptor, BridgeSource, Cluster, ClusterId, ClusterInventory, Guest, GuestRef,
    GuestStatus, GuestType, Node, RawConfig, StorageDescriptor,
};
