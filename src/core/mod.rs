pub mod health;
pub mod inspector;
pub mod intersection;
pub mod preflight;

// exports for lazy devs like us
pub use health::{ClusterHealth, HealthWeights};
pub use inspector::{inspect, ConfigFinding, RemovableMedia};
pub use intersection::{intersect, intersect_group, ClusterResources, ResourceIntersection};
pub use preflight::{PreflightBlock, PreflightValidator, PreflightWarning, ValidationResult};
