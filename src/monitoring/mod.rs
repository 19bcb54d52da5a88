pub mod poller;

pub use poller::{InventoryPoller, InventorySnapshot};
