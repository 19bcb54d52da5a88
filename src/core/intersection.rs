use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::cluster::models::{
    BridgeDescriptor, BridgeSource, ClusterId, ClusterInventory, StorageDescriptor,
};

/// Storages and bridges every participating cluster exposes.
///
/// Only valid for the inventories it was computed from; recompute whenever
/// group membership or connectivity changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceIntersection {
    pub storages: Vec<StorageDescriptor>,
    pub bridges: Vec<BridgeDescriptor>,
}

impl ResourceIntersection {
    pub fn has_storage(&self, name: &str) -> bool {
        self.storages.iter().any(|s| s.name == name)
    }

    pub fn has_bridge(&self, name: &str) -> bool {
        self.bridges.iter().any(|b| b.name == name)
    }

    pub fn bridges_by_source(&self) -> BTreeMap<BridgeSource, Vec<&BridgeDescriptor>> {
        let mut grouped: BTreeMap<BridgeSource, Vec<&BridgeDescriptor>> = BTreeMap::new();
        for bridge in &self.bridges {
            grouped.entry(bridge.source).or_default().push(bridge);
        }
        grouped
    }
}

/// One cluster's contribution to a group intersection.
///
/// `inventory` is `None` when polling failed; such clusters sit out.
#[derive(Debug, Clone)]
pub struct ClusterResources<'a> {
    pub cluster: &'a ClusterId,
    pub connected: bool,
    pub inventory: Option<&'a ClusterInventory>,
}

pub fn intersect(
    per_cluster_storages: &[Vec<StorageDescriptor>],
    per_cluster_bridges: &[Vec<BridgeDescriptor>],
) -> ResourceIntersection {
    ResourceIntersection {
        storages: intersect_by(per_cluster_storages, |s| s.name.as_str()),
        bridges: intersect_by(per_cluster_bridges, |b| b.name.as_str()),
    }
}

/// Intersects only connected, successfully polled clusters.
pub fn intersect_group(clusters: &[ClusterResources<'_>]) -> ResourceIntersection {
    let participating: Vec<&ClusterInventory> = clusters
        .iter()
        .filter(|c| c.connected)
        .filter_map(|c| c.inventory)
        .collect();

    let storages: Vec<Vec<StorageDescriptor>> =
        participating.iter().map(|inv| inv.storages.clone()).collect();
    let bridges: Vec<Vec<BridgeDescriptor>> =
        participating.iter().map(|inv| inv.bridges.clone()).collect();

    intersect(&storages, &bridges)
}

// First cluster's descriptor wins, so tags like the bridge source survive.
fn intersect_by<T, F>(sets: &[Vec<T>], key: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> &str,
{
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };

    let others: Vec<HashSet<&str>> = rest
        .iter()
        .map(|set| set.iter().map(&key).collect())
        .collect();

    let mut seen = HashSet::new();
    let mut common: Vec<T> = first
        .iter()
        .filter(|item| seen.insert(key(*item)))
        .filter(|item| others.iter().all(|names| names.contains(key(*item))))
        .cloned()
        .collect();
    common.sort_by(|a, b| key(a).cmp(key(b)));
    common
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storages(names: &[&str]) -> Vec<StorageDescriptor> {
        names
            .iter()
            .map(|n| StorageDescriptor {
                name: n.to_string(),
                kind: "rbd".into(),
                shared: true,
            })
            .collect()
    }

    fn bridge(name: &str, source: BridgeSource) -> BridgeDescriptor {
        BridgeDescriptor {
            name: name.into(),
            source,
        }
    }

    fn names(list: &[StorageDescriptor]) -> Vec<&str> {
        list.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn no_clusters_no_resources() {
        let result = intersect(&[], &[]);
        assert!(result.storages.is_empty());
        assert!(result.bridges.is_empty());
    }

    #[test]
    fn single_cluster_is_its_own_intersection() {
        let result = intersect(&[storages(&["local-lvm", "ceph", "nfs"])], &[]);
        assert_eq!(names(&result.storages), vec!["ceph", "local-lvm", "nfs"]);
    }

    #[test]
    fn intersection_is_subset_of_every_input() {
        let inputs = vec![
            storages(&["ceph", "nfs", "local-lvm"]),
            storages(&["ceph", "local-lvm", "backup"]),
            storages(&["local-lvm", "ceph"]),
        ];
        let result = intersect(&inputs, &[]);
        assert_eq!(names(&result.storages), vec!["ceph", "local-lvm"]);
        for input in &inputs {
            for s in &result.storages {
                assert!(input.iter().any(|i| i.name == s.name));
            }
        }
    }

    #[test]
    fn bridge_source_tag_survives() {
        let result = intersect(
            &[],
            &[
                vec![bridge("vmbr0", BridgeSource::Local), bridge("tenant1", BridgeSource::Sdn)],
                vec![bridge("tenant1", BridgeSource::Sdn), bridge("vmbr0", BridgeSource::Local)],
            ],
        );
        let grouped = result.bridges_by_source();
        assert_eq!(grouped[&BridgeSource::Local][0].name, "vmbr0");
        assert_eq!(grouped[&BridgeSource::Sdn][0].name, "tenant1");
    }

    #[test]
    fn disconnected_clusters_do_not_shrink_the_result() {
        let a = ClusterId::new("a");
        let b = ClusterId::new("b");
        let c = ClusterId::new("c");
        let inv_a = ClusterInventory {
            storages: storages(&["ceph", "nfs"]),
            ..Default::default()
        };
        let inv_b = ClusterInventory {
            storages: storages(&["ceph", "nfs"]),
            ..Default::default()
        };
        let inv_c = ClusterInventory::default();

        let result = intersect_group(&[
            ClusterResources { cluster: &a, connected: true, inventory: Some(&inv_a) },
            ClusterResources { cluster: &b, connected: true, inventory: Some(&inv_b) },
            ClusterResources { cluster: &c, connected: false, inventory: Some(&inv_c) },
            ClusterResources { cluster: &c, connected: true, inventory: None },
        ]);
        assert_eq!(names(&result.storages), vec!["ceph", "nfs"]);
    }
}
