use serde::{Deserialize, Serialize};

use crate::cluster::models::Node;

/// Weights of the composite score; they should add up to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub cpu: f64,
    pub mem: f64,
    pub storage: f64,
    pub offline: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            cpu: 0.3,
            mem: 0.3,
            storage: 0.2,
            offline: 0.2,
        }
    }
}

/// 0..=100, higher is healthier. Disconnected is always 0.
pub fn score(
    avg_cpu_percent: f64,
    avg_mem_percent: f64,
    avg_storage_percent: f64,
    offline_node_ratio: f64,
    is_connected: bool,
) -> u8 {
    score_weighted(
        &HealthWeights::default(),
        avg_cpu_percent,
        avg_mem_percent,
        avg_storage_percent,
        offline_node_ratio,
        is_connected,
    )
}

pub fn score_weighted(
    weights: &HealthWeights,
    avg_cpu_percent: f64,
    avg_mem_percent: f64,
    avg_storage_percent: f64,
    offline_node_ratio: f64,
    is_connected: bool,
) -> u8 {
    if !is_connected {
        return 0;
    }

    let penalty = avg_cpu_percent * weights.cpu
        + avg_mem_percent * weights.mem
        + avg_storage_percent * weights.storage
        + offline_node_ratio * 100.0 * weights.offline;

    let raw = (100.0 - penalty).round();
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0) as u8
}

/// Averages over online nodes plus the offline ratio, ready for scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub avg_cpu_percent: f64,
    pub avg_mem_percent: f64,
    pub avg_storage_percent: f64,
    pub offline_ratio: f64,
    pub nodes_online: usize,
    pub nodes_offline: usize,
    pub connected: bool,
}

impl ClusterHealth {
    pub fn from_nodes(nodes: &[Node], connected: bool) -> Self {
        let online: Vec<&Node> = nodes.iter().filter(|n| n.online).collect();
        let nodes_offline = nodes.len() - online.len();

        let avg = |f: fn(&Node) -> f64| {
            if online.is_empty() {
                0.0
            } else {
                online.iter().map(|n| f(n)).sum::<f64>() / online.len() as f64
            }
        };

        Self {
            avg_cpu_percent: avg(|n| n.cpu_percent),
            avg_mem_percent: avg(|n| n.mem_percent),
            avg_storage_percent: avg(|n| n.storage_percent),
            offline_ratio: if nodes.is_empty() {
                0.0
            } else {
                nodes_offline as f64 / nodes.len() as f64
            },
            nodes_online: online.len(),
            nodes_offline,
            connected,
        }
    }

    pub fn score(&self, weights: &HealthWeights) -> u8 {
        score_weighted(
            weights,
            self.avg_cpu_percent,
            self.avg_mem_percent,
            self.avg_storage_percent,
            self.offline_ratio,
            self.connected,
        )
    }
}

/// A single node scored on its own utilization.
pub fn node_score(weights: &HealthWeights, node: &Node) -> u8 {
    score_weighted(
        weights,
        node.cpu_percent,
        node.mem_percent,
        node.storage_percent,
        if node.online { 0.0 } else { 1.0 },
        true,
    )
}

/// Least loaded schedulable node, ties broken by name.
pub fn healthiest_node<'a>(weights: &HealthWeights, nodes: &'a [Node]) -> Option<&'a Node> {
    nodes
        .iter()
        .filter(|n| n.is_schedulable())
        .max_by(|a, b| {
            node_score(weights, a)
                .cmp(&node_score(weights, b))
                .then_with(|| b.name.cmp(&a.name))
        })
}

/// Most loaded schedulable node, ties broken by name.
pub fn busiest_node<'a>(weights: &HealthWeights, nodes: &'a [Node]) -> Option<&'a Node> {
    nodes
        .iter()
        .filter(|n| n.is_schedulable())
        .min_by(|a, b| {
            node_score(weights, a)
                .cmp(&node_score(weights, b))
                .then_with(|| a.name.cmp(&b.name))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, online: bool, load: f64) -> Node {
        Node {
            name: name.into(),
            online,
            maintenance: false,
            cpu_percent: load,
            mem_percent: load,
            storage_percent: load,
            ip: None,
        }
    }

    #[test]
    fn disconnected_scores_zero() {
        assert_eq!(score(0.0, 0.0, 0.0, 0.0, false), 0);
        assert_eq!(score(10.0, 10.0, 10.0, 0.0, false), 0);
    }

    #[test]
    fn idle_cluster_is_perfect() {
        assert_eq!(score(0.0, 0.0, 0.0, 0.0, true), 100);
    }

    #[test]
    fn weighted_formula() {
        // 100 - (50*.3 + 40*.3 + 30*.2 + 0.25*100*.2) = 100 - 38 = 62
        assert_eq!(score(50.0, 40.0, 30.0, 0.25, true), 62);
    }

    #[test]
    fn never_negative() {
        assert_eq!(score(100.0, 100.0, 100.0, 1.0, true), 0);
        assert_eq!(score(400.0, 400.0, 400.0, 1.0, true), 0);
    }

    #[test]
    fn monotonic_in_each_dimension() {
        let base = [20.0, 30.0, 40.0, 0.1];
        for dim in 0..4 {
            let mut prev = u8::MAX;
            for step in 0..=20 {
                let mut args = base;
                args[dim] = if dim == 3 {
                    step as f64 / 20.0
                } else {
                    step as f64 * 5.0
                };
                let s = score(args[0], args[1], args[2], args[3], true);
                assert!(s <= prev, "dimension {dim} increased the score");
                prev = s;
            }
        }
    }

    #[test]
    fn cluster_health_ignores_offline_nodes_in_averages() {
        let nodes = vec![node("a", true, 40.0), node("b", true, 60.0), node("c", false, 99.0)];
        let health = ClusterHealth::from_nodes(&nodes, true);
        assert_eq!(health.avg_cpu_percent, 50.0);
        assert_eq!(health.nodes_offline, 1);
        assert!((health.offline_ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn picks_extreme_nodes() {
        let weights = HealthWeights::default();
        let mut nodes = vec![node("a", true, 80.0), node("b", true, 10.0), node("c", false, 0.0)];
        nodes.push(Node {
            maintenance: true,
            ..node("d", true, 0.0)
        });
        assert_eq!(healthiest_node(&weights, &nodes).unwrap().name, "b");
        assert_eq!(busiest_node(&weights, &nodes).unwrap().name, "a");
    }
}
