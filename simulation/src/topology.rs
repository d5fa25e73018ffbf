//! Mesh topologies for the simulator
//!
//! Provides functions to create various network topologies:
//! - Line: A - B - C - ...
//! - Ring: a line closed back onto its first node
//! - Grid: rows of a fixed width, linked to their right and lower neighbors
//! - Random: seeded connection probability
//! - Custom: build from an edge list
//!
//! Links are physical edges that can be taken down and brought back up
//! while a simulation runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv6Addr;

use madaodv_core::{MacAddr, mac_to_ipv6};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A simulated node, shown as a letter while there are few enough of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The node's MAC. Node numbers start at one so no MAC is all-zero.
    pub fn mac(self) -> MacAddr {
        MacAddr::from_node_index(self.0 + 1)
    }

    /// The mesh address derived from the node's MAC
    pub fn address(self) -> Ipv6Addr {
        mac_to_ipv6(self.mac())
    }
}

impl From<char> for NodeId {
    fn from(c: char) -> Self {
        NodeId(u32::from(c.to_ascii_uppercase()).saturating_sub(u32::from('A')))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match char::from_u32(u32::from('A') + self.0) {
            Some(c) if self.0 < 26 => write!(f, "{}", c),
            _ => write!(f, "N{}", self.0),
        }
    }
}

fn link_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a < b { (a, b) } else { (b, a) }
}

/// A mesh network topology
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
    /// Physical links currently unable to carry frames
    down: BTreeSet<(NodeId, NodeId)>,
}

impl Mesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the mesh
    pub fn add_node(&mut self, id: NodeId) {
        self.adjacency.entry(id).or_default();
    }

    /// Add a bidirectional link between two nodes
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Take a link down. Returns false if there is no such link.
    pub fn break_link(&mut self, a: NodeId, b: NodeId) -> bool {
        if !self.has_link(a, b) {
            return false;
        }
        self.down.insert(link_key(a, b))
    }

    /// Bring a broken link back up
    pub fn restore_link(&mut self, a: NodeId, b: NodeId) -> bool {
        self.down.remove(&link_key(a, b))
    }

    /// Whether a physical link exists, up or down
    pub fn has_link(&self, a: NodeId, b: NodeId) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }

    /// Whether a frame from `a` can reach `b` right now
    pub fn are_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.has_link(a, b) && !self.down.contains(&link_key(a, b))
    }

    /// Nodes reachable in one hop over links that are up
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.adjacency
            .get(&node)
            .map(|n| {
                n.iter()
                    .copied()
                    .filter(|other| !self.down.contains(&link_key(node, *other)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.adjacency.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of physical links, up or down
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Print a simple ASCII visualization of the mesh
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Mesh Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Links: {}\n\n", self.edge_count()));

        for (node, neighbors) in &self.adjacency {
            let neighbor_str: Vec<String> = neighbors
                .iter()
                .map(|n| {
                    if self.are_connected(*node, *n) {
                        n.to_string()
                    } else {
                        format!("{}(down)", n)
                    }
                })
                .collect();
            output.push_str(&format!(
                "  {} {} -> [{}]\n",
                node,
                node.address(),
                neighbor_str.join(", ")
            ));
        }
        output
    }
}

/// Builder for creating mesh topologies
pub struct MeshBuilder {
    node_count: u32,
}

impl MeshBuilder {
    pub fn new(node_count: u32) -> Self {
        Self { node_count }
    }

    fn empty(&self) -> Mesh {
        let mut mesh = Mesh::new();
        for i in 0..self.node_count {
            mesh.add_node(NodeId(i));
        }
        mesh
    }

    /// A - B - C - D - ...
    pub fn line(self) -> Mesh {
        let mut mesh = self.empty();
        for i in 1..self.node_count {
            mesh.connect(NodeId(i - 1), NodeId(i));
        }
        mesh
    }

    /// A - B - ... - Z - A
    pub fn ring(self) -> Mesh {
        let mut mesh = self.empty();
        for i in 0..self.node_count {
            mesh.connect(NodeId(i), NodeId((i + 1) % self.node_count));
        }
        mesh
    }

    /// Rows of `width` nodes, each linked to its right and lower neighbor
    pub fn grid(self, width: u32) -> Mesh {
        let mut mesh = self.empty();
        let width = width.max(1);
        for i in 0..self.node_count {
            if (i + 1) % width != 0 && i + 1 < self.node_count {
                mesh.connect(NodeId(i), NodeId(i + 1));
            }
            if i + width < self.node_count {
                mesh.connect(NodeId(i), NodeId(i + width));
            }
        }
        mesh
    }

    /// Each pair linked with `connection_probability`; isolated nodes get
    /// one extra link so nobody is left alone
    pub fn random(self, connection_probability: f64, seed: u64) -> Mesh {
        let mut mesh = self.empty();
        let mut rng = StdRng::seed_from_u64(seed);
        for i in 0..self.node_count {
            for j in (i + 1)..self.node_count {
                if rng.random::<f64>() < connection_probability {
                    mesh.connect(NodeId(i), NodeId(j));
                }
            }
        }

        if self.node_count > 1 {
            for i in 0..self.node_count {
                if mesh.neighbors(NodeId(i)).is_empty() {
                    let other = (i + rng.random_range(1..self.node_count)) % self.node_count;
                    mesh.connect(NodeId(i), NodeId(other));
                }
            }
        }
        mesh
    }
}

/// Create a custom mesh from an edge list
pub fn from_edges(edges: &[(char, char)]) -> Mesh {
    let mut mesh = Mesh::new();
    for (a, b) in edges {
        mesh.connect(NodeId::from(*a), NodeId::from(*b));
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use madaodv_core::in_mesh_range;

    #[test]
    fn test_node_naming() {
        assert_eq!(NodeId::from('a'), NodeId(0));
        assert_eq!(NodeId::from('D').to_string(), "D");
        assert_eq!(NodeId(30).to_string(), "N30");
        assert!(in_mesh_range(NodeId(0).address()));
        assert_ne!(NodeId(0).address(), NodeId(1).address());
    }

    #[test]
    fn test_line_topology() {
        let mesh = MeshBuilder::new(4).line();
        assert_eq!(mesh.node_count(), 4);
        assert_eq!(mesh.edge_count(), 3);
        assert!(mesh.are_connected(NodeId(0), NodeId(1)));
        assert!(!mesh.are_connected(NodeId(0), NodeId(2)));
        assert_eq!(mesh.neighbors(NodeId(1)), vec![NodeId(0), NodeId(2)]);
    }

    #[test]
    fn test_ring_topology() {
        let mesh = MeshBuilder::new(4).ring();
        assert_eq!(mesh.edge_count(), 4);
        assert!(mesh.are_connected(NodeId(3), NodeId(0)));
    }

    #[test]
    fn test_grid_topology() {
        // A B C
        // D E F
        let mesh = MeshBuilder::new(6).grid(3);
        assert_eq!(mesh.edge_count(), 7);
        assert!(mesh.are_connected(NodeId(0), NodeId(3)));
        assert!(!mesh.are_connected(NodeId(2), NodeId(3)));
        assert_eq!(mesh.neighbors(NodeId(4)).len(), 3);
    }

    #[test]
    fn test_random_is_seeded_and_connected() {
        let a = MeshBuilder::new(8).random(0.2, 5);
        let b = MeshBuilder::new(8).random(0.2, 5);
        assert_eq!(a.visualize(), b.visualize());
        for node in a.node_ids() {
            assert!(!a.neighbors(node).is_empty());
        }
    }

    #[test]
    fn test_break_and_restore() {
        let mut mesh = from_edges(&[('A', 'B'), ('B', 'C')]);
        assert!(mesh.break_link('C'.into(), 'B'.into()));
        assert!(!mesh.are_connected('B'.into(), 'C'.into()));
        assert!(mesh.has_link('B'.into(), 'C'.into()));
        assert_eq!(mesh.neighbors('B'.into()), vec![NodeId(0)]);
        assert!(mesh.visualize().contains("C(down)"));

        assert!(!mesh.break_link('A'.into(), 'C'.into()));
        assert!(mesh.restore_link('B'.into(), 'C'.into()));
        assert!(mesh.are_connected('B'.into(), 'C'.into()));
    }
}
