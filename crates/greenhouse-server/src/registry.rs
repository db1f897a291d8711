//! Connection registry for node and panel tracking.
//!
//! Nodes are keyed by the id they announced; each entry remembers which
//! connection owns it so that a stale connection closing cannot remove a
//! newer registration of the same id. Panels are a plain set of connection
//! ids.
//!
//! Both maps are ordered: replay walks nodes by ascending id and broadcasts
//! walk panels in accept order, so every run produces the same sequence of
//! writes.

use std::collections::{BTreeMap, BTreeSet};

use greenhouse_proto::{ActuatorSet, NodeId};

/// Runtime-assigned connection identifier. Monotonic, never reused.
pub type ConnectionId = u64;

/// A registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    /// Connection that announced the node
    pub conn: ConnectionId,
    /// Actuators as announced, forwarded untouched
    pub actuators: ActuatorSet,
}

/// Registry of announced nodes and panels.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    nodes: BTreeMap<NodeId, NodeEntry>,
    panels: BTreeSet<ConnectionId>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, replacing any previous entry for the same id.
    ///
    /// Returns the connection that previously owned the id, if any.
    pub fn register_node(
        &mut self,
        node_id: NodeId,
        conn: ConnectionId,
        actuators: ActuatorSet,
    ) -> Option<ConnectionId> {
        self.nodes.insert(node_id, NodeEntry { conn, actuators }).map(|old| old.conn)
    }

    /// Remove a node if (and only if) `conn` still owns it.
    ///
    /// Returns `true` if the entry was removed.
    pub fn unregister_node(&mut self, node_id: NodeId, conn: ConnectionId) -> bool {
        match self.nodes.get(&node_id) {
            Some(entry) if entry.conn == conn => {
                self.nodes.remove(&node_id);
                true
            },
            _ => false,
        }
    }

    /// Entry for a node id. `None` if not registered.
    pub fn node(&self, node_id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&node_id)
    }

    /// All registered nodes, by ascending id.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &NodeEntry)> {
        self.nodes.iter().map(|(id, entry)| (*id, entry))
    }

    /// Connections of all registered nodes, by ascending node id.
    pub fn node_connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.nodes.values().map(|entry| entry.conn)
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Register a panel. Returns `false` if it was already registered.
    pub fn add_panel(&mut self, conn: ConnectionId) -> bool {
        self.panels.insert(conn)
    }

    /// Remove a panel. Returns `false` if it was not registered.
    pub fn remove_panel(&mut self, conn: ConnectionId) -> bool {
        self.panels.remove(&conn)
    }

    /// All registered panels, in accept order.
    pub fn panels(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.panels.iter().copied()
    }

    /// Number of registered panels.
    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }
}

#[cfg(test)]
mod tests {
    use greenhouse_proto::ActuatorDescriptor;

    use super::*;

    fn fans(ids: &[i32]) -> ActuatorSet {
        ids.iter().map(|&id| ActuatorDescriptor::new("fan", id)).collect()
    }

    #[test]
    fn register_and_lookup_node() {
        let mut registry = ConnectionRegistry::new();

        assert_eq!(registry.register_node(4, 1, fans(&[1, 2])), None);

        let entry = registry.node(4).unwrap();
        assert_eq!(entry.conn, 1);
        assert_eq!(entry.actuators, fans(&[1, 2]));
        assert!(registry.node(5).is_none());
    }

    #[test]
    fn reannounce_replaces_entry() {
        let mut registry = ConnectionRegistry::new();

        registry.register_node(4, 1, fans(&[1]));
        assert_eq!(registry.register_node(4, 2, fans(&[7])), Some(1));

        assert_eq!(registry.node(4).unwrap().conn, 2);
        assert_eq!(registry.node_count(), 1);
    }

    #[test]
    fn stale_connection_cannot_unregister() {
        let mut registry = ConnectionRegistry::new();

        registry.register_node(4, 1, fans(&[1]));
        registry.register_node(4, 2, fans(&[1]));

        assert!(!registry.unregister_node(4, 1));
        assert!(registry.node(4).is_some());

        assert!(registry.unregister_node(4, 2));
        assert!(registry.node(4).is_none());
    }

    #[test]
    fn nodes_iterate_by_ascending_id() {
        let mut registry = ConnectionRegistry::new();

        registry.register_node(30, 1, ActuatorSet::new());
        registry.register_node(-5, 2, ActuatorSet::new());
        registry.register_node(12, 3, ActuatorSet::new());

        let ids: Vec<_> = registry.nodes().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![-5, 12, 30]);

        let conns: Vec<_> = registry.node_connections().collect();
        assert_eq!(conns, vec![2, 3, 1]);
    }

    #[test]
    fn panels_add_and_remove() {
        let mut registry = ConnectionRegistry::new();

        assert!(registry.add_panel(9));
        assert!(!registry.add_panel(9));
        assert!(registry.add_panel(3));

        assert_eq!(registry.panels().collect::<Vec<_>>(), vec![3, 9]);

        assert!(registry.remove_panel(9));
        assert!(!registry.remove_panel(9));
        assert_eq!(registry.panel_count(), 1);
    }
}
