//! Panel-side view of the greenhouse.
//!
//! Built purely from what the broker tells a panel: announces add nodes,
//! offline notices remove them, reports update actuator states and the latest
//! readings. Wildcard reports are expanded against the announced actuators.

use std::collections::BTreeMap;

use greenhouse_proto::{ANY, ActuatorId, ActuatorSet, Message, NodeId, SensorReading};

/// What a panel knows about one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    /// Node id
    pub node_id: NodeId,
    /// Actuators as announced
    pub actuators: ActuatorSet,
    /// Last reported state per actuator. Absent until the node reports.
    pub actuator_states: BTreeMap<ActuatorId, bool>,
    /// Readings from the most recent sensor report
    pub readings: Vec<SensorReading>,
}

impl NodeInfo {
    fn new(node_id: NodeId, actuators: ActuatorSet) -> Self {
        Self { node_id, actuators, actuator_states: BTreeMap::new(), readings: Vec::new() }
    }

    /// Last reported state of an actuator.
    pub fn is_on(&self, actuator_id: ActuatorId) -> Option<bool> {
        self.actuator_states.get(&actuator_id).copied()
    }

    /// Latest reading of the given sensor kind.
    pub fn reading(&self, kind: &str) -> Option<&SensorReading> {
        self.readings.iter().find(|reading| reading.kind == kind)
    }

    fn set_state(&mut self, actuator_id: ActuatorId, is_on: bool) -> bool {
        if actuator_id == ANY {
            let ids: Vec<_> = self.actuators.ids().collect();
            for id in &ids {
                self.actuator_states.insert(*id, is_on);
            }
            return !ids.is_empty();
        }

        if !self.actuators.contains(actuator_id) {
            return false;
        }
        self.actuator_states.insert(actuator_id, is_on);
        true
    }
}

/// Known nodes, by ascending id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    nodes: BTreeMap<NodeId, NodeInfo>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one broker message into the view.
    ///
    /// Returns `true` if anything changed. Reports about unknown nodes or
    /// actuators are ignored.
    pub fn apply(&mut self, message: &Message) -> bool {
        match message {
            Message::NodeAnnounce { node_id, actuators } => {
                self.nodes.insert(*node_id, NodeInfo::new(*node_id, actuators.clone()));
                true
            },
            Message::NodeOffline { node_id } => self.nodes.remove(node_id).is_some(),
            Message::SensorData { node_id, readings } => match self.nodes.get_mut(node_id) {
                Some(node) => {
                    node.readings.clone_from(readings);
                    true
                },
                None => false,
            },
            Message::ActuatorState { node_id, actuator_id, is_on } => {
                if *node_id == ANY {
                    let mut changed = false;
                    for node in self.nodes.values_mut() {
                        changed |= node.set_state(*actuator_id, *is_on);
                    }
                    return changed;
                }
                self.nodes
                    .get_mut(node_id)
                    .is_some_and(|node| node.set_state(*actuator_id, *is_on))
            },
            Message::PanelAnnounce | Message::Error { .. } => false,
        }
    }

    /// Info for one node.
    pub fn node(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&node_id)
    }

    /// All known nodes, by ascending id.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Forget every node (connection lost).
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
