//! Logical messages exchanged between nodes, panels and the broker.
//!
//! The set of message kinds is closed: every kind is one [`Message`] variant,
//! so adding a kind is a compile-time checked change to the codec, the broker
//! and both clients.
//!
//! # Invariants
//!
//! - An [`ActuatorSet`] is always sorted by ascending actuator id and never
//!   holds two actuators with the same id.
//! - [`ANY`] in a node-id or actuator-id field means "all". Only
//!   [`Message::ActuatorState`] carries wildcards on the wire.

use std::fmt;

/// Identifier of a sensor/actuator node, chosen by the node itself.
pub type NodeId = i32;

/// Identifier of an actuator, unique within its node.
pub type ActuatorId = i32;

/// Wildcard sentinel for node and actuator ids ("all").
pub const ANY: i32 = -1;

/// An actuator advertised by a node at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActuatorDescriptor {
    /// Actuator type, e.g. `fan` or `heater`.
    pub kind: String,
    /// Actuator id, unique within the node.
    pub id: ActuatorId,
}

impl ActuatorDescriptor {
    /// Create a descriptor.
    pub fn new(kind: impl Into<String>, id: ActuatorId) -> Self {
        Self { kind: kind.into(), id }
    }
}

/// Actuators of one node, ordered by ascending id.
///
/// Insertion order does not matter: the set normalizes it, which is what the
/// encoder relies on to produce a canonical announcement line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ActuatorSet {
    actuators: Vec<ActuatorDescriptor>,
}

impl ActuatorSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an actuator at its sorted position.
    ///
    /// Returns `false` (and leaves the set unchanged) if an actuator with the
    /// same id is already present.
    pub fn insert(&mut self, actuator: ActuatorDescriptor) -> bool {
        match self.actuators.binary_search_by_key(&actuator.id, |a| a.id) {
            Ok(_) => false,
            Err(pos) => {
                self.actuators.insert(pos, actuator);
                true
            },
        }
    }

    /// Look up an actuator by id.
    pub fn get(&self, id: ActuatorId) -> Option<&ActuatorDescriptor> {
        self.actuators.binary_search_by_key(&id, |a| a.id).ok().and_then(|i| self.actuators.get(i))
    }

    /// Check whether an actuator id is part of the set.
    pub fn contains(&self, id: ActuatorId) -> bool {
        self.get(id).is_some()
    }

    /// Actuators in ascending id order.
    pub fn iter(&self) -> std::slice::Iter<'_, ActuatorDescriptor> {
        self.actuators.iter()
    }

    /// Actuator ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = ActuatorId> + '_ {
        self.actuators.iter().map(|a| a.id)
    }

    /// Number of actuators.
    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    /// Whether the set has no actuators.
    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}

/// Later duplicates of an id are dropped; the first occurrence wins.
impl FromIterator<ActuatorDescriptor> for ActuatorSet {
    fn from_iter<T: IntoIterator<Item = ActuatorDescriptor>>(iter: T) -> Self {
        let mut set = Self::new();
        for actuator in iter {
            set.insert(actuator);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ActuatorSet {
    type Item = &'a ActuatorDescriptor;
    type IntoIter = std::slice::Iter<'a, ActuatorDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One sensor value as sent in a [`Message::SensorData`] batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Sensor type, e.g. `temperature`.
    pub kind: String,
    /// Current value.
    pub value: f64,
    /// Unit token, forwarded byte for byte (e.g. `°C`, `%`).
    pub unit: String,
}

impl SensorReading {
    /// Create a reading.
    pub fn new(kind: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self { kind: kind.into(), value, unit: unit.into() }
    }
}

/// Why the server rejected a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The line matched no known message prefix.
    Unknown,
    /// The line matched a prefix but was malformed or not allowed.
    Invalid,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Invalid => f.write_str("invalid"),
        }
    }
}

/// Discriminant of a [`Message`], used in logs and error details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// [`Message::NodeAnnounce`]
    NodeAnnounce,
    /// [`Message::PanelAnnounce`]
    PanelAnnounce,
    /// [`Message::SensorData`]
    SensorData,
    /// [`Message::ActuatorState`]
    ActuatorState,
    /// [`Message::NodeOffline`]
    NodeOffline,
    /// [`Message::Error`]
    Error,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NodeAnnounce => "node announce",
            Self::PanelAnnounce => "panel announce",
            Self::SensorData => "sensor data",
            Self::ActuatorState => "actuator state",
            Self::NodeOffline => "node offline",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// A protocol message. Each variant owns exactly the fields its wire line
/// carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Node → server, first line on a node connection.
    NodeAnnounce {
        /// Announcing node.
        node_id: NodeId,
        /// Actuators the node exposes for its whole connection lifetime.
        actuators: ActuatorSet,
    },

    /// Panel → server, first line on a panel connection.
    PanelAnnounce,

    /// Node → server → panels. `readings` is never empty on the wire.
    SensorData {
        /// Reporting node.
        node_id: NodeId,
        /// Current readings, in the node's order.
        readings: Vec<SensorReading>,
    },

    /// Actuator command (panel → node) or report (node → panels).
    ///
    /// The direction is implied by the connection the line arrives on.
    ActuatorState {
        /// Target or reporting node, or [`ANY`].
        node_id: NodeId,
        /// Target or reporting actuator, or [`ANY`].
        actuator_id: ActuatorId,
        /// Requested or reported state.
        is_on: bool,
    },

    /// Server → panels, synthesized when a node connection drops.
    NodeOffline {
        /// Node that went away.
        node_id: NodeId,
    },

    /// Server → client: the previous line was rejected.
    Error {
        /// Rejection class.
        kind: ErrorKind,
        /// Human readable explanation.
        detail: String,
    },
}

impl Message {
    /// Build an actuator command or report.
    pub fn actuator_state(node_id: NodeId, actuator_id: ActuatorId, is_on: bool) -> Self {
        Self::ActuatorState { node_id, actuator_id, is_on }
    }

    /// Build an `Error{Invalid}` message.
    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::Error { kind: ErrorKind::Invalid, detail: detail.into() }
    }

    /// Discriminant of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::NodeAnnounce { .. } => MessageKind::NodeAnnounce,
            Self::PanelAnnounce => MessageKind::PanelAnnounce,
            Self::SensorData { .. } => MessageKind::SensorData,
            Self::ActuatorState { .. } => MessageKind::ActuatorState,
            Self::NodeOffline { .. } => MessageKind::NodeOffline,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    /// `true` for an `ActuatorState` addressed to every node.
    pub fn is_any_node(&self) -> bool {
        matches!(self, Self::ActuatorState { node_id: ANY, .. })
    }

    /// `true` for an `ActuatorState` addressed to every actuator.
    pub fn is_any_actuator(&self) -> bool {
        matches!(self, Self::ActuatorState { actuator_id: ANY, .. })
    }

    /// `true` for an `ActuatorState` with neither field wildcarded.
    pub fn is_specific(&self) -> bool {
        matches!(self, Self::ActuatorState { .. }) && !self.is_any_node() && !self.is_any_actuator()
    }
}
