//! Property-based tests for the broker state machine.
//!
//! Random interleavings of accepts, messages and closes across a handful of
//! connections must keep the registry consistent with connection roles and
//! must never address broadcasts to the wrong kind of peer.

use greenhouse_proto::{ANY, ActuatorDescriptor, Message, SensorReading};
use greenhouse_server::{
    Broker, BrokerAction, BrokerConfig, BrokerEvent, ConnectionId, SessionRole,
};
use proptest::prelude::*;

fn message() -> impl Strategy<Value = Message> {
    let node_id = prop_oneof![Just(ANY), 0..4i32];
    prop_oneof![
        (0..4i32, prop::collection::vec(0..3i32, 0..3)).prop_map(|(node_id, ids)| {
            Message::NodeAnnounce {
                node_id,
                actuators: ids.into_iter().map(|id| ActuatorDescriptor::new("fan", id)).collect(),
            }
        }),
        Just(Message::PanelAnnounce),
        (0..4i32).prop_map(|node_id| Message::SensorData {
            node_id,
            readings: vec![SensorReading::new("temperature", 20.0, "°C")],
        }),
        (node_id, prop_oneof![Just(ANY), 0..3i32], any::<bool>())
            .prop_map(|(n, a, on)| Message::actuator_state(n, a, on)),
        (0..4i32).prop_map(|node_id| Message::NodeOffline { node_id }),
        Just(Message::decode("garbage")),
    ]
}

fn event() -> impl Strategy<Value = BrokerEvent> {
    let conn = 1..6u64;
    prop_oneof![
        conn.clone().prop_map(|conn| BrokerEvent::ConnectionAccepted { conn }),
        (conn.clone(), message())
            .prop_map(|(conn, message)| BrokerEvent::MessageReceived { conn, message }),
        conn.prop_map(|conn| BrokerEvent::ConnectionClosed { conn, reason: "eof".to_string() }),
    ]
}

fn event_conn(event: &BrokerEvent) -> ConnectionId {
    match event {
        BrokerEvent::ConnectionAccepted { conn }
        | BrokerEvent::MessageReceived { conn, .. }
        | BrokerEvent::ConnectionClosed { conn, .. } => *conn,
    }
}

fn check_registry(broker: &Broker) -> Result<(), TestCaseError> {
    for (node_id, entry) in broker.registry().nodes() {
        // PROPERTY: a registered node is owned by a live node connection with that id
        prop_assert_eq!(broker.role(entry.conn), Some(SessionRole::Node(node_id)));
        prop_assert_ne!(node_id, ANY);
    }
    for conn in broker.registry().panels() {
        // PROPERTY: registered panels are live panel connections
        prop_assert_eq!(broker.role(conn), Some(SessionRole::Panel));
    }
    Ok(())
}

#[test]
fn prop_registry_matches_roles() {
    proptest!(|(events in prop::collection::vec(event(), 0..60))| {
        let mut broker = Broker::new(BrokerConfig { max_connections: 4 });

        for event in events {
            let origin = event_conn(&event);
            let before: Vec<_> = (1..6u64).map(|c| broker.role(c)).collect();

            let Ok(actions) = broker.process_event(event) else {
                continue;
            };

            for action in &actions {
                match action {
                    BrokerAction::Send { conn, message: Message::NodeOffline { .. } } => {
                        // PROPERTY: offline notices only go to panels
                        prop_assert_eq!(broker.role(*conn), Some(SessionRole::Panel));
                    },
                    BrokerAction::Send { conn, message: Message::NodeAnnounce { .. } } => {
                        // PROPERTY: announces (broadcast or replay) only go to panels
                        prop_assert_eq!(broker.role(*conn), Some(SessionRole::Panel));
                    },
                    BrokerAction::Send { conn, .. } => {
                        // PROPERTY: sends target live connections or the origin
                        let live = broker.role(*conn).is_some()
                            || before[(*conn - 1) as usize].is_some();
                        prop_assert!(live || *conn == origin);
                    },
                    BrokerAction::Close { conn, .. } => {
                        // PROPERTY: only the origin, or the node connection it
                        // took a node id from, is ever closed
                        let previous = before[(*conn - 1) as usize];
                        let superseded = matches!(previous, Some(SessionRole::Node(_)))
                            && previous == broker.role(origin);
                        prop_assert!(*conn == origin || superseded);
                        prop_assert_eq!(broker.role(*conn), None);
                    },
                    BrokerAction::Log { .. } => {},
                }
            }

            check_registry(&broker)?;
            prop_assert!(broker.connection_count() <= 4);
        }
    });
}

#[test]
fn prop_commands_only_reach_nodes() {
    proptest!(|(events in prop::collection::vec(event(), 0..60))| {
        let mut broker = Broker::new(BrokerConfig::default());

        for event in events {
            let Ok(actions) = broker.process_event(event) else {
                continue;
            };

            for action in &actions {
                if let BrokerAction::Send { conn, message: Message::ActuatorState { .. } } = action
                {
                    let role = broker.role(*conn);

                    // PROPERTY: a command goes to a node, a report goes to a panel
                    let routed = matches!(role, Some(SessionRole::Node(_) | SessionRole::Panel));
                    prop_assert!(routed, "actuator state sent to {:?}", role);
                }
            }
        }
    });
}
