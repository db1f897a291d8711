//! Fuzz target for the broker state machine
//!
//! # Strategy
//!
//! - Random interleavings of accept, message and close events over a small
//!   pool of connection ids (so ids collide and get reused)
//! - Messages of every kind, including wildcards and undecodable lines
//! - A small connection limit so refusals are exercised
//!
//! # Invariants
//!
//! - `process_event` NEVER panics
//! - Every registered node is owned by a live node connection with that id
//! - Every registered panel is a live panel connection
//! - `NodeOffline` and `NodeAnnounce` are only ever sent to panels
//! - Only the connection an event is about, or the node connection it took a
//!   node id from, is ever closed

#![no_main]

use arbitrary::Arbitrary;
use greenhouse_proto::{ANY, ActuatorDescriptor, Message, SensorReading};
use greenhouse_server::{Broker, BrokerAction, BrokerConfig, BrokerEvent, SessionRole};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum FuzzEvent {
    Accept { conn: u8 },
    Receive { conn: u8, message: FuzzMessage },
    Close { conn: u8 },
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzMessage {
    NodeAnnounce { node_id: i8, actuators: Vec<i8> },
    PanelAnnounce,
    SensorData { node_id: i8 },
    ActuatorState { node_id: i8, actuator_id: i8, is_on: bool },
    NodeOffline { node_id: i8 },
    Line(String),
}

impl FuzzMessage {
    fn into_message(self) -> Message {
        match self {
            Self::NodeAnnounce { node_id, actuators } => Message::NodeAnnounce {
                node_id: i32::from(node_id),
                actuators: actuators
                    .into_iter()
                    .map(|id| ActuatorDescriptor::new("fan", i32::from(id)))
                    .collect(),
            },
            Self::PanelAnnounce => Message::PanelAnnounce,
            Self::SensorData { node_id } => Message::SensorData {
                node_id: i32::from(node_id),
                readings: vec![SensorReading::new("temperature", 20.0, "C")],
            },
            Self::ActuatorState { node_id, actuator_id, is_on } => {
                Message::actuator_state(i32::from(node_id), i32::from(actuator_id), is_on)
            }
            Self::NodeOffline { node_id } => Message::NodeOffline { node_id: i32::from(node_id) },
            Self::Line(line) => greenhouse_proto::decode(&line),
        }
    }
}

fuzz_target!(|events: Vec<FuzzEvent>| {
    let mut broker = Broker::new(BrokerConfig { max_connections: 6 });

    for event in events {
        let (origin, event) = match event {
            FuzzEvent::Accept { conn } => {
                let conn = u64::from(conn % 8);
                (conn, BrokerEvent::ConnectionAccepted { conn })
            }
            FuzzEvent::Receive { conn, message } => {
                let conn = u64::from(conn % 8);
                (conn, BrokerEvent::MessageReceived { conn, message: message.into_message() })
            }
            FuzzEvent::Close { conn } => {
                let conn = u64::from(conn % 8);
                (conn, BrokerEvent::ConnectionClosed { conn, reason: "fuzz".to_string() })
            }
        };

        let before: Vec<_> = (0..8).map(|conn| broker.role(conn)).collect();

        let Ok(actions) = broker.process_event(event) else {
            continue;
        };

        for action in &actions {
            match action {
                BrokerAction::Send {
                    conn,
                    message: Message::NodeOffline { .. } | Message::NodeAnnounce { .. },
                } => {
                    assert_eq!(broker.role(*conn), Some(SessionRole::Panel));
                }
                BrokerAction::Close { conn, .. } if *conn != origin => {
                    let (Some(SessionRole::Node(old)), Some(SessionRole::Node(new))) =
                        (before[*conn as usize], broker.role(origin))
                    else {
                        panic!("closed unrelated connection {conn}");
                    };
                    assert_eq!(old, new);
                    assert_eq!(broker.role(*conn), None);
                }
                _ => {}
            }
        }

        for (node_id, entry) in broker.registry().nodes() {
            assert_ne!(node_id, ANY);
            assert_eq!(broker.role(entry.conn), Some(SessionRole::Node(node_id)));
        }
        for conn in broker.registry().panels() {
            assert_eq!(broker.role(conn), Some(SessionRole::Panel));
        }
        assert!(broker.connection_count() <= 6);
    }
});
