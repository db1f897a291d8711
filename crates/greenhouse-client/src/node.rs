//! Sensor/actuator node client.
//!
//! Announces a [`NodeDevice`] to the broker, reports its sensor readings and
//! actuator changes, and applies actuator commands coming back from panels.
//!
//! ```text
//!   owner ── report(NodeUpdate) ──> SensorData / ActuatorState ──> broker
//!   device <── set_actuator ── command task <── ActuatorState ─── broker
//! ```

use std::sync::Arc;

use greenhouse_core::{ConnectionWriter, LineReader};
use greenhouse_proto::{ANY, ActuatorId, ActuatorSet, Message, NodeId, SensorReading};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    error::ClientError,
    transport::{ClientConfig, CloseLatch, open},
};

/// The simulated device behind a node client.
///
/// Called from the client's command task; implementations must be cheap and
/// must not block.
pub trait NodeDevice: Send + Sync + 'static {
    /// Id announced to the broker.
    fn node_id(&self) -> NodeId;

    /// Actuators announced to the broker. Read once, at connect.
    fn actuators(&self) -> ActuatorSet;

    /// Apply a command from a panel.
    fn set_actuator(&self, actuator_id: ActuatorId, is_on: bool);

    /// The broker closed the connection. Called at most once, never after a
    /// local [`NodeClient::shutdown`].
    fn communication_closed(&self) {}
}

/// A change on the device to report to panels.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpdate {
    /// Fresh readings from all sensors
    Sensors(Vec<SensorReading>),
    /// An actuator changed state
    Actuator {
        /// Actuator that changed
        actuator_id: ActuatorId,
        /// New state
        is_on: bool,
    },
}

/// Connected node.
pub struct NodeClient {
    node_id: NodeId,
    writer: ConnectionWriter,
    latch: Arc<CloseLatch>,
    stop: watch::Sender<bool>,
    commands: JoinHandle<()>,
}

impl NodeClient {
    /// Connect, announce the device and start applying commands.
    pub async fn connect<D: NodeDevice>(
        config: &ClientConfig,
        device: Arc<D>,
    ) -> Result<Self, ClientError> {
        let (reader, writer) = open(config).await?.into_split();

        let node_id = device.node_id();
        let actuators = device.actuators();
        writer.send(&Message::NodeAnnounce { node_id, actuators: actuators.clone() }).await?;

        tracing::info!(node_id, actuators = actuators.len(), "node announced");

        let latch = Arc::new(CloseLatch::default());
        let (stop, stopped) = watch::channel(false);
        let commands = tokio::spawn(receive_commands(
            reader,
            device,
            actuators,
            Arc::clone(&latch),
            stopped,
        ));

        Ok(Self { node_id, writer, latch, stop, commands })
    }

    /// Id this node announced.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        !self.latch.is_tripped()
    }

    /// Report a device change to the broker.
    pub async fn report(&self, update: NodeUpdate) -> Result<(), ClientError> {
        if self.latch.is_tripped() {
            return Err(ClientError::Closed);
        }
        send_update(&self.writer, self.node_id, update).await
    }

    /// Forward every update from `updates` until the channel ends, the
    /// connection fails, or the client shuts down.
    pub fn forward(&self, mut updates: mpsc::Receiver<NodeUpdate>) -> JoinHandle<()> {
        let writer = self.writer.clone();
        let node_id = self.node_id;
        let mut stopped = self.stop.subscribe();

        tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    update = updates.recv() => update,
                    _ = stopped.changed() => break,
                };
                let Some(update) = update else {
                    break;
                };

                if let Err(e) = send_update(&writer, node_id, update).await {
                    tracing::warn!(node_id, error = %e, "failed to forward update");
                    if matches!(&e, ClientError::Connection(err) if err.is_fatal()) {
                        break;
                    }
                }
            }
        })
    }

    /// Stop receiving and close the socket.
    ///
    /// The device is not told about this close.
    pub async fn shutdown(self) {
        self.latch.trip();
        let _ = self.stop.send(true);
        self.writer.shutdown().await;

        if let Err(e) = self.commands.await {
            tracing::warn!(node_id = self.node_id, error = %e, "command task failed");
        }
        tracing::info!(node_id = self.node_id, "node client shut down");
    }
}

async fn send_update(
    writer: &ConnectionWriter,
    node_id: NodeId,
    update: NodeUpdate,
) -> Result<(), ClientError> {
    let message = match update {
        NodeUpdate::Sensors(readings) => Message::SensorData { node_id, readings },
        NodeUpdate::Actuator { actuator_id, is_on } => {
            Message::ActuatorState { node_id, actuator_id, is_on }
        },
    };
    writer.send(&message).await?;
    Ok(())
}

async fn receive_commands<D: NodeDevice>(
    mut reader: LineReader,
    device: Arc<D>,
    actuators: ActuatorSet,
    latch: Arc<CloseLatch>,
    mut stopped: watch::Receiver<bool>,
) {
    let node_id = device.node_id();

    loop {
        let received = tokio::select! {
            received = reader.receive() => received,
            _ = stopped.changed() => return,
        };

        match received {
            None => break,
            Some(Message::ActuatorState { node_id: target, actuator_id, is_on }) => {
                if target != ANY && target != node_id {
                    tracing::debug!(node_id, target, "ignoring command for another node");
                    continue;
                }
                apply_command(device.as_ref(), &actuators, actuator_id, is_on);
            },
            Some(Message::Error { kind, detail }) => {
                tracing::warn!(node_id, %kind, %detail, "broker reported an error");
            },
            Some(other) => {
                tracing::debug!(node_id, kind = %other.kind(), "ignoring unexpected message");
            },
        }
    }

    if latch.trip() {
        tracing::info!(node_id, "connection closed by broker");
        device.communication_closed();
    }
}

fn apply_command<D: NodeDevice>(
    device: &D,
    actuators: &ActuatorSet,
    actuator_id: ActuatorId,
    is_on: bool,
) {
    if actuator_id == ANY {
        for id in actuators.ids() {
            device.set_actuator(id, is_on);
        }
        return;
    }

    if actuators.contains(actuator_id) {
        device.set_actuator(actuator_id, is_on);
    } else {
        tracing::warn!(actuator_id, "command for unknown actuator ignored");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use greenhouse_proto::ActuatorDescriptor;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(ActuatorId, bool)>>);

    impl NodeDevice for Recorder {
        fn node_id(&self) -> NodeId {
            1
        }

        fn actuators(&self) -> ActuatorSet {
            ActuatorSet::new()
        }

        fn set_actuator(&self, actuator_id: ActuatorId, is_on: bool) {
            self.0.lock().unwrap().push((actuator_id, is_on));
        }
    }

    fn actuators(ids: &[i32]) -> ActuatorSet {
        ids.iter().map(|&id| ActuatorDescriptor::new("fan", id)).collect()
    }

    #[test]
    fn wildcard_command_hits_every_actuator() {
        let device = Recorder::default();

        apply_command(&device, &actuators(&[3, 1]), ANY, true);

        assert_eq!(*device.0.lock().unwrap(), vec![(1, true), (3, true)]);
    }

    #[test]
    fn unknown_actuator_is_ignored() {
        let device = Recorder::default();

        apply_command(&device, &actuators(&[1]), 2, true);
        apply_command(&device, &actuators(&[1]), 1, false);

        assert_eq!(*device.0.lock().unwrap(), vec![(1, false)]);
    }
}
