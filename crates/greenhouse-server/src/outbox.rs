//! Per-connection outgoing queue.
//!
//! The broker lock must never be held across a socket write: one slow panel
//! would stall every node. Instead each connection gets an [`Outbox`], a
//! bounded FIFO drained by its own writer task. Enqueueing never blocks, so
//! actions can be executed while the broker is still locked and
//! per-connection ordering is exactly the order the broker produced.
//!
//! A peer that stops reading fills its queue. The next push then overflows:
//! queued messages are dropped, the writer shuts down and the connection's
//! read loop is told to stop, so the broker sees an ordinary close.
//!
//! ```text
//!   Open ── close() ──> Closing ── Close marker written ──> writer stops
//!     │                    │
//!     └── queue full ──────┴──────> Overflowed ──> writer stops now
//! ```

use greenhouse_core::ConnectionWriter;
use greenhouse_proto::Message;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};

use crate::registry::ConnectionId;

/// Default number of messages queued per connection.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 1024;

enum Outgoing {
    Message(Message),
    Close,
}

/// Lifecycle of an outbox, observed by the connection's read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutboxState {
    /// Accepting messages
    Open,
    /// Close queued; pending messages are still written
    Closing,
    /// Queue was full; pending messages were dropped
    Overflowed,
}

/// Handle to a connection's writer task.
pub(crate) struct Outbox {
    conn: ConnectionId,
    tx: mpsc::Sender<Outgoing>,
    state: watch::Sender<OutboxState>,
}

impl Outbox {
    /// Spawn the writer task for a connection, queueing at most `capacity`
    /// messages.
    pub(crate) fn spawn(
        conn: ConnectionId,
        writer: ConnectionWriter,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (state, watched) = watch::channel(OutboxState::Open);
        let task = tokio::spawn(drain(conn, writer, rx, watched));
        (Self { conn, tx, state }, task)
    }

    /// Watch for the connection being closed by the broker or by overflow.
    pub(crate) fn state(&self) -> watch::Receiver<OutboxState> {
        self.state.subscribe()
    }

    /// Queue a message. Dropped silently if the writer task has stopped.
    pub(crate) fn push(&self, message: Message) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Outgoing::Message(message)) {
            self.overflow();
        }
    }

    /// Queue a close: everything pushed before it is still written.
    pub(crate) fn close(&self) {
        self.state.send_if_modified(|state| {
            let open = *state == OutboxState::Open;
            if open {
                *state = OutboxState::Closing;
            }
            open
        });
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Outgoing::Close) {
            self.overflow();
        }
    }

    fn overflow(&self) {
        if self.state.send_replace(OutboxState::Overflowed) != OutboxState::Overflowed {
            tracing::warn!(conn = self.conn, "outbox full, closing slow connection");
        }
    }
}

async fn drain(
    conn: ConnectionId,
    writer: ConnectionWriter,
    mut rx: mpsc::Receiver<Outgoing>,
    mut state: watch::Receiver<OutboxState>,
) {
    tokio::select! {
        () = write_queued(conn, &writer, &mut rx) => {},
        Ok(_) = state.wait_for(|state| *state == OutboxState::Overflowed) => {
            tracing::debug!(conn, "dropping queued messages");
        },
    }

    writer.shutdown().await;
    tracing::debug!(conn, "writer stopped");
}

async fn write_queued(
    conn: ConnectionId,
    writer: &ConnectionWriter,
    rx: &mut mpsc::Receiver<Outgoing>,
) {
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Message(message) => {
                if let Err(e) = writer.send(&message).await {
                    if e.is_fatal() {
                        tracing::warn!(conn, error = %e, "write failed, stopping writer");
                        return;
                    }
                    tracing::warn!(
                        conn,
                        error = %e,
                        kind = %message.kind(),
                        "dropping unencodable message"
                    );
                }
            },
            Outgoing::Close => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use greenhouse_core::Connection;
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn messages_before_close_are_written_in_order() {
        let (a, b) = duplex(1024);
        let (_reader, writer) = Connection::new(a).into_split();
        let mut peer = Connection::new(b);

        let (outbox, task) = Outbox::spawn(1, writer, 16);
        let state = outbox.state();
        outbox.push(Message::NodeOffline { node_id: 1 });
        outbox.push(Message::NodeOffline { node_id: 2 });
        outbox.close();
        outbox.push(Message::NodeOffline { node_id: 3 });
        task.await.unwrap();

        assert_eq!(*state.borrow(), OutboxState::Closing);
        assert_eq!(peer.receive().await, Some(Message::NodeOffline { node_id: 1 }));
        assert_eq!(peer.receive().await, Some(Message::NodeOffline { node_id: 2 }));
        assert_eq!(peer.receive().await, None);
    }

    #[tokio::test]
    async fn dropping_the_outbox_stops_the_writer() {
        let (a, b) = duplex(1024);
        let (_reader, writer) = Connection::new(a).into_split();
        let mut peer = Connection::new(b);

        let (outbox, task) = Outbox::spawn(1, writer, 16);
        drop(outbox);
        task.await.unwrap();

        assert_eq!(peer.receive().await, None);
    }

    #[tokio::test]
    async fn full_queue_closes_a_peer_that_stops_reading() {
        // Small pipe: the writer blocks as soon as the peer stops reading
        let (a, b) = duplex(64);
        let (_reader, writer) = Connection::new(a).into_split();
        let mut peer = Connection::new(b);

        let (outbox, task) = Outbox::spawn(1, writer, 4);
        let mut state = outbox.state();
        for node_id in 0..200_000 {
            outbox.push(Message::NodeOffline { node_id });
        }

        assert_eq!(*state.borrow_and_update(), OutboxState::Overflowed);
        task.await.unwrap();

        // Further pushes and closes are harmless
        outbox.push(Message::NodeOffline { node_id: 1 });
        outbox.close();
        assert_eq!(*state.borrow(), OutboxState::Overflowed);

        // The peer sees what fit in the pipe, then the end of the stream
        let mut received = 0;
        while peer.receive().await.is_some() {
            received += 1;
        }
        assert!(received < 20, "peer received {received} lines");
    }
}
