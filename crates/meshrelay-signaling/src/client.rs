//! WebSocket signaling relay client (spec §4.3).
//!
//! Connects to the relay, joins a room, and exposes a bidirectional
//! event surface: outbound [`ClientFrame`]s are queued FIFO and drained
//! on every successful (re)connection, starting with a fresh `join`
//! (re-sent on every reconnect, not just the first: the relay holds no
//! durable state, so a peer that drops off is forgotten); inbound
//! [`RelayFrame`]s are forwarded to the caller as they arrive.
//! Reconnects with [`Backoff`] indefinitely until [`SignalingClient::disconnect`]
//! is called explicitly.

use std::collections::VecDeque;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::backoff::Backoff;
use crate::wire::{ClientFrame, RelayFrame};

/// A live connection to the signaling relay.
pub struct SignalingClient {
    outbound_tx: mpsc::UnboundedSender<ClientFrame>,
    inbound_rx: mpsc::UnboundedReceiver<RelayFrame>,
    disconnect_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to `url` and join `room_id` as `(user_id, username)`. The
    /// `join` frame is sent first on every successful (re)connection.
    #[must_use]
    pub fn connect(url: String, room_id: String, user_id: String, username: String) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = oneshot::channel();

        let task = tokio::spawn(run(
            url,
            ClientFrame::Join {
                room_id,
                user_id,
                username,
            },
            outbound_rx,
            inbound_tx,
            disconnect_rx,
        ));

        Self {
            outbound_tx,
            inbound_rx,
            disconnect_tx: Some(disconnect_tx),
            task,
        }
    }

    /// Enqueue an outbound frame. If not currently connected, it waits
    /// in FIFO order until the next successful connection.
    pub fn send(&self, frame: ClientFrame) {
        // An error here means the background task has stopped; there is
        // no recipient left to deliver to, so the frame is simply dropped.
        let _ = self.outbound_tx.send(frame);
    }

    /// Receive the next event from the relay. Returns `None` once the
    /// background task has stopped (e.g. after [`Self::disconnect`]).
    pub async fn recv(&mut self) -> Option<RelayFrame> {
        self.inbound_rx.recv().await
    }

    /// Explicitly disconnect; no further reconnect attempts are made.
    pub async fn disconnect(mut self) {
        if let Some(tx) = self.disconnect_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

async fn run(
    url: String,
    join: ClientFrame,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
    inbound_tx: mpsc::UnboundedSender<RelayFrame>,
    mut disconnect_rx: oneshot::Receiver<()>,
) {
    let mut backoff = Backoff::new();
    let mut pending: VecDeque<ClientFrame> = VecDeque::new();

    loop {
        if disconnect_rx.try_recv().is_ok() {
            return;
        }

        match connect_async(&url).await {
            Ok((stream, _response)) => {
                tracing::info!("signaling: connected to relay");
                backoff.reset();
                let (mut write, mut read) = stream.split();

                // Re-sent on every (re)connection, not just the first: a
                // relay that dropped the socket has forgotten this peer
                // entirely, so each fresh connection must re-join before
                // anything else drains (spec §4.3, scenario S6).
                pending.push_front(join.clone());

                let mut broken = false;
                while let Some(frame) = pending.pop_front() {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(error) => {
                            tracing::warn!(%error, "signaling: failed to encode outbound frame");
                            continue;
                        }
                    };
                    if write.send(Message::Text(text)).await.is_err() {
                        pending.push_front(frame);
                        broken = true;
                        break;
                    }
                }

                if !broken {
                    broken = drive_connection(&mut write, &mut read, &mut outbound_rx, &inbound_tx, &mut pending, &mut disconnect_rx).await;
                }

                if !broken {
                    return;
                }
            }
            Err(error) => {
                tracing::warn!(%error, "signaling: connection attempt failed");
            }
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = &mut disconnect_rx => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drives one established connection until it closes or is told to
/// disconnect. Returns `true` if the caller should reconnect (the
/// socket broke), `false` if disconnect was requested (terminal).
async fn drive_connection(
    write: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    read: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
    inbound_tx: &mpsc::UnboundedSender<RelayFrame>,
    pending: &mut VecDeque<ClientFrame>,
    disconnect_rx: &mut oneshot::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            _ = &mut *disconnect_rx => return false,
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        let text = match serde_json::to_string(&frame) {
                            Ok(text) => text,
                            Err(error) => {
                                tracing::warn!(%error, "signaling: failed to encode outbound frame");
                                continue;
                            }
                        };
                        if write.send(Message::Text(text)).await.is_err() {
                            pending.push_back(frame);
                            return true;
                        }
                    }
                    None => return false,
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RelayFrame>(&text) {
                            Ok(frame) => {
                                if inbound_tx.send(frame).is_err() {
                                    return false;
                                }
                            }
                            Err(error) => {
                                tracing::warn!(%error, "signaling: dropped malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return true,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::warn!(%error, "signaling: read error");
                        return true;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_is_enqueued_before_anything_else() {
        let join = ClientFrame::Join {
            room_id: "AB12CD".into(),
            user_id: "u1".into(),
            username: "alice".into(),
        };
        let mut pending: VecDeque<ClientFrame> = VecDeque::new();
        pending.push_back(join.clone());
        pending.push_back(ClientFrame::PushNotify {
            room_id: "AB12CD".into(),
            payload: "x".into(),
            sender_endpoint: None,
        });
        assert_eq!(pending.pop_front(), Some(join));
    }

    #[test]
    fn join_frame_is_re_enqueued_at_the_front_on_every_reconnect() {
        // Mirrors what `run` does on each `Ok((stream, _))` branch: push
        // `join` to the front of whatever queued app frames survived the
        // drop, so it always drains first (spec §4.3, scenario S6).
        let join = ClientFrame::Join {
            room_id: "AB12CD".into(),
            user_id: "u1".into(),
            username: "alice".into(),
        };
        let queued = ClientFrame::PushNotify {
            room_id: "AB12CD".into(),
            payload: "x".into(),
            sender_endpoint: None,
        };

        let mut pending: VecDeque<ClientFrame> = VecDeque::new();

        // First connection.
        pending.push_front(join.clone());
        assert_eq!(pending.pop_front(), Some(join.clone()));

        // App enqueues a frame while connected, then the socket drops
        // before it drains.
        pending.push_back(queued.clone());

        // Second connection: join is re-sent ahead of the frame that
        // survived the drop.
        pending.push_front(join.clone());
        assert_eq!(pending.pop_front(), Some(join));
        assert_eq!(pending.pop_front(), Some(queued));
    }
}
