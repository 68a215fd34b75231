//! Control Channel Router (C5): per-peer framing state, the opening
//! handshake delay, and tag dispatch (spec §4.5).

use std::time::Duration;

use async_trait::async_trait;
use meshrelay_files::{ChunkSink, FileTransferError};
use meshrelay_protocol::{CodecError, ControlMessage, Decoded, StreamCodec};
use tokio::sync::mpsc;

use crate::event::MeshEvent;
use crate::peer::PeerId;

/// One peer's multiplexed reliable stream, abstracted over the concrete
/// WebRTC data channel (spec §4.5, §5: every send that crosses the
/// backpressure threshold is an explicit suspension point).
#[async_trait]
pub trait ReliableStream: Send + Sync {
    /// True while the stream is still open for sending.
    fn is_open(&self) -> bool;
    /// Current outbound buffered byte count.
    fn buffered_amount(&self) -> usize;
    /// Wait until buffered amount drops to or below `threshold`.
    async fn wait_until_below(&self, threshold: usize) -> Result<(), FileTransferError>;
    /// Send one UTF-8 text frame (a control message or chunk-meta).
    async fn send_text(&self, text: String) -> Result<(), FileTransferError>;
    /// Send one binary frame (a file chunk's raw bytes).
    async fn send_binary(&self, bytes: Vec<u8>) -> Result<(), FileTransferError>;
}

/// Adapts a [`ReliableStream`] into the [`ChunkSink`] seam `meshrelay-files`
/// is written against, so C8's send loop runs unmodified over a peer's
/// actual connection.
pub struct PeerChunkSink<'a>(pub &'a dyn ReliableStream);

#[async_trait]
impl ChunkSink for PeerChunkSink<'_> {
    fn buffered_amount(&self) -> usize {
        self.0.buffered_amount()
    }

    async fn wait_until_below(&self, threshold: usize) -> Result<(), FileTransferError> {
        self.0.wait_until_below(threshold).await
    }

    async fn send_control(&self, message: ControlMessage) -> Result<(), FileTransferError> {
        let text = ControlRouter::encode(&message).map_err(|_| FileTransferError::StreamClosed)?;
        self.0.send_text(text).await
    }

    async fn send_binary(&self, bytes: &[u8]) -> Result<(), FileTransferError> {
        self.0.send_binary(bytes.to_vec()).await
    }
}

/// Delay between a reliable stream opening and the `data_channel_ready`
/// notification, ensuring the remote side has processed `user-info`
/// first (spec §4.5).
pub const DATA_CHANNEL_READY_DELAY: Duration = Duration::from_millis(300);

/// Owns one peer's framing state. A fresh router must be created per
/// reliable stream; the pending-chunk-meta slot is never shared across
/// peers (spec §9).
pub struct ControlRouter {
    peer_id: PeerId,
    codec: StreamCodec,
}

impl ControlRouter {
    /// Create a router for `peer_id`'s reliable stream.
    #[must_use]
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            codec: StreamCodec::new(),
        }
    }

    /// Decode one inbound text frame into a [`MeshEvent`]. Unknown tags
    /// are never produced here — [`meshrelay_protocol::ControlMessage`]
    /// parsing already rejects them at the codec boundary (spec §9).
    ///
    /// # Errors
    ///
    /// Returns the underlying [`CodecError`] on malformed JSON or a
    /// `file-chunk-meta` collision; callers should log and drop per
    /// spec §7, not close the stream.
    pub fn handle_text(&mut self, text: &str) -> Result<Option<MeshEvent>, CodecError> {
        match self.codec.decode_text(text)? {
            Decoded::Control(message) => Ok(Some(MeshEvent::ControlMessageReceived {
                peer_id: self.peer_id.clone(),
                message: message.0,
            })),
            Decoded::Pending => Ok(None),
            Decoded::Chunk(_) => unreachable!("decode_text never yields a chunk"),
        }
    }

    /// Decode one inbound binary frame into a [`MeshEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedBinaryFrame`] if no
    /// `file-chunk-meta` is pending; callers should log and drop.
    pub fn handle_binary(&mut self, bytes: Vec<u8>) -> Result<MeshEvent, CodecError> {
        match self.codec.decode_binary(bytes)? {
            Decoded::Chunk(chunk) => Ok(MeshEvent::ChunkReceived {
                peer_id: self.peer_id.clone(),
                chunk,
            }),
            _ => unreachable!("decode_binary never yields anything but a chunk"),
        }
    }

    /// Serialize an outbound control message for this peer's stream.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if serialization fails.
    pub fn encode(message: &ControlMessage) -> Result<String, CodecError> {
        StreamCodec::encode_text(message)
    }
}

/// An in-process [`ReliableStream`] pair connected by unbounded
/// channels, standing in for a real WebRTC data channel in tests and
/// the demo CLI's loopback mode. Buffered amount is simulated as the
/// count of frames sent but not yet "drained" by the peer end, so
/// backpressure tests can exercise [`meshrelay_files`] without a live
/// transport.
pub mod channel_stream {
    use super::{async_trait, mpsc, FileTransferError, ReliableStream};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// One wire frame crossing a [`ChannelReliableStream`] pair.
    #[derive(Debug, Clone)]
    pub enum Frame {
        /// A UTF-8 text frame (control message or chunk-meta).
        Text(String),
        /// A binary frame (chunk bytes).
        Binary(Vec<u8>),
    }

    /// One end of an in-process reliable-stream pair.
    pub struct ChannelReliableStream {
        tx: mpsc::UnboundedSender<Frame>,
        open: Arc<AtomicBool>,
        buffered: Arc<AtomicUsize>,
        low_watermark: Arc<Notify>,
    }

    impl ChannelReliableStream {
        /// Build a connected pair; `a` and `b` each see the other's sends.
        #[must_use]
        pub fn pair() -> (Self, mpsc::UnboundedReceiver<Frame>, Self, mpsc::UnboundedReceiver<Frame>) {
            let (a_tx, b_rx) = mpsc::unbounded_channel();
            let (b_tx, a_rx) = mpsc::unbounded_channel();
            let open = Arc::new(AtomicBool::new(true));
            let a = Self {
                tx: a_tx,
                open: open.clone(),
                buffered: Arc::new(AtomicUsize::new(0)),
                low_watermark: Arc::new(Notify::new()),
            };
            let b = Self {
                tx: b_tx,
                open,
                buffered: Arc::new(AtomicUsize::new(0)),
                low_watermark: Arc::new(Notify::new()),
            };
            (a, a_rx, b, b_rx)
        }

        /// Simulate the remote side draining buffered bytes, waking any
        /// waiter registered via [`ReliableStream::wait_until_below`].
        pub fn drain(&self, amount: usize) {
            self.buffered.fetch_sub(amount.min(self.buffered.load(Ordering::SeqCst)), Ordering::SeqCst);
            self.low_watermark.notify_waiters();
        }

        /// Close this end; further sends fail.
        pub fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ReliableStream for ChannelReliableStream {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn buffered_amount(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }

        async fn wait_until_below(&self, threshold: usize) -> Result<(), FileTransferError> {
            loop {
                if !self.is_open() {
                    return Err(FileTransferError::StreamClosed);
                }
                if self.buffered_amount() <= threshold {
                    return Ok(());
                }
                self.low_watermark.notified().await;
            }
        }

        async fn send_text(&self, text: String) -> Result<(), FileTransferError> {
            if !self.is_open() {
                return Err(FileTransferError::StreamClosed);
            }
            self.tx.send(Frame::Text(text)).map_err(|_| FileTransferError::StreamClosed)
        }

        async fn send_binary(&self, bytes: Vec<u8>) -> Result<(), FileTransferError> {
            if !self.is_open() {
                return Err(FileTransferError::StreamClosed);
            }
            self.buffered.fetch_add(bytes.len(), Ordering::SeqCst);
            self.tx.send(Frame::Binary(bytes)).map_err(|_| FileTransferError::StreamClosed)
        }
    }

}

/// Schedule the deferred `data_channel_ready` notification for
/// `peer_id`, firing only if `still_open` still reports `true` once the
/// delay elapses.
pub fn schedule_data_channel_ready(
    peer_id: PeerId,
    still_open: impl Fn() -> bool + Send + 'static,
    events_tx: mpsc::UnboundedSender<MeshEvent>,
) {
    tokio::spawn(async move {
        tokio::time::sleep(DATA_CHANNEL_READY_DELAY).await;
        if still_open() {
            let _ = events_tx.send(MeshEvent::DataChannelReady { peer_id });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chunk_meta_json(transfer_id: Uuid, index: u32) -> String {
        serde_json::to_string(&ControlMessage::FileChunkMeta { transfer_id, index }).unwrap()
    }

    #[test]
    fn user_info_text_frame_yields_control_event() {
        let mut router = ControlRouter::new("peer-1".into());
        let text = ControlRouter::encode(&ControlMessage::UserInfo {
            user_id: "peer-1".into(),
            username: "alice".into(),
        })
        .unwrap();
        let event = router.handle_text(&text).unwrap().unwrap();
        match event {
            MeshEvent::ControlMessageReceived { peer_id, message } => {
                assert_eq!(peer_id, "peer-1");
                assert!(matches!(message, ControlMessage::UserInfo { .. }));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn file_chunk_meta_then_binary_yields_chunk_event() {
        let mut router = ControlRouter::new("peer-1".into());
        let transfer_id = Uuid::now_v7();
        let meta_event = router.handle_text(&chunk_meta_json(transfer_id, 0)).unwrap();
        assert!(meta_event.is_none());

        let event = router.handle_binary(vec![1, 2, 3]).unwrap();
        match event {
            MeshEvent::ChunkReceived { peer_id, chunk } => {
                assert_eq!(peer_id, "peer-1");
                assert_eq!(chunk.transfer_id, transfer_id);
                assert_eq!(chunk.bytes, vec![1, 2, 3]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn binary_frame_with_no_pending_meta_errors_and_is_not_fatal() {
        let mut router = ControlRouter::new("peer-1".into());
        assert!(router.handle_binary(vec![1]).is_err());
        // The router itself doesn't close anything on error; the caller
        // decides to log and continue (spec §7).
    }

    struct FakeStream {
        sent_text: std::sync::Mutex<Vec<String>>,
        sent_binary: std::sync::Mutex<Vec<Vec<u8>>>,
    }

    impl FakeStream {
        fn new() -> Self {
            Self {
                sent_text: std::sync::Mutex::new(Vec::new()),
                sent_binary: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReliableStream for FakeStream {
        fn is_open(&self) -> bool {
            true
        }

        fn buffered_amount(&self) -> usize {
            0
        }

        async fn wait_until_below(&self, _threshold: usize) -> Result<(), FileTransferError> {
            Ok(())
        }

        async fn send_text(&self, text: String) -> Result<(), FileTransferError> {
            self.sent_text.lock().unwrap().push(text);
            Ok(())
        }

        async fn send_binary(&self, bytes: Vec<u8>) -> Result<(), FileTransferError> {
            self.sent_binary.lock().unwrap().push(bytes);
            Ok(())
        }
    }

    #[tokio::test]
    async fn peer_chunk_sink_adapts_reliable_stream_sends() {
        let stream = FakeStream::new();
        let sink = PeerChunkSink(&stream);
        sink.send_control(ControlMessage::UserInfo {
            user_id: "u1".into(),
            username: "alice".into(),
        })
        .await
        .unwrap();
        sink.send_binary(&[1, 2, 3]).await.unwrap();

        assert_eq!(stream.sent_text.lock().unwrap().len(), 1);
        assert_eq!(stream.sent_binary.lock().unwrap()[0], vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn data_channel_ready_fires_only_if_still_open() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        schedule_data_channel_ready("peer-1".into(), || false, tx.clone());
        tokio::time::sleep(DATA_CHANNEL_READY_DELAY + Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        schedule_data_channel_ready("peer-2".into(), || true, tx);
        tokio::time::sleep(DATA_CHANNEL_READY_DELAY + Duration::from_millis(50)).await;
        assert!(matches!(
            rx.try_recv().unwrap(),
            MeshEvent::DataChannelReady { peer_id } if peer_id == "peer-2"
        ));
    }
}
