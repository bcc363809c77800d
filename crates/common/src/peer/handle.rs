//! Outbound half of a live connection and its pending shard fetches.
//!
//! A [`PeerHandle`] is what the rest of the server holds on to for a
//!  connected peer. Sending never blocks: frames are queued on a flume
//!  channel that the transport writer drains. Fetching a shard parks a
//!  oneshot sender on the handle; the connection's session loop
//!  completes it when the matching binary frame arrives.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::protocol::{ControlMessage, ErrorKind, RequestId, WireFileMeta, WireFrame};
use crate::file::{ContentAddress, File, FileMeta, Shard};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("peer disconnected before replying")]
    PeerDisconnected,
    #[error("peer did not reply within {0:?}")]
    FetchTimeout(Duration),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::PeerDisconnected => ErrorKind::PeerDisconnected,
            FetchError::FetchTimeout(_) => ErrorKind::FetchTimeout,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
    #[error("failed to encode control message: {0}")]
    Encode(String),
}

/// Timed-out fetches a positional peer may leave parked before the
///  connection is treated as dead
pub const MAX_ABANDONED_FETCHES: usize = 16;

/// Fetches waiting on this connection, oldest first.
///
/// Until the peer has echoed a request id, entries whose caller gave up
///  stay in place: a late positional reply then lands on the abandoned
///  slot and is dropped instead of being handed to a newer request.
#[derive(Default)]
struct PendingFetches {
    closed: bool,
    /// The peer tags its replies, so abandoned slots can go right away
    echoes_ids: bool,
    queue: VecDeque<(RequestId, oneshot::Sender<Bytes>)>,
}

impl PendingFetches {
    fn abandoned(&self) -> usize {
        self.queue.iter().filter(|(_, tx)| tx.is_closed()).count()
    }
}

struct PeerHandleInner {
    id: ConnectionId,
    outbound: flume::Sender<WireFrame>,
    pending: Mutex<PendingFetches>,
    next_request_id: AtomicU64,
}

/// Cloneable handle on one live connection
#[derive(Clone)]
pub struct PeerHandle {
    inner: Arc<PeerHandleInner>,
}

/// Frames queued for the transport, drained by the connection writer
#[derive(Debug)]
pub struct OutboundFrames {
    rx: flume::Receiver<WireFrame>,
}

impl OutboundFrames {
    /// Next queued frame, or None once every handle is gone
    pub async fn recv(&self) -> Option<WireFrame> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<WireFrame> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> flume::r#async::RecvStream<'static, WireFrame> {
        self.rx.into_stream()
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for PeerHandle {}

impl PeerHandle {
    /// Create a handle for a fresh connection along with the queue its
    ///  writer should drain
    pub fn new() -> (Self, OutboundFrames) {
        let (tx, rx) = flume::unbounded();
        let handle = Self {
            inner: Arc::new(PeerHandleInner {
                id: Uuid::new_v4(),
                outbound: tx,
                pending: Mutex::new(PendingFetches::default()),
                next_request_id: AtomicU64::new(1),
            }),
        };
        (handle, OutboundFrames { rx })
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pending.lock().closed || self.inner.outbound.is_disconnected()
    }

    /// Number of fetches still parked on this connection, abandoned ones included
    pub fn pending_fetches(&self) -> usize {
        self.inner.pending.lock().queue.len()
    }

    /// Mark the connection gone. Every parked fetch fails with
    ///  `PeerDisconnected` and later fetches fail immediately.
    pub fn close(&self) {
        let mut pending = self.inner.pending.lock();
        pending.closed = true;
        // dropping the senders wakes the waiters
        pending.queue.clear();
    }

    fn push(&self, frame: WireFrame) -> Result<(), SendError> {
        if self.inner.pending.lock().closed {
            return Err(SendError::Closed(self.inner.id));
        }
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| SendError::Closed(self.inner.id))
    }

    pub fn send_control(&self, message: &ControlMessage) -> Result<(), SendError> {
        let text = message
            .encode()
            .map_err(|e| SendError::Encode(e.to_string()))?;
        self.push(WireFrame::Text(text))
    }

    pub fn send_binary(&self, payload: Bytes) -> Result<(), SendError> {
        self.push(WireFrame::Binary(payload))
    }

    /// Hand a shard to this peer for safekeeping
    pub fn send_part(&self, shard: &Shard, parent: &FileMeta) -> Result<(), SendError> {
        let mut file_meta = WireFileMeta::modified(parent);
        file_meta.name = shard.content_address().to_string();
        self.send_control(&ControlMessage::Part {
            file_meta,
            request_id: None,
        })?;
        self.send_binary(shard.data.clone())
    }

    /// Deliver a reassembled file to its owner
    pub fn send_file(&self, file: &File) -> Result<(), SendError> {
        self.send_control(&ControlMessage::Response {
            file_meta: WireFileMeta::modified(&file.meta),
        })?;
        self.send_binary(file.data.clone())
    }

    pub fn send_file_list(&self, files: &[FileMeta]) -> Result<(), SendError> {
        self.send_control(&ControlMessage::file_list(files))
    }

    pub fn send_error(
        &self,
        kind: ErrorKind,
        message: impl Into<String>,
        name: Option<&str>,
    ) -> Result<(), SendError> {
        self.send_control(&ControlMessage::error(kind, message, name))
    }

    /// Ask this peer for the shard stored under `address` and wait for it.
    ///
    /// Fails with `PeerDisconnected` if the connection is or becomes
    ///  closed, and with `FetchTimeout` once `timeout` elapses.
    pub async fn fetch(
        &self,
        address: &ContentAddress,
        timeout: Duration,
    ) -> Result<Bytes, FetchError> {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return Err(FetchError::PeerDisconnected);
            }
            pending.queue.push_back((request_id, tx));
        }

        let request = ControlMessage::Request {
            file_meta: WireFileMeta::named(address.as_str()),
            request_id: Some(request_id),
        };
        if let Err(e) = self.send_control(&request) {
            tracing::debug!(connection = %self.inner.id, "shard request not sent: {}", e);
            self.inner
                .pending
                .lock()
                .queue
                .retain(|(id, _)| *id != request_id);
            return Err(FetchError::PeerDisconnected);
        }
        tracing::debug!(
            connection = %self.inner.id,
            request_id,
            "requested shard {}",
            address
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(FetchError::PeerDisconnected),
            Err(_) => {
                self.abandon(request_id);
                Err(FetchError::FetchTimeout(timeout))
            }
        }
    }

    /// Give up on a timed-out fetch
    fn abandon(&self, request_id: RequestId) {
        let abandoned = {
            let mut pending = self.inner.pending.lock();
            if pending.echoes_ids {
                pending.queue.retain(|(id, _)| *id != request_id);
                return;
            }
            pending.abandoned()
        };

        if abandoned > MAX_ABANDONED_FETCHES {
            tracing::warn!(
                connection = %self.inner.id,
                "{} shard requests left unanswered, dropping connection",
                abandoned
            );
            self.close();
        }
    }

    /// Route a binary frame received from this peer to the fetch it answers.
    ///
    /// With a request id the matching fetch is completed; without one the
    ///  oldest parked fetch is. Returns false when nothing was waiting for
    ///  the frame.
    pub fn deliver_reply(&self, request_id: Option<RequestId>, payload: Bytes) -> bool {
        let waiter = {
            let mut pending = self.inner.pending.lock();
            match request_id {
                Some(id) => {
                    if !pending.echoes_ids {
                        pending.echoes_ids = true;
                        pending.queue.retain(|(_, tx)| !tx.is_closed());
                    }
                    pending
                        .queue
                        .iter()
                        .position(|(queued, _)| *queued == id)
                        .and_then(|at| pending.queue.remove(at))
                }
                None => pending.queue.pop_front(),
            }
        };

        match waiter {
            Some((id, tx)) => {
                if tx.send(payload).is_err() {
                    tracing::debug!(
                        connection = %self.inner.id,
                        request_id = id,
                        "late shard reply dropped, fetch was abandoned"
                    );
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn address(name: &str) -> ContentAddress {
        ContentAddress::derive(name, &Identity::from_credentials("bob", "pw"))
    }

    fn request_id_of(frame: WireFrame) -> RequestId {
        let WireFrame::Text(text) = frame else {
            panic!("expected a control frame");
        };
        match ControlMessage::decode(&text).unwrap() {
            ControlMessage::Request { request_id, .. } => request_id.unwrap(),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_positional_reply_completes_fetch() {
        let (handle, outbound) = PeerHandle::new();
        let holder = handle.clone();

        let fetch = tokio::spawn(async move {
            holder
                .fetch(&address("photo.png"), Duration::from_secs(5))
                .await
        });

        let _ = outbound.recv().await.unwrap();
        assert!(handle.deliver_reply(None, Bytes::from_static(b"payload")));
        assert_eq!(fetch.await.unwrap().unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(handle.pending_fetches(), 0);
    }

    #[tokio::test]
    async fn test_replies_correlate_by_request_id() {
        let (handle, outbound) = PeerHandle::new();

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.fetch(&address("a"), Duration::from_secs(5)).await })
        };
        let first_id = request_id_of(outbound.recv().await.unwrap());

        let second = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.fetch(&address("b"), Duration::from_secs(5)).await })
        };
        let second_id = request_id_of(outbound.recv().await.unwrap());

        // answer out of order
        assert!(handle.deliver_reply(Some(second_id), Bytes::from_static(b"second")));
        assert!(handle.deliver_reply(Some(first_id), Bytes::from_static(b"first")));

        assert_eq!(first.await.unwrap().unwrap(), Bytes::from_static(b"first"));
        assert_eq!(second.await.unwrap().unwrap(), Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_close_fails_parked_fetch() {
        let (handle, outbound) = PeerHandle::new();
        let fetch = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.fetch(&address("a"), Duration::from_secs(60)).await })
        };
        let _ = outbound.recv().await.unwrap();

        handle.close();
        assert_eq!(fetch.await.unwrap(), Err(FetchError::PeerDisconnected));

        // and nothing new can be parked
        let err = handle
            .fetch(&address("b"), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::PeerDisconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_times_out_and_late_reply_is_dropped() {
        let (handle, _outbound) = PeerHandle::new();

        let err = handle
            .fetch(&address("a"), Duration::from_secs(3))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::FetchTimeout(Duration::from_secs(3)));

        // the abandoned slot absorbs the late reply
        assert_eq!(handle.pending_fetches(), 1);
        assert!(handle.deliver_reply(None, Bytes::from_static(b"late")));
        assert_eq!(handle.pending_fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_positional_peer_is_dropped_after_too_many_timeouts() {
        let (handle, _outbound) = PeerHandle::new();

        for _ in 0..MAX_ABANDONED_FETCHES {
            let err = handle
                .fetch(&address("a"), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert_eq!(err, FetchError::FetchTimeout(Duration::from_secs(1)));
        }
        assert_eq!(handle.pending_fetches(), MAX_ABANDONED_FETCHES);
        assert!(!handle.is_closed());

        // one more and the connection is given up on
        let err = handle
            .fetch(&address("a"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::FetchTimeout(Duration::from_secs(1)));
        assert!(handle.is_closed());
        assert_eq!(handle.pending_fetches(), 0);
        assert_eq!(
            handle.fetch(&address("a"), Duration::from_secs(1)).await,
            Err(FetchError::PeerDisconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_fetches_free_their_slot_once_ids_are_echoed() {
        let (handle, outbound) = PeerHandle::new();

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.fetch(&address("a"), Duration::from_secs(5)).await })
        };
        let id = request_id_of(outbound.recv().await.unwrap());
        assert!(handle.deliver_reply(Some(id), Bytes::from_static(b"tagged")));
        assert_eq!(first.await.unwrap().unwrap(), Bytes::from_static(b"tagged"));

        for _ in 0..(MAX_ABANDONED_FETCHES * 3) {
            let err = handle
                .fetch(&address("b"), Duration::from_secs(1))
                .await
                .unwrap_err();
            assert_eq!(err, FetchError::FetchTimeout(Duration::from_secs(1)));
        }
        assert_eq!(handle.pending_fetches(), 0);
        assert!(!handle.is_closed());
    }

    #[test]
    fn test_unsolicited_reply_is_reported() {
        let (handle, _outbound) = PeerHandle::new();
        assert!(!handle.deliver_reply(None, Bytes::from_static(b"x")));
        assert!(!handle.deliver_reply(Some(9), Bytes::from_static(b"x")));
    }

    #[test]
    fn test_send_after_close_fails() {
        let (handle, outbound) = PeerHandle::new();
        handle.send_binary(Bytes::from_static(b"a")).unwrap();
        handle.close();
        assert!(matches!(
            handle.send_binary(Bytes::from_static(b"b")),
            Err(SendError::Closed(_))
        ));
        assert_eq!(
            outbound.try_recv(),
            Some(WireFrame::Binary(Bytes::from_static(b"a")))
        );
        assert_eq!(outbound.try_recv(), None);
    }
}
