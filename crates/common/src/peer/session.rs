//! Per-connection control loop.
//!
//! A [`Session`] reads frames from one peer, keeps track of which binary
//!  payload the peer announced last, and turns control messages into
//!  calls on the shared [`PeerService`]. Retrievals run on their own
//!  tasks so the loop keeps reading while they wait on holders; those
//!  tasks die with the session.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::file::{File, FileMeta};
use crate::identity::Identity;
use crate::store::ContentStore;

use super::handle::PeerHandle;
use super::protocol::{ControlMessage, ErrorKind, ProtocolError, RequestId, WireFrame};
use super::service::PeerService;

/// What the next binary frame on this connection is for
#[derive(Debug)]
enum Expect {
    Upload(FileMeta),
    Reply(Option<RequestId>),
}

pub struct Session<S: ContentStore> {
    service: PeerService<S>,
    handle: PeerHandle,
    identity: Option<Identity>,
    expecting: Option<Expect>,
    requests: JoinSet<()>,
}

impl<S: ContentStore> Session<S> {
    pub fn new(service: PeerService<S>, handle: PeerHandle) -> Self {
        Self {
            service,
            handle,
            identity: None,
            expecting: None,
            requests: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    /// Drive the connection until `inbound` ends or fails, then tear it
    ///  down: the registry binding goes, parked fetches fail and pending
    ///  file requests are cancelled.
    pub async fn run<St, E>(mut self, mut inbound: St)
    where
        St: Stream<Item = Result<WireFrame, E>> + Unpin,
        E: Display,
    {
        let span = tracing::info_span!("session", connection = %self.handle.id());
        async move {
            tracing::debug!("session opened");
            loop {
                tokio::select! {
                    frame = inbound.next() => match frame {
                        Some(Ok(frame)) => self.on_frame(frame).await,
                        Some(Err(e)) => {
                            tracing::info!("transport error, closing: {}", e);
                            break;
                        }
                        None => break,
                    },
                    Some(joined) = self.requests.join_next(), if !self.requests.is_empty() => {
                        if let Err(e) = joined {
                            if e.is_panic() {
                                tracing::error!("file request task panicked: {}", e);
                            }
                        }
                    }
                }
            }
            self.close();
        }
        .instrument(span)
        .await
    }

    fn close(&mut self) {
        let unbound = self.service.registry().unregister(&self.handle);
        self.handle.close();
        if !self.requests.is_empty() {
            tracing::debug!("cancelling {} file requests", self.requests.len());
        }
        self.requests.abort_all();
        match unbound {
            Some(identity) => tracing::info!("session closed for {}", identity),
            None => tracing::debug!("session closed"),
        }
    }

    async fn on_frame(&mut self, frame: WireFrame) {
        match frame {
            WireFrame::Text(text) => match ControlMessage::decode(&text) {
                Ok(message) => {
                    tracing::trace!("received {}", message.type_name());
                    self.on_control(message).await
                }
                Err(e) => self.reject(e),
            },
            WireFrame::Binary(payload) => self.on_binary(payload).await,
        }
    }

    async fn on_control(&mut self, message: ControlMessage) {
        if let Some(stale) = self.expecting.take() {
            tracing::debug!("announcement {:?} superseded before its payload", stale);
        }

        match message {
            ControlMessage::Registration { user_meta } => {
                let identity = Identity::from_credentials(user_meta.name, &user_meta.pass);
                self.on_registration(identity).await
            }
            ControlMessage::File { file_meta } => {
                if self.identity.is_none() {
                    return self.reject(ProtocolError::NotRegistered);
                }
                self.expecting = Some(Expect::Upload(file_meta.to_upload_meta()));
            }
            ControlMessage::Part { request_id, .. } => {
                self.expecting = Some(Expect::Reply(request_id));
            }
            ControlMessage::Request { file_meta, .. } => {
                let Some(owner) = self.identity.clone() else {
                    return self.reject(ProtocolError::NotRegistered);
                };
                self.spawn_request(owner, file_meta.name);
            }
            other => self.reject(ProtocolError::Unexpected(other.type_name())),
        }
    }

    async fn on_registration(&mut self, identity: Identity) {
        if let Some(previous) = self.identity.take() {
            if !previous.same_peer(&identity) {
                tracing::info!("{} re-registering as {}", previous, identity);
                self.service.registry().unregister(&self.handle);
            }
        }

        match self.service.register(&identity, &self.handle).await {
            Ok(files) => {
                tracing::info!("registered {} with {} files", identity, files.len());
                self.identity = Some(identity);
                if let Err(e) = self.handle.send_file_list(&files) {
                    tracing::debug!("file list not sent: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("registration of {} failed: {}", identity, e);
                self.send_error(e.kind(), e.to_string(), None);
            }
        }
    }

    async fn on_binary(&mut self, payload: Bytes) {
        match self.expecting.take() {
            Some(Expect::Upload(meta)) => self.on_upload(meta, payload).await,
            Some(Expect::Reply(request_id)) => self.on_reply(request_id, payload),
            // a bare payload is a reply from a holder that predates request ids
            None => self.on_reply(None, payload),
        }
    }

    async fn on_upload(&mut self, meta: FileMeta, payload: Bytes) {
        let Some(owner) = self.identity.clone() else {
            return self.reject(ProtocolError::NotRegistered);
        };
        let name = meta.name.clone();

        match self.service.upload(File::new(owner, meta, payload)).await {
            Ok(shards) => tracing::debug!("stored {} across {} holders", name, shards.len()),
            Err(e) => {
                tracing::info!("upload of {} refused: {}", name, e);
                self.send_error(e.kind(), e.to_string(), Some(&name));
            }
        }
    }

    fn on_reply(&mut self, request_id: Option<RequestId>, payload: Bytes) {
        if !self.handle.deliver_reply(request_id, payload) {
            self.reject(ProtocolError::UnsolicitedPayload);
        }
    }

    fn spawn_request(&mut self, owner: Identity, name: String) {
        let service = self.service.clone();
        let handle = self.handle.clone();

        self.requests.spawn(
            async move {
                let sent = match service.retrieve(&owner, &name).await {
                    Ok(file) => handle.send_file(&file),
                    Err(e) => {
                        tracing::info!("request for {} failed: {}", name, e);
                        handle.send_error(e.kind(), e.to_string(), Some(&name))
                    }
                };
                if let Err(e) = sent {
                    tracing::debug!("reply for {} not sent: {}", name, e);
                }
            }
            .in_current_span(),
        );
    }

    fn reject(&self, err: ProtocolError) {
        tracing::warn!("protocol error: {}", err);
        self.send_error(ErrorKind::ProtocolError, err.to_string(), None);
    }

    fn send_error(&self, kind: ErrorKind, message: String, name: Option<&str>) {
        if let Err(e) = self.handle.send_error(kind, message, name) {
            tracing::debug!("error reply not sent: {}", e);
        }
    }
}
