use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::file::ContentAddress;
use crate::identity::Identity;
use crate::peer::protocol::{ControlMessage, ErrorKind, UserMeta, WireFileMeta, WireFrame};
use crate::peer::{OutboundFrames, PeerHandle, PeerService, Session};
use crate::store::ContentStore;

/// How a test peer answers shard requests from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HolderMode {
    /// Reply with a bare binary frame, like the web client does
    #[default]
    Legacy,
    /// Announce the reply with a `part` echoing the request id first
    EchoRequestId,
    /// Never reply
    Silent,
}

/// Something the server told this peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    FileList(Vec<String>),
    File {
        name: String,
        data: Bytes,
    },
    Error {
        kind: ErrorKind,
        message: String,
        name: Option<String>,
    },
}

/// A simulated client connected to a [`PeerService`] through a real
///  [`Session`], exchanging frames over in-memory channels.
///
/// The peer keeps the parts the server pushes to it and answers shard
///  requests according to its [`HolderMode`].
pub struct TestPeer {
    /// The name this peer registered under
    pub name: String,
    identity: Identity,
    listed_files: Vec<String>,
    to_server: Option<flume::Sender<WireFrame>>,
    events: flume::Receiver<ClientEvent>,
    parts: Arc<Mutex<HashMap<String, Bytes>>>,
    session_task: Option<JoinHandle<()>>,
    client_task: Option<JoinHandle<()>>,
}

impl TestPeer {
    /// Open a connection to `service` and register as `name`.
    ///
    /// Waits for the file list the server sends back.
    pub async fn connect<S: ContentStore>(
        service: &PeerService<S>,
        name: impl Into<String>,
        password: &str,
        mode: HolderMode,
    ) -> Result<Self> {
        let name = name.into();
        let (handle, outbound) = PeerHandle::new();
        let (to_server, inbound) = flume::unbounded();
        let (events_tx, events) = flume::unbounded();
        let parts = Arc::new(Mutex::new(HashMap::new()));

        let session = Session::new(service.clone(), handle);
        let session_task = tokio::spawn(session.run(inbound.into_stream().map(Ok::<_, Infallible>)));
        let client_task = tokio::spawn(client_loop(
            name.clone(),
            outbound,
            to_server.clone(),
            parts.clone(),
            events_tx,
            mode,
        ));

        let mut peer = Self {
            identity: Identity::from_credentials(name.clone(), password),
            name,
            listed_files: Vec::new(),
            to_server: Some(to_server),
            events,
            parts,
            session_task: Some(session_task),
            client_task: Some(client_task),
        };

        peer.send(ControlMessage::Registration {
            user_meta: UserMeta {
                name: peer.name.clone(),
                pass: password.to_string(),
            },
        })?;
        match peer.next_event(Duration::from_secs(5)).await? {
            ClientEvent::FileList(files) => peer.listed_files = files,
            other => return Err(anyhow!("[{}] registration failed: {:?}", peer.name, other)),
        }

        tracing::debug!("[{}] connected", peer.name);
        Ok(peer)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Names from the file list received at registration
    pub fn listed_files(&self) -> &[String] {
        &self.listed_files
    }

    pub fn is_connected(&self) -> bool {
        self.to_server.is_some()
    }

    /// Push a raw frame to the server
    pub fn send_frame(&self, frame: WireFrame) -> Result<()> {
        let tx = self
            .to_server
            .as_ref()
            .ok_or_else(|| anyhow!("[{}] not connected", self.name))?;
        tx.send(frame)
            .map_err(|_| anyhow!("[{}] session is gone", self.name))
    }

    pub fn send(&self, message: ControlMessage) -> Result<()> {
        self.send_frame(WireFrame::Text(message.encode()?))
    }

    /// Announce and send a file the way the web client does
    pub fn upload(&self, name: &str, data: impl Into<Bytes>) -> Result<()> {
        let millis = time::OffsetDateTime::now_utc().unix_timestamp() * 1000;
        self.send(ControlMessage::File {
            file_meta: WireFileMeta {
                name: name.to_string(),
                date_modified: Some(millis.to_string()),
                last_modified: None,
            },
        })?;
        self.send_frame(WireFrame::Binary(data.into()))
    }

    pub fn request(&self, name: &str) -> Result<()> {
        self.send(ControlMessage::Request {
            file_meta: WireFileMeta::named(name),
            request_id: None,
        })
    }

    /// Next message from the server, failing after `timeout`
    pub async fn next_event(&self, timeout: Duration) -> Result<ClientEvent> {
        tokio::time::timeout(timeout, self.events.recv_async())
            .await
            .map_err(|_| anyhow!("[{}] no event within {:?}", self.name, timeout))?
            .map_err(|_| anyhow!("[{}] client loop stopped", self.name))
    }

    /// Whether the server has sent anything not yet consumed
    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Request `name` and wait for the file, turning an error reply into `Err`
    pub async fn fetch_file(&self, name: &str, timeout: Duration) -> Result<Bytes> {
        self.request(name)?;
        match self.next_event(timeout).await? {
            ClientEvent::File { name: got, data } if got == name => Ok(data),
            ClientEvent::Error { kind, message, .. } => {
                Err(anyhow!("[{}] {:?}: {}", self.name, kind, message))
            }
            other => Err(anyhow!("[{}] unexpected event {:?}", self.name, other)),
        }
    }

    /// Wait for an error reply and return its kind
    pub async fn expect_error(&self, timeout: Duration) -> Result<ErrorKind> {
        match self.next_event(timeout).await? {
            ClientEvent::Error { kind, .. } => Ok(kind),
            other => Err(anyhow!("[{}] expected an error, got {:?}", self.name, other)),
        }
    }

    /// Parts this peer holds, keyed by content address
    pub fn held_parts(&self) -> HashMap<String, Bytes> {
        self.parts.lock().clone()
    }

    pub fn holds(&self, address: &ContentAddress) -> bool {
        self.parts.lock().contains_key(address.as_str())
    }

    /// Close the connection and wait for the server side to tear down
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(task) = self.client_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.to_server.take();
        if let Some(task) = self.session_task.take() {
            task.await
                .map_err(|e| anyhow!("[{}] session task failed: {}", self.name, e))?;
        }
        tracing::debug!("[{}] disconnected", self.name);
        Ok(())
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        if let Some(task) = self.client_task.take() {
            task.abort();
        }
    }
}

async fn client_loop(
    name: String,
    outbound: OutboundFrames,
    to_server: flume::Sender<WireFrame>,
    parts: Arc<Mutex<HashMap<String, Bytes>>>,
    events: flume::Sender<ClientEvent>,
    mode: HolderMode,
) {
    let mut announced: Option<ControlMessage> = None;

    while let Some(frame) = outbound.recv().await {
        match frame {
            WireFrame::Text(text) => {
                let message = match ControlMessage::decode(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("[{}] bad frame from server: {}", name, e);
                        continue;
                    }
                };
                match message {
                    ControlMessage::Part { .. } | ControlMessage::Response { .. } => {
                        announced = Some(message)
                    }
                    ControlMessage::Request {
                        file_meta,
                        request_id,
                    } => {
                        let stored = parts.lock().get(&file_meta.name).cloned();
                        let Some(data) = stored else {
                            tracing::debug!("[{}] asked for unknown part {}", name, file_meta.name);
                            continue;
                        };
                        let reply = match mode {
                            HolderMode::Silent => continue,
                            HolderMode::Legacy => vec![WireFrame::Binary(data)],
                            HolderMode::EchoRequestId => {
                                let part = ControlMessage::Part {
                                    file_meta: WireFileMeta::named(file_meta.name),
                                    request_id,
                                };
                                match part.encode() {
                                    Ok(text) => vec![WireFrame::Text(text), WireFrame::Binary(data)],
                                    Err(_) => continue,
                                }
                            }
                        };
                        for frame in reply {
                            let _ = to_server.send(frame);
                        }
                    }
                    ControlMessage::FileList { files } => {
                        let names = files.into_iter().map(|f| f.file_meta.name).collect();
                        let _ = events.send(ClientEvent::FileList(names));
                    }
                    ControlMessage::Error {
                        kind,
                        message,
                        file_meta,
                    } => {
                        let _ = events.send(ClientEvent::Error {
                            kind,
                            message,
                            name: file_meta.map(|m| m.name),
                        });
                    }
                    other => tracing::warn!("[{}] unexpected {} from server", name, other.type_name()),
                }
            }
            WireFrame::Binary(data) => match announced.take() {
                Some(ControlMessage::Part { file_meta, .. }) => {
                    parts.lock().insert(file_meta.name, data);
                }
                Some(ControlMessage::Response { file_meta }) => {
                    let _ = events.send(ClientEvent::File {
                        name: file_meta.name,
                        data,
                    });
                }
                _ => tracing::warn!("[{}] unannounced payload from server", name),
            },
        }
    }
}
