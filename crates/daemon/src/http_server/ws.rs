use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use tokio::sync::oneshot;

use common::peer::protocol::WireFrame;
use common::peer::{OutboundFrames, PeerHandle, Session};

use crate::ServiceState;

/// Largest single websocket message accepted, which bounds upload size
pub const MAX_MESSAGE_BYTES: usize = 512 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
#[error("peer closed the websocket")]
pub struct PeerClosed;

pub async fn handler(ws: WebSocketUpgrade, State(state): State<ServiceState>) -> Response {
    ws.max_message_size(MAX_MESSAGE_BYTES)
        .max_frame_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: ServiceState) {
    let (handle, outbound) = PeerHandle::new();
    let (sink, stream) = socket.split();

    let (done_tx, done_rx) = oneshot::channel();
    let writer = tokio::spawn(write_frames(sink, outbound, done_rx));

    let inbound = Box::pin(stream.filter_map(|message| async move {
        match message {
            Ok(Message::Text(text)) => Some(Ok(WireFrame::Text(text))),
            Ok(Message::Binary(data)) => Some(Ok(WireFrame::Binary(Bytes::from(data)))),
            // tungstenite answers pings on its own
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
            Ok(Message::Close(_)) => Some(Err(anyhow::Error::new(PeerClosed))),
            Err(e) => Some(Err(anyhow::Error::new(e))),
        }
    }));

    Session::new(state.peer().clone(), handle).run(inbound).await;

    let _ = done_tx.send(());
    if let Err(e) = writer.await {
        tracing::warn!("websocket writer failed: {}", e);
    }
}

/// Drain queued frames onto the socket until the session ends, then flush
///  whatever is still queued and close
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    outbound: OutboundFrames,
    mut done: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(to_message(frame)).await {
                        tracing::debug!("websocket write failed: {}", e);
                        return;
                    }
                }
                None => break,
            },
            _ = &mut done => {
                while let Some(frame) = outbound.try_recv() {
                    if sink.send(to_message(frame)).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(data) => Message::Binary(data.to_vec()),
    }
}
