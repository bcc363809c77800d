//! A daemon bound to a loopback port and raw websocket peers talking to it
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use nfinite_daemon::http_server::{self, HttpServerError};
use nfinite_daemon::{Database, ServiceConfig, ServiceState};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub struct TestDaemon {
    pub addr: SocketAddr,
    pub state: ServiceState,
    shutdown_tx: watch::Sender<()>,
    task: JoinHandle<Result<(), HttpServerError>>,
}

impl TestDaemon {
    pub async fn start(state: ServiceState) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let config = http_server::Config::new(addr, tracing::Level::DEBUG);
        let task = tokio::spawn(http_server::serve(
            listener,
            config,
            state.clone(),
            shutdown_rx,
        ));
        Self {
            addr,
            state,
            shutdown_tx,
            task,
        }
    }

    pub async fn in_memory() -> Self {
        Self::with_config(&ServiceConfig::default()).await
    }

    pub async fn with_config(config: &ServiceConfig) -> Self {
        let database = Database::in_memory().await.unwrap();
        Self::start(ServiceState::from_database(database, config)).await
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/websockets", self.addr)
    }

    pub async fn connect(&self, name: &str) -> WsPeer {
        WsPeer::connect(&self.ws_url(), name, "password").await
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.task.await.unwrap().unwrap();
    }
}

pub struct WsPeer {
    pub name: String,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Names from the file list received on registration
    pub listed_files: Vec<String>,
}

impl WsPeer {
    /// Open a socket and send a registration, without waiting for a reply
    pub async fn open(url: &str, name: &str, pass: &str) -> Self {
        let (ws, _) = connect_async(url).await.unwrap();
        let mut peer = Self {
            name: name.to_string(),
            ws,
            listed_files: Vec::new(),
        };
        peer.send_control(json!({
            "type": "registration",
            "userMeta": {"name": name, "pass": pass},
        }))
        .await;
        peer
    }

    pub async fn connect(url: &str, name: &str, pass: &str) -> Self {
        let mut peer = Self::open(url, name, pass).await;
        let list = peer.next_control().await;
        assert_eq!(list["type"], "fileList", "{}", list);
        peer.listed_files = list["files"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["fileMeta"]["name"].as_str().unwrap().to_string())
            .collect();
        peer
    }

    pub async fn send_control(&mut self, message: Value) {
        self.ws.send(Message::Text(message.to_string())).await.unwrap();
    }

    pub async fn send_binary(&mut self, data: Vec<u8>) {
        self.ws.send(Message::Binary(data)).await.unwrap();
    }

    async fn next_message(&mut self) -> Message {
        loop {
            let next = tokio::time::timeout(EVENT_TIMEOUT, self.ws.next())
                .await
                .unwrap_or_else(|_| panic!("{} waited too long for a message", self.name));
            match next {
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(message)) => return message,
                other => panic!("{} lost its socket: {:?}", self.name, other),
            }
        }
    }

    pub async fn next_control(&mut self) -> Value {
        match self.next_message().await {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("{} expected a control message, got {:?}", self.name, other),
        }
    }

    pub async fn next_binary(&mut self) -> Vec<u8> {
        match self.next_message().await {
            Message::Binary(data) => data,
            other => panic!("{} expected a binary frame, got {:?}", self.name, other),
        }
    }

    pub async fn upload(&mut self, name: &str, data: Vec<u8>) {
        self.send_control(json!({
            "type": "file",
            "fileMeta": {"name": name, "dateModified": "1700000000000"},
        }))
        .await;
        self.send_binary(data).await;
    }

    pub async fn request(&mut self, name: &str) {
        self.send_control(json!({"type": "request", "fileMeta": {"name": name}}))
            .await;
    }

    /// Take one pushed shard: its address and bytes
    pub async fn receive_part(&mut self) -> (String, Vec<u8>) {
        let part = self.next_control().await;
        assert_eq!(part["type"], "part", "{}", part);
        let address = part["fileMeta"]["name"].as_str().unwrap().to_string();
        (address, self.next_binary().await)
    }

    /// Answer the next shard request out of `parts`, echoing its request id
    pub async fn serve_request(&mut self, parts: &HashMap<String, Vec<u8>>) {
        let request = self.next_control().await;
        assert_eq!(request["type"], "request", "{}", request);
        let address = request["fileMeta"]["name"].as_str().unwrap().to_string();
        self.send_control(json!({
            "type": "part",
            "fileMeta": {"name": address},
            "requestId": request["requestId"],
        }))
        .await;
        self.send_binary(parts[&address].clone()).await;
    }

    /// Wait for the full file after a request
    pub async fn receive_file(&mut self) -> (String, Vec<u8>) {
        let response = self.next_control().await;
        assert_eq!(response["type"], "response", "{}", response);
        let name = response["fileMeta"]["name"].as_str().unwrap().to_string();
        (name, self.next_binary().await)
    }

    pub async fn expect_error(&mut self) -> Value {
        let error = self.next_control().await;
        assert_eq!(error["type"], "error", "{}", error);
        error
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
