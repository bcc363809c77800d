use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::file::FileMeta;

/// Per-connection identifier for an outstanding shard fetch
pub type RequestId = u64;

/// A frame as it travels over the transport. Control messages are
///  JSON text frames, payloads are binary frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    pub fn is_binary(&self) -> bool {
        matches!(self, WireFrame::Binary(_))
    }
}

/// Credentials carried by a registration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMeta {
    pub name: String,
    pub pass: String,
}

/// File metadata as it appears on the wire.
///
/// Clients announce uploads with `dateModified` in milliseconds, the
///  server reports `lastModified` in seconds in file lists and
///  `dateModified` in seconds when pushing parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WireFileMeta {
    pub name: String,
    #[serde(
        rename = "dateModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub date_modified: Option<String>,
    #[serde(
        rename = "lastModified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified: Option<String>,
}

impl WireFileMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn modified(meta: &FileMeta) -> Self {
        Self {
            name: meta.name.clone(),
            date_modified: Some(meta.unix_seconds().to_string()),
            last_modified: None,
        }
    }

    pub fn listed(meta: &FileMeta) -> Self {
        Self {
            name: meta.name.clone(),
            date_modified: None,
            last_modified: Some(meta.unix_seconds().to_string()),
        }
    }

    /// Interpret this as an upload announcement from a client
    pub fn to_upload_meta(&self) -> FileMeta {
        FileMeta::from_client(self.name.clone(), self.date_modified.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileListEntry {
    #[serde(rename = "fileMeta")]
    pub file_meta: WireFileMeta,
}

/// Failure categories reported to peers in `error` messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    ProtocolError,
    AuthConflict,
    DuplicateFile,
    NoPeersAvailable,
    FileNotFound,
    FileUnavailable,
    ShardUnavailable,
    PeerDisconnected,
    FetchTimeout,
    StoreUnavailable,
}

/// Every control message either side may send
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    /// Establish the identity of this connection
    Registration {
        #[serde(rename = "userMeta")]
        user_meta: UserMeta,
    },
    /// A client upload; the next binary frame carries the file
    File {
        #[serde(rename = "fileMeta")]
        file_meta: WireFileMeta,
    },
    /// Server to holder: a shard to keep follows.
    /// Holder to server: the reply to `request_id` follows.
    Part {
        #[serde(rename = "fileMeta")]
        file_meta: WireFileMeta,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    /// Client to server: send me my file.
    /// Server to holder: send me the shard stored under this name.
    Request {
        #[serde(rename = "fileMeta")]
        file_meta: WireFileMeta,
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    /// The requested file follows as a binary frame
    Response {
        #[serde(rename = "fileMeta")]
        file_meta: WireFileMeta,
    },
    /// Files owned by the registrant
    FileList { files: Vec<FileListEntry> },
    /// An operation failed
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(rename = "fileMeta", default, skip_serializing_if = "Option::is_none")]
        file_meta: Option<WireFileMeta>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected {0} message from peer")]
    Unexpected(&'static str),
    #[error("connection has not registered")]
    NotRegistered,
    #[error("binary frame with no outstanding upload or fetch")]
    UnsolicitedPayload,
}

impl ControlMessage {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ControlMessage::Registration { .. } => "registration",
            ControlMessage::File { .. } => "file",
            ControlMessage::Part { .. } => "part",
            ControlMessage::Request { .. } => "request",
            ControlMessage::Response { .. } => "response",
            ControlMessage::FileList { .. } => "fileList",
            ControlMessage::Error { .. } => "error",
        }
    }

    pub fn file_list(files: &[FileMeta]) -> Self {
        ControlMessage::FileList {
            files: files
                .iter()
                .map(|meta| FileListEntry {
                    file_meta: WireFileMeta::listed(meta),
                })
                .collect(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>, name: Option<&str>) -> Self {
        ControlMessage::Error {
            kind,
            message: message.into(),
            file_meta: name.map(WireFileMeta::named),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_client_registration() {
        let raw = r#"{"type":"registration","userMeta":{"name":"alice","pass":"pw"}}"#;
        let msg = ControlMessage::decode(raw).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Registration {
                user_meta: UserMeta {
                    name: "alice".into(),
                    pass: "pw".into()
                }
            }
        );
    }

    #[test]
    fn test_decode_client_upload_and_request() {
        let raw = r#"{"type":"file","fileMeta":{"name":"photo.png","dateModified":"1500000000000"}}"#;
        match ControlMessage::decode(raw).unwrap() {
            ControlMessage::File { file_meta } => {
                assert_eq!(file_meta.to_upload_meta().unix_seconds(), 1_500_000_000)
            }
            other => panic!("unexpected message {:?}", other),
        }

        // the web client sends an empty dateModified with requests
        let raw = r#"{"type":"request","fileMeta":{"name":"photo.png","dateModified":""}}"#;
        match ControlMessage::decode(raw).unwrap() {
            ControlMessage::Request {
                file_meta,
                request_id,
            } => {
                assert_eq!(file_meta.name, "photo.png");
                assert_eq!(request_id, None);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_encode_shard_request_carries_id() {
        let msg = ControlMessage::Request {
            file_meta: WireFileMeta::named("abc"),
            request_id: Some(7),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["fileMeta"]["name"], "abc");
        assert_eq!(json["requestId"], 7);
    }

    #[test]
    fn test_encode_file_list() {
        let files = vec![FileMeta::from_unix_seconds("a.txt", 42)];
        let json: serde_json::Value =
            serde_json::from_str(&ControlMessage::file_list(&files).encode().unwrap()).unwrap();
        assert_eq!(json["type"], "fileList");
        assert_eq!(json["files"][0]["fileMeta"]["name"], "a.txt");
        assert_eq!(json["files"][0]["fileMeta"]["lastModified"], "42");
    }

    #[test]
    fn test_unknown_type_is_malformed() {
        let err = ControlMessage::decode(r#"{"type":"teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(ControlMessage::decode("not json").is_err());
    }

    #[test]
    fn test_error_kind_wire_name() {
        let msg = ControlMessage::error(ErrorKind::ShardUnavailable, "shard 1", Some("photo.png"));
        let json: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "ShardUnavailable");
        assert_eq!(json["fileMeta"]["name"], "photo.png");
    }
}
