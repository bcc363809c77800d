mod messages;

pub use messages::{
    ControlMessage, ErrorKind, FileListEntry, ProtocolError, RequestId, UserMeta, WireFileMeta,
    WireFrame,
};
