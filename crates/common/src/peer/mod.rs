mod handle;
pub mod protocol;
mod service;
mod session;

pub use handle::{ConnectionId, FetchError, OutboundFrames, PeerHandle, SendError};
pub use service::{PeerService, PeerServiceConfig, RegisterError, UploadError};
pub use session::Session;
