pub mod daemon;
pub mod init;
pub mod version;

pub use daemon::Daemon;
pub use init::Init;
pub use version::Version;
