/// Lightweight harness for multi-peer integration tests
///
/// Peers are simulated clients wired to a real [`crate::peer::Session`]
/// over in-memory frame channels, so whole upload and retrieval flows run
/// in-process without a websocket server.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_round_trip() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///     net.add_peer("alice").await?;
///     net.add_peer("bob").await?;
///
///     let alice = net.peer("alice").unwrap();
///     alice.upload("notes.txt", b"hello".to_vec())?;
///     // ... wait for bob to hold the part, then
///     let data = alice.fetch_file("notes.txt", Duration::from_secs(5)).await?;
///
///     net.shutdown().await?;
///     Ok(())
/// }
/// ```
mod network;
mod peer;

pub use network::TestNetwork;
pub use peer::{ClientEvent, HolderMode, TestPeer};
