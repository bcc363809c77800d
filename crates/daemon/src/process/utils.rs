use std::time::Duration;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Delay between SIGTERM and stopping the server, for retrievals in flight
const SIGTERM_DRAIN: Duration = Duration::from_secs(10);

pub type ShutdownParts = (JoinHandle<()>, watch::Sender<()>, watch::Receiver<()>);

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Interrupt,
    Terminate,
    Requested,
}

/// Watch channel that fires on SIGINT, on SIGTERM after a drain delay, or
///  when the returned sender is used.
///
/// If the signal handlers cannot be installed only the sender stops the
///  service.
pub fn shutdown_listener() -> ShutdownParts {
    let signals = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(interrupt), Ok(terminate)) => Some((interrupt, terminate)),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!("signal handlers unavailable, shutdown is manual only: {}", e);
            None
        }
    };

    let (tx, rx) = watch::channel(());
    let notify = tx.clone();
    let mut requested = rx.clone();

    let handle = tokio::spawn(async move {
        let trigger = wait_for_trigger(signals, &mut requested).await;
        if let Trigger::Terminate = trigger {
            tokio::time::sleep(SIGTERM_DRAIN).await;
        }
        tracing::debug!(?trigger, "stopping nfinite daemon");
        let _ = notify.send(());
    });

    (handle, tx, rx)
}

async fn wait_for_trigger(
    signals: Option<(Signal, Signal)>,
    requested: &mut watch::Receiver<()>,
) -> Trigger {
    let Some((mut interrupt, mut terminate)) = signals else {
        let _ = requested.changed().await;
        return Trigger::Requested;
    };

    tokio::select! {
        _ = interrupt.recv() => Trigger::Interrupt,
        _ = terminate.recv() => Trigger::Terminate,
        _ = requested.changed() => Trigger::Requested,
    }
}

/// Route panics through tracing so they land in the log files too
pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| {
        let location = panic.location();
        tracing::error!(
            message = %panic,
            panic.file = location.map(|l| l.file()),
            panic.line = location.map(|l| l.line()),
        );
    }));
}

pub fn report_build_info() {
    let build = common::prelude::build_info();
    tracing::info!(
        version = ?build.version,
        build_profile = ?build.build_profile,
        features = ?build.build_features,
        "nfinite daemon starting up"
    );
}
