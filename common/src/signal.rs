use sd_notify::NotifyState;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

/// Wake every waiter on `notifier` at the first SIGINT, SIGTERM or SIGQUIT.
pub fn run(notifier: Arc<Notify>) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("signal handler: {}", e);
            return;
        }

        if let Err(e) = sd_notify::notify(true, &[NotifyState::Stopping]) {
            error!("notify stopping: {}", e);
        }
        notifier.notify_waiters();
    });
}

/// Tell the service manager the process is ready. A no-op outside systemd.
pub fn ready() {
    if let Err(e) = sd_notify::notify(false, &[NotifyState::Ready]) {
        error!("notify ready: {}", e);
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = interrupt.recv() => info!("received interrupt signal"),
        _ = terminate.recv() => info!("received terminate signal"),
        _ = quit.recv() => info!("received quit signal"),
    }
    Ok(())
}
