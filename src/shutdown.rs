//! Signal driven shutdown.
//!
//! The first SIGINT, SIGTERM or SIGHUP asks the server loop to stop. A second
//! one, delivered before the loop got around to stopping, aborts the process.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Requests shutdown. Returns `true` if it had been requested before.
    pub fn request(&self) -> bool {
        self.tx.send_replace(true)
    }
}

#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested. Never resolves if the trigger is
    /// gone without having fired.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn channel() -> (ShutdownTrigger, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownToken { rx })
}

/// Installs the signal handlers and returns the task listening on them.
#[cfg(unix)]
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
                _ = sighup.recv() => "SIGHUP",
            };
            on_signal(&trigger, name);
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            on_signal(&trigger, "ctrl-c");
        }
    }))
}

fn on_signal(trigger: &ShutdownTrigger, name: &str) {
    if trigger.request() {
        error!("got {} while already shutting down, aborting", name);
        std::process::abort();
    }
    info!("got {}, shutting down", name);
}
