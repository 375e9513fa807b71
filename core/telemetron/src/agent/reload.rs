//! Process-level change and shutdown sources.

use tokio::{sync::broadcast, task::JoinHandle};

use crate::context::Context;

/// Broadcasts "reload" requests to the loaders that watch it.
///
/// Each call to [`watch`](crate::plugin::Loader::watch) subscribes to the notifier *before*
/// returning. A notification reaches every subscription that exists at that time.
#[derive(Debug, Clone)]
pub struct ReloadNotifier {
    tx: broadcast::Sender<()>,
}

/// A subscription to a [`ReloadNotifier`].
#[derive(Debug)]
pub struct ReloadSubscription {
    rx: broadcast::Receiver<()>,
}

impl Default for ReloadNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    pub fn subscribe(&self) -> ReloadSubscription {
        ReloadSubscription { rx: self.tx.subscribe() }
    }

    /// Notifies the current subscribers, and returns how many there are.
    pub fn notify(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }
}

impl ReloadSubscription {
    /// Waits for the next notification.
    ///
    /// Returns `false` if no notification can ever arrive, because every notifier has been dropped.
    pub async fn changed(&mut self) -> bool {
        match self.rx.recv().await {
            // missed notifications still mean that something changed
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    /// Waits for the next notification or for the end of `ctx`, whichever comes first.
    ///
    /// Returns `true` on notification.
    pub async fn changed_or_done(&mut self, ctx: &Context) -> bool {
        tokio::select! {
            changed = self.changed() => {
                if changed {
                    true
                } else {
                    ctx.done().await;
                    false
                }
            }
            _ = ctx.done() => false,
        }
    }
}

/// Cancels `ctx` when Ctrl+C is pressed (or SIGINT is received).
///
/// The listener stops when `ctx` ends for another reason.
pub fn shutdown_on_ctrl_c(ctx: Context) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                match res {
                    Ok(()) => log::info!("Termination signal received, shutting down..."),
                    Err(e) => log::error!("failed to listen for Ctrl+C: {e}"),
                }
                ctx.cancel();
            }
            _ = ctx.done() => (),
        }
    })
}

/// Forwards each SIGHUP to `notifier`, until `ctx` ends.
#[cfg(unix)]
pub fn forward_hangup(notifier: ReloadNotifier, ctx: Context) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    let n = notifier.notify();
                    log::info!("SIGHUP received, reloading the configuration ({n} watch(es) notified)");
                }
                _ = ctx.done() => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ReloadNotifier;
    use crate::context::Context;

    #[tokio::test]
    async fn notify_subscribers() {
        let notifier = ReloadNotifier::new();
        assert_eq!(notifier.notify(), 0);

        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert_eq!(notifier.notify(), 2);
        assert!(a.changed().await);
        assert!(b.changed().await);
    }

    #[tokio::test]
    async fn notifications_before_subscribing_are_not_seen() {
        let notifier = ReloadNotifier::new();
        notifier.notify();
        let mut sub = notifier.subscribe();
        let ctx = Context::new().with_timeout(Duration::from_millis(20));
        assert!(!sub.changed_or_done(&ctx).await);
    }

    #[tokio::test]
    async fn closed_notifier_waits_for_context() {
        let notifier = ReloadNotifier::new();
        let mut sub = notifier.subscribe();
        drop(notifier);

        let ctx = Context::new();
        ctx.cancel();
        assert!(!sub.changed_or_done(&ctx).await);
    }
}
