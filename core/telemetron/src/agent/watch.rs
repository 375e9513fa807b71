//! Watch orchestration: one task per watched loader, and the first one that completes
//! ends the generation.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    context::{Context, Done},
    pipeline::RunningLoader,
};

/// State of a [`Watcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// No watch has been established yet.
    Idle,
    /// At least one watch is running, none has completed.
    Watching,
    /// A watch has completed, and [`Watcher::wait`] has not collected it yet.
    Triggered,
    /// The remaining watches are being canceled. Only visible if `wait` or `shutdown`
    /// is dropped before every task has exited.
    Draining,
    /// Every watch task has exited.
    Done,
}

/// Why a generation ended.
#[derive(Debug, Clone)]
pub enum WatchCause {
    /// A loader detected a change in its configuration source.
    Changed,
    /// The context of the watch has been canceled.
    Canceled,
    /// The deadline of the watch has expired.
    DeadlineExceeded,
    /// The watch failed.
    Failed(Arc<anyhow::Error>),
}

impl From<Done> for WatchCause {
    fn from(done: Done) -> Self {
        match done {
            Done::Canceled => WatchCause::Canceled,
            Done::DeadlineExceeded => WatchCause::DeadlineExceeded,
        }
    }
}

/// The watch that ended a generation, and why.
#[derive(Debug, Clone)]
pub struct WatchOutcome {
    /// The loader whose watch completed first, or `None` if there was no watch at all.
    pub loader: Option<String>,
    pub cause: WatchCause,
}

/// One-shot latch: only the first outcome is kept.
#[derive(Default)]
struct Latch {
    outcome: Mutex<Option<WatchOutcome>>,
    fired: CancellationToken,
    attempts: AtomicUsize,
}

impl Latch {
    /// Records `outcome` if the latch has not fired yet. Returns `true` if it has been recorded.
    fn fire(&self, outcome: WatchOutcome) -> bool {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.outcome.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.fired.cancel();
        true
    }

    fn outcome(&self) -> Option<WatchOutcome> {
        self.outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Watches every loader of a generation, and reports the first watch that completes.
///
/// Each [`watch_loader`](Self::watch_loader) spawns one task that waits on the loader's
/// [`Waiter`](crate::plugin::Waiter). The first task to complete wins; [`wait`](Self::wait)
/// then cancels the other tasks and waits for all of them to exit.
pub struct Watcher {
    parent: Context,
    tasks: JoinSet<()>,
    contexts: Vec<Context>,
    latch: Arc<Latch>,
    state: WatchState,
    outcome: Option<WatchOutcome>,
}

impl Watcher {
    /// Creates a watcher for a generation.
    ///
    /// If no loader is ever watched, [`wait`](Self::wait) returns when `parent` ends.
    pub fn new(parent: &Context) -> Self {
        Self {
            parent: parent.clone(),
            tasks: JoinSet::new(),
            contexts: Vec::new(),
            latch: Arc::new(Latch::default()),
            state: WatchState::Idle,
            outcome: None,
        }
    }

    pub fn state(&self) -> WatchState {
        match self.state {
            WatchState::Watching if self.latch.fired.is_cancelled() => WatchState::Triggered,
            state => state,
        }
    }

    /// Number of watches established so far.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Number of watch tasks that have not exited yet.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Number of watch completions, including the ones that came after the first.
    pub fn completions(&self) -> usize {
        self.latch.attempts.load(Ordering::Relaxed)
    }

    /// Establishes the watch of a loader, under a child of `ctx`, and monitors it in a new task.
    pub async fn watch_loader(&mut self, ctx: &Context, loader: &RunningLoader) -> anyhow::Result<()> {
        let task_ctx = ctx.child();
        let waiter = match loader.loader.watch(&task_ctx).await {
            Ok(waiter) => waiter,
            Err(e) => {
                task_ctx.cancel();
                return Err(e);
            }
        };

        let name = loader.describe();
        let latch = self.latch.clone();
        let observed = task_ctx.clone();
        self.tasks.spawn(async move {
            let result = waiter.wait().await;
            let cause = match (observed.err(), result) {
                (Some(done), _) => WatchCause::from(done),
                (None, Ok(())) => WatchCause::Changed,
                (None, Err(e)) => WatchCause::Failed(Arc::new(e)),
            };
            match &cause {
                WatchCause::Changed => log::info!("Configuration change detected by loader {name}."),
                WatchCause::Canceled => log::debug!("watch canceled: {name}"),
                WatchCause::DeadlineExceeded => log::debug!("watch deadline exceeded: {name}"),
                WatchCause::Failed(e) => log::error!("Watch of loader {name} failed: {e:#}"),
            }
            latch.fire(WatchOutcome {
                loader: Some(name),
                cause,
            });
        });
        self.contexts.push(task_ctx);
        self.state = WatchState::Watching;
        Ok(())
    }

    /// Waits for the first watch to complete, then cancels and joins every watch task.
    ///
    /// Calling `wait` again returns the same outcome immediately.
    pub async fn wait(&mut self) -> WatchOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }

        let outcome = if self.contexts.is_empty() {
            let done = self.parent.done().await;
            WatchOutcome {
                loader: None,
                cause: WatchCause::from(done),
            }
        } else {
            loop {
                tokio::select! {
                    _ = self.latch.fired.cancelled() => break,
                    res = self.tasks.join_next(), if !self.tasks.is_empty() => {
                        // a task that exits without firing has panicked
                        if let Some(Err(e)) = res {
                            self.latch.fire(WatchOutcome {
                                loader: None,
                                cause: WatchCause::Failed(Arc::new(anyhow::anyhow!("watch task failed: {e}"))),
                            });
                        }
                    }
                }
            }
            self.drain().await;
            self.latch.outcome().unwrap_or(WatchOutcome {
                loader: None,
                cause: WatchCause::Canceled,
            })
        };
        self.state = WatchState::Done;
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Cancels and joins every watch task, without waiting for a completion.
    pub async fn shutdown(&mut self) {
        self.drain().await;
    }

    async fn drain(&mut self) {
        self.state = WatchState::Draining;
        for ctx in &self.contexts {
            ctx.cancel();
        }
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                log::error!("watch task failed: {e}");
            }
        }
        self.state = WatchState::Done;
    }
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("state", &self.state)
            .field("watches", &self.contexts.len())
            .field("running", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{WatchCause, WatchState, Watcher};
    use crate::{
        config::LoaderDeclaration,
        context::Context,
        pipeline::RunningLoader,
        plugin::{PluginConfig, registry::Registry},
        test::{Harness, HarnessConfig},
    };

    fn harness_loader(registry: &Registry, id: &str) -> RunningLoader {
        let config = PluginConfig::new(HarnessConfig {
            id: id.to_owned(),
            origin: None,
        });
        RunningLoader::create("harness", LoaderDeclaration::new(config), registry).unwrap()
    }

    #[tokio::test]
    async fn first_change_wins() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new();

        let mut watcher = Watcher::new(&ctx);
        assert_eq!(watcher.state(), WatchState::Idle);
        for id in ["a", "b", "c"] {
            watcher.watch_loader(&ctx, &harness_loader(&registry, id)).await.unwrap();
        }
        assert_eq!(watcher.state(), WatchState::Watching);
        assert_eq!(watcher.len(), 3);

        assert_eq!(harness.trigger("b"), 1);
        let outcome = watcher.wait().await;
        assert!(matches!(outcome.cause, WatchCause::Changed));
        assert_eq!(outcome.loader.as_deref(), Some("harness"));
        assert_eq!(watcher.state(), WatchState::Done);
        assert_eq!(watcher.running(), 0);
        // the other tasks observed their cancellation
        assert_eq!(watcher.completions(), 3);
        assert!(!ctx.is_done());

        // waiting again does not block
        let again = watcher.wait().await;
        assert!(matches!(again.cause, WatchCause::Changed));
    }

    #[tokio::test]
    async fn triggered_until_collected() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new();

        let mut watcher = Watcher::new(&ctx);
        watcher.watch_loader(&ctx, &harness_loader(&registry, "a")).await.unwrap();
        watcher.watch_loader(&ctx, &harness_loader(&registry, "b")).await.unwrap();
        harness.trigger("a");
        while watcher.completions() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(watcher.state(), WatchState::Triggered);
        assert_eq!(watcher.completions(), 1);

        let outcome = watcher.wait().await;
        assert!(matches!(outcome.cause, WatchCause::Changed));
        assert_eq!(watcher.state(), WatchState::Done);
    }

    #[tokio::test]
    async fn simultaneous_changes_trigger_once() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new();

        let mut watcher = Watcher::new(&ctx);
        for _ in 0..8 {
            watcher.watch_loader(&ctx, &harness_loader(&registry, "same")).await.unwrap();
        }
        assert_eq!(harness.trigger("same"), 8);

        let outcome = watcher.wait().await;
        assert!(matches!(outcome.cause, WatchCause::Changed));
        assert_eq!(watcher.running(), 0);
        assert_eq!(watcher.completions(), 8);
    }

    #[tokio::test]
    async fn failed_watch() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new();
        harness.fail_wait("a", "connection lost");

        let mut watcher = Watcher::new(&ctx);
        watcher.watch_loader(&ctx, &harness_loader(&registry, "a")).await.unwrap();
        watcher.watch_loader(&ctx, &harness_loader(&registry, "b")).await.unwrap();
        harness.trigger("a");

        let outcome = watcher.wait().await;
        match outcome.cause {
            WatchCause::Failed(e) => assert_eq!(e.to_string(), "connection lost"),
            other => panic!("unexpected cause {other:?}"),
        }
        assert_eq!(watcher.running(), 0);
    }

    #[tokio::test]
    async fn watch_error_is_returned() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new();
        harness.fail_watch("a", "no such file");

        let mut watcher = Watcher::new(&ctx);
        let err = watcher
            .watch_loader(&ctx, &harness_loader(&registry, "a"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no such file");
        assert!(watcher.is_empty());
        assert_eq!(watcher.state(), WatchState::Idle);
    }

    #[tokio::test]
    async fn parent_cancellation() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new();

        let mut watcher = Watcher::new(&ctx);
        watcher.watch_loader(&ctx, &harness_loader(&registry, "a")).await.unwrap();
        watcher.watch_loader(&ctx, &harness_loader(&registry, "b")).await.unwrap();
        ctx.cancel();

        let outcome = watcher.wait().await;
        assert!(matches!(outcome.cause, WatchCause::Canceled));
        assert_eq!(watcher.running(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_deadline() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new().with_timeout(Duration::from_secs(5));

        let mut watcher = Watcher::new(&ctx);
        watcher.watch_loader(&ctx, &harness_loader(&registry, "a")).await.unwrap();

        let outcome = watcher.wait().await;
        assert!(matches!(outcome.cause, WatchCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn empty_watcher_waits_for_parent() {
        let ctx = Context::new();
        let mut watcher = Watcher::new(&ctx);

        let child = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });
        let outcome = watcher.wait().await;
        assert!(outcome.loader.is_none());
        assert!(matches!(outcome.cause, WatchCause::Canceled));
        assert_eq!(watcher.state(), WatchState::Done);
    }

    #[tokio::test]
    async fn shutdown_without_trigger() {
        let harness = Harness::new();
        let registry = harness.registry();
        let ctx = Context::new();

        let mut watcher = Watcher::new(&ctx);
        watcher.watch_loader(&ctx, &harness_loader(&registry, "a")).await.unwrap();
        watcher.shutdown().await;
        assert_eq!(watcher.state(), WatchState::Done);
        assert_eq!(watcher.running(), 0);
        assert!(!ctx.is_done());
    }
}
