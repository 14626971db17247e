use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs "wait N seconds, then revert" effects for command handlers.
///
/// Every effect is cancellable on its own through its [`EffectHandle`], and
/// [`EffectScheduler::shutdown`] cancels whatever is still pending.
pub struct EffectScheduler {
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

/// Cancels one scheduled effect.
#[derive(Debug, Clone)]
pub struct EffectHandle {
    name: String,
    token: CancellationToken,
}

impl EffectHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop the effect if it has not run yet.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for EffectScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectScheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Run `task` once `delay` has elapsed, unless cancelled first.
    pub async fn schedule<F>(&self, name: &str, delay: Duration, task: F) -> EffectHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.child_token();
        let handle = EffectHandle {
            name: name.to_string(),
            token: token.clone(),
        };

        let effect = name.to_string();
        let deadline = tokio::time::Instant::now() + delay;
        let mut tasks = self.tasks.lock().await;
        // Reap effects that already finished
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Effect '{}' cancelled", effect);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("Running effect '{}'", effect);
                    task.await;
                }
            }
        });

        debug!("Scheduled effect '{}' in {:?}", name, delay);
        handle
    }

    /// Effects that have not finished yet.
    pub async fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Cancel every pending effect and wait for their tasks to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        while tasks.join_next().await.is_some() {}
        info!("Effect scheduler stopped");
    }
}
