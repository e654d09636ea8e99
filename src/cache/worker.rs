//! Cancellable background tasks.
//!
//! A [`BackgroundWorker`] owns at most one running tokio task. The task is
//! handed the receiving half of a `oneshot` channel; stopping drops the
//! sender, which closes the channel, and then awaits the task's join handle.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::error::CacheError;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::worker";

/// Resolves once the owning worker has been asked to stop.
pub(crate) type StopSignal = oneshot::Receiver<()>;

struct Running {
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

pub(crate) struct BackgroundWorker {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl BackgroundWorker {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        mutex_lock(&self.running, SOURCE, "is_running")
            .as_ref()
            .is_some_and(|running| !running.join.is_finished())
    }

    /// Spawn `task` on the current tokio runtime.
    pub(crate) fn spawn<F, Fut>(&self, task: F) -> Result<(), CacheError>
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = mutex_lock(&self.running, SOURCE, "spawn");
        if running.is_some() {
            return Err(CacheError::already_started(self.name));
        }
        let (stop, signal) = oneshot::channel();
        let join = tokio::spawn(task(signal));
        *running = Some(Running { stop, join });
        debug!(worker = self.name, "background worker spawned");
        Ok(())
    }

    /// Spawn a task running `tick` every `period` until stopped.
    ///
    /// The first tick fires one full period after spawning.
    pub(crate) fn spawn_periodic<T>(&self, period: Duration, mut tick: T) -> Result<(), CacheError>
    where
        T: FnMut() + Send + 'static,
    {
        self.spawn(move |mut stop| async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = interval.tick() => tick(),
                }
            }
        })
    }

    /// Signal the task to stop and wait for it to exit.
    pub(crate) async fn shutdown(&self) {
        let running = mutex_lock(&self.running, SOURCE, "shutdown").take();
        let Some(Running { stop, join }) = running else {
            return;
        };
        drop(stop);
        if let Err(error) = join.await {
            warn!(worker = self.name, error = %error, "background worker ended abnormally");
            return;
        }
        debug!(worker = self.name, "background worker exited");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn periodic_task_ticks_until_shutdown() {
        let worker = BackgroundWorker::new("ticker");
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        worker
            .spawn_periodic(Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .expect("spawn");
        assert!(worker.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        worker.shutdown().await;
        assert!(!worker.is_running());

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected several ticks, got {after_stop}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn second_spawn_is_rejected() {
        let worker = BackgroundWorker::new("single");
        worker
            .spawn_periodic(Duration::from_secs(60), || {})
            .expect("first spawn");
        let error = worker
            .spawn_periodic(Duration::from_secs(60), || {})
            .expect_err("second spawn");
        assert!(matches!(error, CacheError::AlreadyStarted { worker: "single" }));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_waits_for_task_exit_and_is_idempotent() {
        let worker = BackgroundWorker::new("waiter");
        let exited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exited);

        worker
            .spawn(move |stop| async move {
                let _ = stop.await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            })
            .expect("spawn");

        worker.shutdown().await;
        assert!(exited.load(Ordering::SeqCst));
        worker.shutdown().await;
    }
}
