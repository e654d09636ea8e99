//! Backend interface and lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::error::CacheError;
use super::keys::CacheKey;
use super::representation::CachedRepresentation;

/// Pluggable representation storage.
///
/// `load_representation` must return promptly and never hand out an expired
/// entry. Stores and deletes are fire-and-forget: a backend may apply them
/// synchronously or queue them, and documents which one it does.
pub trait CacheBackend: Send + Sync {
    fn load_representation(&self, key: &CacheKey) -> Option<Arc<CachedRepresentation>>;

    fn store_representation(&self, key: CacheKey, representation: Arc<CachedRepresentation>);

    fn delete_representation(&self, key: &CacheKey);

    fn delete_group(&self, group: &str);

    /// Background workers this backend needs started before use.
    fn startables(&self) -> Vec<Arc<dyn Startable>> {
        Vec::new()
    }
}

/// A background worker with an explicit start/stop lifecycle.
///
/// `stop` returns only after the worker has exited and is a no-op when the
/// worker is not running.
#[async_trait]
pub trait Startable: Send + Sync {
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<(), CacheError>;

    async fn stop(&self);
}

/// Starts and stops a set of workers as one unit.
pub struct Lifecycle {
    startables: Vec<Arc<dyn Startable>>,
}

impl Lifecycle {
    pub fn new(startables: Vec<Arc<dyn Startable>>) -> Self {
        Self { startables }
    }

    pub fn for_backend(backend: &dyn CacheBackend) -> Self {
        Self::new(backend.startables())
    }

    pub fn len(&self) -> usize {
        self.startables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.startables.is_empty()
    }

    /// Start every worker in order. On failure the ones already started are
    /// stopped again before the error is returned.
    pub async fn start(&self) -> Result<(), CacheError> {
        for (index, startable) in self.startables.iter().enumerate() {
            if let Err(error) = startable.start().await {
                warn!(worker = startable.name(), error = %error, "cache worker failed to start");
                for started in self.startables[..index].iter().rev() {
                    started.stop().await;
                }
                return Err(error);
            }
            info!(worker = startable.name(), "cache worker started");
        }
        Ok(())
    }

    /// Stop every worker in reverse start order.
    pub async fn stop(&self) {
        for startable in self.startables.iter().rev() {
            startable.stop().await;
            info!(worker = startable.name(), "cache worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct Recorder {
        name: &'static str,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Startable for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self) -> Result<(), CacheError> {
            if self.fail {
                return Err(CacheError::already_started(self.name));
            }
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self) {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
        }
    }

    fn recorder(name: &'static str, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Startable> {
        Arc::new(Recorder {
            name,
            fail,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn starts_in_order_and_stops_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new(vec![recorder("a", false, &log), recorder("b", false, &log)]);

        lifecycle.start().await.expect("start");
        lifecycle.stop().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_workers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let lifecycle = Lifecycle::new(vec![
            recorder("a", false, &log),
            recorder("b", false, &log),
            recorder("c", true, &log),
        ]);

        let error = lifecycle.start().await.expect_err("c fails");
        assert!(matches!(error, CacheError::AlreadyStarted { worker: "c" }));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "start b", "stop b", "stop a"]
        );
    }
}
