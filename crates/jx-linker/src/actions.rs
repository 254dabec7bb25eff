//! Keyed table of in-flight install actions with a bounded concurrency
//! budget.
//!
//! Each key holds one logical task at a time. `set` replaces the key's
//! current task; `reduce` chains a new task after it, handing over the
//! predecessor's terminal state. A stable deferred handle per key resolves
//! with the latest task's outcome; superseded tasks keep running but lose the
//! right to publish the key's terminal state.

use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};

use anyhow::{anyhow, Result};
use tokio::sync::{watch, Mutex, Semaphore};

/// Process-wide cap on concurrently running action factories.
pub(crate) const ACTION_BUDGET: usize = 10;

/// Terminal state of a keyed action, cheap to clone between observers.
#[derive(Clone, Debug)]
pub(crate) struct TaskError(Arc<anyhow::Error>);

impl TaskError {
    fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for TaskError {}

pub(crate) type TaskResult = std::result::Result<(), TaskError>;

type ResultSlot = watch::Receiver<Option<TaskResult>>;
type BoxedAction = Pin<Box<dyn Future<Output = TaskResult> + Send>>;

struct Slot {
    generation: u64,
    latest: ResultSlot,
    deferred_tx: watch::Sender<Option<TaskResult>>,
    deferred_rx: ResultSlot,
}

/// Handle resolving with the terminal state of the latest action registered
/// under a key.
pub(crate) struct Deferred {
    rx: ResultSlot,
}

impl Deferred {
    pub(crate) async fn settled(mut self) -> TaskResult {
        match self.rx.wait_for(|state| state.is_some()).await {
            Ok(state) => state.clone().unwrap_or(Ok(())),
            Err(_) => Err(TaskError::new(anyhow!(
                "action table dropped before the task settled"
            ))),
        }
    }
}

pub(crate) struct ActionTable {
    budget: Arc<Semaphore>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl ActionTable {
    pub(crate) fn new(budget: usize) -> Self {
        Self {
            budget: Arc::new(Semaphore::new(budget)),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the current action for `key`.
    pub(crate) async fn set<F>(&self, key: &str, action: F) -> Deferred
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let budget = Arc::clone(&self.budget);
        let task: BoxedAction = Box::pin(async move {
            let _permit = budget
                .acquire_owned()
                .await
                .map_err(|err| TaskError::new(anyhow!(err)))?;
            action.await.map_err(TaskError::new)
        });
        self.install(key, task).await
    }

    /// Chain a new action after the current one for `key`. The chained
    /// closure receives the predecessor's terminal state and may inspect or
    /// rethrow it.
    pub(crate) async fn reduce<F, Fut>(&self, key: &str, chain: F) -> Deferred
    where
        F: FnOnce(TaskResult) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let previous = {
            let slots = self.slots.lock().await;
            slots.get(key).map(|slot| slot.latest.clone())
        };
        let budget = Arc::clone(&self.budget);
        let task: BoxedAction = Box::pin(async move {
            let seed = match previous {
                Some(mut latest) => match latest.wait_for(|state| state.is_some()).await {
                    Ok(state) => state.clone().unwrap_or(Ok(())),
                    Err(_) => Ok(()),
                },
                None => Ok(()),
            };
            // The budget caps running factories; waiting on a predecessor
            // must not hold a permit.
            let _permit = budget
                .acquire_owned()
                .await
                .map_err(|err| TaskError::new(anyhow!(err)))?;
            chain(seed).await.map_err(TaskError::new)
        });
        self.install(key, task).await
    }

    async fn install(&self, key: &str, task: BoxedAction) -> Deferred {
        let (result_tx, result_rx) = watch::channel(None);
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(key.to_string()).or_insert_with(|| {
            let (deferred_tx, deferred_rx) = watch::channel(None);
            Slot {
                generation: 0,
                latest: result_rx.clone(),
                deferred_tx,
                deferred_rx,
            }
        });
        slot.generation += 1;
        slot.latest = result_rx;
        // Invalidate anything published by a previous generation, so deferreds
        // only ever observe the outcome of the task being installed.
        slot.deferred_tx.send_replace(None);
        let generation = slot.generation;
        let deferred = Deferred {
            rx: slot.deferred_rx.clone(),
        };
        drop(slots);

        let slots = Arc::clone(&self.slots);
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = task.await;
            let _ = result_tx.send(Some(outcome.clone()));
            let slots = slots.lock().await;
            if let Some(slot) = slots.get(&key) {
                if slot.generation == generation {
                    let _ = slot.deferred_tx.send(Some(outcome));
                }
            }
        });
        deferred
    }

    /// Wait for every currently-registered action to settle. The first
    /// failure is returned once all of them have.
    pub(crate) async fn wait(&self) -> Result<()> {
        let pending: Vec<(String, ResultSlot)> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .map(|(key, slot)| (key.clone(), slot.latest.clone()))
                .collect()
        };
        let mut first_failure = None;
        for (key, mut latest) in pending {
            let outcome = match latest.wait_for(|state| state.is_some()).await {
                Ok(state) => state.clone().unwrap_or(Ok(())),
                Err(_) => Ok(()),
            };
            if let Err(err) = outcome {
                tracing::warn!(key = %key, error = %err, "install action failed");
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
        match first_failure {
            Some(err) => Err(anyhow!(err)),
            None => Ok(()),
        }
    }
}
