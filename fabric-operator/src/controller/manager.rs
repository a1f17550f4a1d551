//! Runs every controller: watch dispatch, per-kind queues and workers.

use fabric_api::labels::LabelSelector;
use fabric_api::ObjectKey;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::context::Context;
use super::shell::{Action, Runnable};
use super::trigger::{self, Trigger};
use super::workqueue::WorkQueue;
use crate::store::{WatchEvent, WatchEventType};

struct Registered {
    controller: Arc<dyn Runnable>,
    queue: Arc<WorkQueue>,
}

pub struct Manager {
    ctx: Context,
    controllers: HashMap<&'static str, Registered>,
    triggers: Vec<Trigger>,
}

/// Handle over a running manager.
pub struct ManagerHandle {
    queues: Vec<Arc<WorkQueue>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ManagerHandle {
    /// Stop the workers and the dispatcher.
    pub async fn shutdown(self) {
        for q in &self.queues {
            q.shutdown().await;
        }
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Whether a modification touched nothing but bookkeeping fields.
fn is_heartbeat_only(event: &WatchEvent) -> bool {
    let Some(old) = &event.old else {
        return false;
    };
    let strip = |v: &Value| {
        let mut v = v.clone();
        if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
        }
        if let Some(status) = v.get_mut("status").and_then(Value::as_object_mut) {
            status.remove("lastHeartbeatTime");
        }
        v
    };
    strip(old) == strip(&event.object)
}

impl Manager {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            controllers: HashMap::new(),
            triggers: trigger::registry(),
        }
    }

    pub fn register(mut self, controller: Arc<dyn Runnable>) -> Self {
        self.controllers.insert(
            controller.kind(),
            Registered {
                controller,
                queue: WorkQueue::new(),
            },
        );
        self
    }

    /// Queue of `kind`, when a controller is registered for it.
    pub fn queue(&self, kind: &str) -> Option<Arc<WorkQueue>> {
        self.controllers.get(kind).map(|r| Arc::clone(&r.queue))
    }

    async fn dispatch(&self, event: &WatchEvent) {
        if event.event_type == WatchEventType::Modified && is_heartbeat_only(event) {
            return;
        }

        if let Some(registered) = self.controllers.get(event.kind.as_str()) {
            match registered.controller.observe(event).await {
                Ok(Some(key)) => registered.queue.add(key).await,
                Ok(None) => {}
                Err(e) => warn!(kind = %event.kind, key = %event.key(), error = %e, "predicate failed"),
            }
        }

        for t in self.triggers.iter().filter(|t| t.source == event.kind) {
            let Some(target) = self.controllers.get(t.target) else {
                continue;
            };
            for key in (t.project)(event) {
                debug!(source = %event.kind, target = %key, "trigger");
                target.queue.add(key).await;
            }
        }
    }

    /// List every registered kind and feed the objects through the add path.
    async fn resync(&self) {
        for (kind, registered) in &self.controllers {
            let objects = match self.ctx.store.list(kind, None, &LabelSelector::everything()).await {
                Ok(objects) => objects,
                Err(e) => {
                    error!(kind = %kind, error = %e, "initial list failed");
                    continue;
                }
            };
            for object in objects {
                let event = WatchEvent {
                    event_type: WatchEventType::Added,
                    kind: kind.to_string(),
                    old: None,
                    object,
                };
                match registered.controller.observe(&event).await {
                    Ok(Some(key)) => registered.queue.add(key).await,
                    Ok(None) => {}
                    Err(e) => warn!(kind = %kind, error = %e, "predicate failed during resync"),
                }
            }
        }
    }

    fn spawn_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        for registered in self.controllers.values() {
            for _ in 0..count {
                let controller = Arc::clone(&registered.controller);
                let queue = Arc::clone(&registered.queue);
                tasks.push(tokio::spawn(worker(controller, queue)));
            }
        }
        tasks
    }

    /// Start dispatching and reconciling in background tasks.
    pub async fn start(self) -> ManagerHandle {
        let mut events = self.ctx.store.watch();
        let workers = self.ctx.config.workers_per_kind.max(1);
        info!(kinds = self.controllers.len(), workers, "starting controllers");

        let queues: Vec<Arc<WorkQueue>> = self.controllers.values().map(|r| Arc::clone(&r.queue)).collect();
        let mut tasks = self.spawn_workers(workers);
        self.resync().await;

        let manager = Arc::new(self);
        tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => manager.dispatch(&event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "watch stream lagged, resyncing");
                        manager.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        info!("watch stream closed");
                        break;
                    }
                }
            }
        }));

        ManagerHandle { queues, tasks }
    }
}

async fn worker(controller: Arc<dyn Runnable>, queue: Arc<WorkQueue>) {
    while let Some(key) = queue.get().await {
        process(&*controller, &queue, &key).await;
        queue.done(&key).await;
    }
    debug!(kind = controller.kind(), "worker stopped");
}

async fn process(controller: &dyn Runnable, queue: &Arc<WorkQueue>, key: &ObjectKey) {
    match controller.run(key).await {
        Ok(Action::Done) => queue.forget(key).await,
        Ok(Action::Requeue) => {
            queue.forget(key).await;
            queue.add(key.clone()).await;
        }
        Ok(Action::RequeueAfter(delay)) => {
            queue.forget(key).await;
            queue.add_after(key.clone(), delay);
        }
        Err(e) => {
            debug!(key = %key, error = %e, "backing off");
            queue.add_rate_limited(key.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_only_detection() {
        let old = json!({"metadata": {"name": "f", "resourceVersion": "1"}, "spec": {"a": 1}, "status": {"type": "Pending", "lastHeartbeatTime": "t1"}});
        let mut new = old.clone();
        new["metadata"]["resourceVersion"] = json!("2");
        new["status"]["lastHeartbeatTime"] = json!("t2");
        let event = WatchEvent {
            event_type: WatchEventType::Modified,
            kind: "Federation".into(),
            old: Some(old),
            object: new.clone(),
        };
        assert!(is_heartbeat_only(&event));

        let mut changed = new;
        changed["status"]["type"] = json!("Activated");
        let event = WatchEvent { object: changed, ..event };
        assert!(!is_heartbeat_only(&event));
    }
}
