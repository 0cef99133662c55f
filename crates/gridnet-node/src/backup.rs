//! Task-backup helper.
//!
//! Periodically re-pushes active task payloads to their designated backup
//! validators (falling back to every other global validator) so a failover
//! target already holds the task when it takes over. Nothing here is
//! durable; the copies live in the receivers' memory only.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use gridnet_core::{PeerId, Task};
use gridnet_protocol::messages::{now_ts, Message, TaskBackupMessage};

use crate::engine::TaskEngine;
use crate::registry::PeerRegistry;

/// Periodic re-push of task payloads to backup validators
pub struct TaskBackupService {
    registry: Arc<PeerRegistry>,
    engine: Arc<TaskEngine>,
    interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl TaskBackupService {
    pub fn new(registry: Arc<PeerRegistry>, engine: Arc<TaskEngine>, interval: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            registry,
            engine,
            interval,
            shutdown_tx,
        })
    }

    pub fn start(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.backup_once();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// One backup sweep over the active task table.
    pub fn backup_once(&self) {
        let mut pushed = 0usize;
        for task in self.engine.active_tasks() {
            let targets = self.targets_for(&task);
            if targets.is_empty() {
                continue;
            }
            let message = Message::TaskBackup(TaskBackupMessage {
                task: task.clone(),
                timestamp: now_ts(),
            });
            for target in targets {
                match self.registry.send_to(&target, message.clone()) {
                    Ok(()) => pushed += 1,
                    Err(e) => {
                        debug!(task_id = %task.id, target = %target, error = %e, "Backup delivery failed")
                    }
                }
            }
        }
        if pushed > 0 {
            debug!(pushed, "Task backups pushed");
        }
    }

    /// Designated backups when the task has them, otherwise every other
    /// global validator besides the one responsible for the task.
    fn targets_for(&self, task: &Task) -> Vec<PeerId> {
        if !task.backup_validators.is_empty() {
            return task.backup_validators.clone();
        }
        let responsible = task
            .global_validator
            .clone()
            .unwrap_or_else(|| task.submitter.clone());
        self.engine
            .global_validators()
            .into_iter()
            .filter(|id| id != &responsible)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use gridnet_core::{NodeTier, NodeType, PeerInfo, TaskType};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_backup_pushes_to_other_globals() {
        let registry = Arc::new(PeerRegistry::new());
        let engine = TaskEngine::new(Arc::clone(&registry), EngineConfig::default());

        let submitter =
            PeerInfo::new("global-a", NodeType::GlobalNode, NodeTier::Feedback, "global")
                .with_token_balance(10_000.0);
        registry.register(submitter.clone(), None);
        engine.register_peer(&submitter);

        let standby =
            PeerInfo::new("global-b", NodeType::GlobalNode, NodeTier::Feedback, "global")
                .with_token_balance(10_000.0);
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(standby.clone(), Some(tx));
        engine.register_peer(&standby);

        let task = Task::new(TaskType::Train, 200.0, "global-a");
        engine.broadcast_task(task).unwrap();

        let service =
            TaskBackupService::new(Arc::clone(&registry), Arc::clone(&engine), Duration::from_secs(45));
        service.backup_once();

        match rx.try_recv() {
            Ok(Message::TaskBackup(backup)) => {
                assert_eq!(backup.task.submitter, PeerId::from("global-a"));
            }
            other => panic!("expected task backup, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_designated_backups_take_precedence() {
        let registry = Arc::new(PeerRegistry::new());
        let engine = TaskEngine::new(Arc::clone(&registry), EngineConfig::default());

        for id in ["global-a", "global-b", "global-c"] {
            let info = PeerInfo::new(id, NodeType::GlobalNode, NodeTier::Feedback, "global")
                .with_token_balance(10_000.0);
            registry.register(info.clone(), None);
            engine.register_peer(&info);
        }

        let mut task = Task::new(TaskType::Train, 200.0, "global-a");
        task.backup_validators = vec![PeerId::from("global-c")];
        let service = TaskBackupService::new(Arc::clone(&registry), Arc::clone(&engine), Duration::from_secs(45));

        assert_eq!(service.targets_for(&task), vec![PeerId::from("global-c")]);

        task.backup_validators.clear();
        let mut fallback = service.targets_for(&task);
        fallback.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(
            fallback,
            vec![PeerId::from("global-b"), PeerId::from("global-c")]
        );
    }
}
