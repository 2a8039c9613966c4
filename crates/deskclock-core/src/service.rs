//! Long-running driver for the state manager.
//!
//! [`AlarmService::spawn`] runs the correction sweep once, then multiplexes
//! three sources on one task: commands sent through a [`ServiceHandle`], a
//! polling interval that applies due wake-ups, and a shutdown signal. The
//! manager itself is synchronous, so each call runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::alarm::AlarmStateManager;
use crate::command::{Command, CommandOutput};
use crate::error::{CoreError, Result};

const COMMAND_BUFFER: usize = 32;

struct Request {
    command: Command,
    reply: oneshot::Sender<Result<CommandOutput>>,
}

pub struct AlarmService {
    manager: Arc<AlarmStateManager>,
    poll_interval: Duration,
}

impl AlarmService {
    pub fn new(manager: Arc<AlarmStateManager>) -> Self {
        Self {
            manager,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start the service on the current tokio runtime.
    pub fn spawn(self) -> ServiceHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(command_rx, shutdown_rx));
        ServiceHandle {
            commands: command_tx,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<Request>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        match blocking(&self.manager, |manager| manager.fix_all_instances()).await {
            Ok(summary) => tracing::info!(?summary, "alarm service started"),
            // Persisted wake-ups still drive the loop; the next sweep retries.
            Err(err) => tracing::error!(error = %err, "startup correction sweep failed"),
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match blocking(&self.manager, |manager| manager.run_due()).await {
                        Ok(applied) => {
                            for (transition, outcome) in applied {
                                tracing::debug!(?transition, ?outcome, "applied wake-up");
                            }
                        }
                        Err(err) => tracing::error!(error = %err, "failed to apply due wake-ups"),
                    }
                }
                request = commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        break;
                    };
                    let result = blocking(&self.manager, move |manager| manager.execute(command)).await;
                    if reply.send(result).is_err() {
                        tracing::debug!("command caller went away before the reply");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("alarm service stopped");
        Ok(())
    }
}

async fn blocking<T, F>(manager: &Arc<AlarmStateManager>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&AlarmStateManager) -> Result<T> + Send + 'static,
{
    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || f(&manager))
        .await
        .map_err(|e| CoreError::Custom(format!("alarm service task failed: {e}")))?
}

/// Client side of a running [`AlarmService`].
pub struct ServiceHandle {
    commands: mpsc::Sender<Request>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ServiceHandle {
    pub async fn send(&self, command: Command) -> Result<CommandOutput> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| CoreError::Custom("alarm service is not running".into()))?;
        response
            .await
            .map_err(|_| CoreError::Custom("alarm service dropped the command".into()))?
    }

    /// Signal shutdown and wait for the loop to finish.
    pub async fn shutdown(self) -> Result<()> {
        // The receiver is gone if the loop already exited.
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| CoreError::Custom(format!("alarm service task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{Alarm, InstanceState, Outcome};
    use crate::clock::ManualClock;
    use crate::gateway::RecordingGateway;
    use crate::scheduler::MemoryScheduler;
    use crate::storage::{AlarmStore, InstanceFilter, MemoryStore};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn manager(clock: Arc<ManualClock>, store: Arc<MemoryStore>) -> Arc<AlarmStateManager> {
        Arc::new(AlarmStateManager::new(
            store,
            Arc::new(MemoryScheduler::new()),
            Arc::new(RecordingGateway::new()),
            clock,
        ))
    }

    #[tokio::test]
    async fn commands_round_trip_through_the_loop() {
        let clock = Arc::new(ManualClock::new(at(6, 0)));
        let store = Arc::new(MemoryStore::new());
        let manager = manager(clock, store.clone());
        manager.create_alarm(Alarm::new(7, 0).unwrap()).unwrap();
        let instance = store.instances(InstanceFilter::All).unwrap().remove(0);

        let handle = AlarmService::new(manager)
            .with_poll_interval(Duration::from_millis(10))
            .spawn();
        let output = handle
            .send(Command::Predismiss {
                instance_id: instance.id,
            })
            .await
            .unwrap();
        assert_eq!(
            output,
            CommandOutput::Instance(Outcome::Applied {
                state: InstanceState::Predismissed
            })
        );
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn polling_applies_due_wake_ups() {
        let clock = Arc::new(ManualClock::new(at(6, 0)));
        let store = Arc::new(MemoryStore::new());
        let manager = manager(clock.clone(), store.clone());
        manager.create_alarm(Alarm::new(7, 0).unwrap()).unwrap();

        let handle = AlarmService::new(manager)
            .with_poll_interval(Duration::from_millis(5))
            .spawn();
        clock.set(at(7, 0));

        let mut fired = false;
        for _ in 0..200 {
            let instances = store.instances(InstanceFilter::All).unwrap();
            if instances.iter().any(|i| i.state == InstanceState::Fired) {
                fired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fired, "instance never fired");
        handle.shutdown().await.unwrap();
    }
}
