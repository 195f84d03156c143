//! Periodic keep-alive and occupancy reporting.
//!
//! Both actions run on their own task with fixed-delay scheduling: the
//! next tick is scheduled only after the previous one finished.

use crate::hub::ChatHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Called with the live subscriber count on every occupancy report.
pub type OccupancyObserver = Arc<dyn Fn(usize) + Send + Sync>;

/// Liveness configuration.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// Delay between keep-alive pings.
    pub keepalive_interval: Duration,
    /// Delay between occupancy reports.
    pub report_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            report_interval: Duration::from_secs(5),
        }
    }
}

/// Running keep-alive and occupancy tasks.
///
/// Dropping the loop without calling [`LivenessLoop::stop`] also stops the
/// tasks, but does not wait for them.
pub struct LivenessLoop {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl LivenessLoop {
    /// Start both periodic tasks on the current runtime.
    #[must_use]
    pub fn start(hub: Arc<ChatHub>, config: LivenessConfig) -> Self {
        Self::start_with_observer(hub, config, None)
    }

    /// Start both periodic tasks, reporting occupancy to `observer` as well
    /// as the log.
    #[must_use]
    pub fn start_with_observer(
        hub: Arc<ChatHub>,
        config: LivenessConfig,
        observer: Option<OccupancyObserver>,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);

        let keepalive_hub = Arc::clone(&hub);
        let keepalive = spawn_periodic(
            "keepalive",
            config.keepalive_interval,
            shutdown_rx.clone(),
            move || {
                let report = keepalive_hub.ping();
                trace!(recipients = report.delivered, "Keep-alive sent");
            },
        );

        let occupancy = spawn_periodic("occupancy", config.report_interval, shutdown_rx, move || {
            let count = hub.subscriber_count();
            info!(subscribers = count, "Active subscribers");
            if let Some(observer) = &observer {
                observer(count);
            }
        });

        debug!(
            keepalive_ms = config.keepalive_interval.as_millis() as u64,
            report_ms = config.report_interval.as_millis() as u64,
            "Liveness loop started"
        );

        Self {
            shutdown,
            tasks: vec![keepalive, occupancy],
        }
    }

    /// Check if any task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Signal both tasks to stop and wait for them to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Liveness task ended abnormally");
            }
        }

        debug!("Liveness loop stopped");
    }
}

/// Run `tick` every `interval` until `shutdown` flips to `true` or its
/// sender is dropped.
fn spawn_periodic<F>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(task = name, "Periodic task stopped");
    })
}
