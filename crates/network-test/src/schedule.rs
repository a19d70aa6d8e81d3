//! Recurring schedules and stoppable background tasks.
//!
//! Each recurring activity owns its own [`TaskHandle`]; there is no shared
//! scheduler instance, so a single check type can be started, observed and
//! stopped in isolation.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ConfigError;

/// A six-field cron expression with second granularity
/// (`sec min hour day-of-month month day-of-week`).
#[derive(Debug, Clone)]
pub struct CheckSchedule {
    expr: String,
    schedule: Schedule,
}

impl CheckSchedule {
    /// Parse `expr`; `name` identifies the setting in errors.
    pub fn parse(name: &'static str, expr: &str) -> Result<Self, ConfigError> {
        let schedule = Schedule::from_str(expr).map_err(|e| ConfigError::InvalidCron {
            name,
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    #[must_use]
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// First firing strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Gap between the next two firings after `after`.
    ///
    /// Irregular schedules are approximated by the gap that follows `after`.
    #[must_use]
    pub fn interval_after(&self, after: DateTime<Utc>) -> Option<Duration> {
        let mut upcoming = self.schedule.after(&after);
        let first = upcoming.next()?;
        let second = upcoming.next()?;
        (second - first).to_std().ok()
    }

    /// Deadline for a single probe: never longer than `ceiling`, and never
    /// longer than the time until the schedule fires again.
    #[must_use]
    pub fn probe_deadline(&self, ceiling: Duration) -> Duration {
        self.interval_after(Utc::now())
            .map_or(ceiling, |interval| interval.min(ceiling))
    }
}

/// Handle to a background activity that runs until asked to stop.
///
/// Dropping the handle detaches the activity: it keeps running for the
/// life of the runtime and can no longer be stopped.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TaskHandle {
    /// Build a handle around tasks that watch `shutdown`.
    pub(crate) fn new(
        name: &'static str,
        shutdown: watch::Sender<bool>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            name,
            shutdown,
            tasks,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether every task of this activity has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Signal the activity to stop and wait for its tasks to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(task = self.name, error = %e, "task ended abnormally");
            }
        }
        debug!(task = self.name, "stopped");
    }
}

/// Wait until the shutdown flag is raised. A dropped sender never raises it.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run `job` every time `schedule` fires, until stopped.
///
/// Runs are sequential: a firing that comes due while `job` is still
/// running is skipped rather than queued, so one slow cycle can never pile
/// up work behind it.
pub fn spawn_scheduled<F, Fut>(name: &'static str, schedule: CheckSchedule, mut job: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        debug!(task = name, schedule = schedule.expr(), "schedule started");
        loop {
            let Some(next) = schedule.next_after(Utc::now()) else {
                warn!(task = name, schedule = schedule.expr(), "schedule has no upcoming firings");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stopped(&mut rx) => break,
            }

            tokio::select! {
                _ = job() => {}
                _ = stopped(&mut rx) => break,
            }
        }
        debug!(task = name, "schedule exited");
    });

    TaskHandle::new(name, tx, vec![task])
}
