//! The run loop: sleeps until each occurrence and fans out worker instances.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use carillon_recurrence::Recurrence;

use crate::config::JobConfig;

/// Context handed to the executor for one worker instance of one tick.
#[derive(Debug, Clone)]
pub struct JobRun {
    /// Name of the job that fired.
    pub job: String,
    /// Instance index within the tick, 0-based.
    pub instance: usize,
    /// The occurrence this tick was scheduled for.
    pub scheduled_for: DateTime<Utc>,
    /// Unique id for this instance execution.
    pub execution_id: String,
}

/// Type alias for the job executor function.
pub type JobExecutor = Arc<
    dyn Fn(JobRun) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync,
>;

/// Drives one job: one recurrence engine, one executor, N instances per tick.
pub struct Runner {
    config: JobConfig,
    schedule: Recurrence,
    in_flight: Arc<AtomicUsize>,
}

impl Runner {
    pub fn new(config: JobConfig, schedule: Recurrence) -> Self {
        Self {
            config,
            schedule,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run until the rule is exhausted or shutdown is signalled.
    ///
    /// Sleeping here is the only suspension point in the whole system; the
    /// engine itself never waits. Overdue occurrences sleep for zero and
    /// fire immediately.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>, executor: JobExecutor) {
        info!(job = %self.config.name, instances = self.config.instances, "runner started");

        'run: loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let Some(next) = self.schedule.next_occurrence() else {
                info!(job = %self.config.name, "schedule exhausted, runner stopping");
                break;
            };
            loop {
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!(job = %self.config.name, "runner received shutdown signal");
                            break 'run;
                        }
                    }
                    _ = sleep(wait) => {
                        self.fire(next, &executor);
                        break;
                    }
                }
            }
        }

        info!(job = %self.config.name, "runner stopped");
    }

    /// Fan out the configured worker instances for one tick.
    fn fire(&self, scheduled_for: DateTime<Utc>, executor: &JobExecutor) {
        if !self.config.allow_overlap {
            let running = self.in_flight.load(Ordering::SeqCst);
            if running > 0 {
                warn!(
                    job = %self.config.name,
                    running,
                    "skipping tick, previous instances still running"
                );
                return;
            }
        }

        for instance in 0..self.config.instances {
            let run = JobRun {
                job: self.config.name.clone(),
                instance,
                scheduled_for,
                execution_id: Uuid::new_v4().to_string(),
            };
            // Raise the counter before spawning so a tick that follows
            // immediately sees these instances as in flight.
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let in_flight = Arc::clone(&self.in_flight);
            let executor = Arc::clone(executor);
            tokio::spawn(async move {
                debug!(
                    job = %run.job,
                    instance = run.instance,
                    execution_id = %run.execution_id,
                    "instance started"
                );
                if let Err(e) = executor(run.clone()).await {
                    warn!(
                        job = %run.job,
                        instance = run.instance,
                        execution_id = %run.execution_id,
                        error = %e,
                        "instance failed"
                    );
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuleConfig, build_recurrence, build_recurrence_at};
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    /// A job whose whole schedule lies in the past: every occurrence fires
    /// immediately and the runner stops on its own once exhausted.
    fn past_job(name: &str, years: Vec<i32>, instances: usize, allow_overlap: bool) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            rule: RuleConfig {
                seconds: vec![0],
                minutes: vec![0],
                hours: vec![0],
                days: vec![1],
                months: vec![1],
                years,
                timezone: Some("UTC".to_string()),
                ..RuleConfig::default()
            },
            command: vec![],
            instances,
            allow_overlap,
            timeout_sec: None,
        }
    }

    fn recording_executor(tx: mpsc::UnboundedSender<JobRun>) -> JobExecutor {
        Arc::new(move |run| {
            let tx = tx.clone();
            Box::pin(async move {
                tx.send(run).map_err(|e| e.to_string())?;
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn fires_every_occurrence_and_stops_when_exhausted() {
        // Overlap is allowed so back-to-back catch-up ticks all fire.
        let config = past_job("catchup", vec![2000, 2001], 1, true);
        let aligned_at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let schedule = build_recurrence_at(&config, aligned_at).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Runner::new(config, schedule)
            .run(shutdown_rx, recording_executor(tx))
            .await;

        let mut fired: Vec<DateTime<Utc>> = Vec::new();
        while let Some(run) = rx.recv().await {
            fired.push(run.scheduled_for);
        }
        fired.sort_unstable();
        assert_eq!(
            fired,
            vec![
                Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn fans_out_the_configured_instances() {
        let config = past_job("fanout", vec![2000], 3, false);
        let aligned_at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let schedule = build_recurrence_at(&config, aligned_at).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Runner::new(config, schedule)
            .run(shutdown_rx, recording_executor(tx))
            .await;

        let mut runs = Vec::new();
        while let Some(run) = rx.recv().await {
            runs.push(run);
        }
        assert_eq!(runs.len(), 3);

        let mut instances: Vec<usize> = runs.iter().map(|r| r.instance).collect();
        instances.sort_unstable();
        assert_eq!(instances, vec![0, 1, 2]);

        // All instances share the tick but carry distinct execution ids.
        assert!(runs.iter().all(|r| r.scheduled_for == runs[0].scheduled_for));
        let mut ids: Vec<&str> = runs.iter().map(|r| r.execution_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped_by_default() {
        let config = past_job("slow", vec![2000, 2001], 1, false);
        let aligned_at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let schedule = build_recurrence_at(&config, aligned_at).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor: JobExecutor = Arc::new(move |run| {
            let tx = tx.clone();
            Box::pin(async move {
                // Outlive the next tick so the overlap guard engages.
                sleep(Duration::from_millis(200)).await;
                tx.send(run).map_err(|e| e.to_string())?;
                Ok(())
            })
        });

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Runner::new(config, schedule).run(shutdown_rx, executor).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn overlapping_tick_fires_when_allowed() {
        let config = past_job("eager", vec![2000, 2001], 1, true);
        let aligned_at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let schedule = build_recurrence_at(&config, aligned_at).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor: JobExecutor = Arc::new(move |run| {
            let tx = tx.clone();
            Box::pin(async move {
                sleep(Duration::from_millis(200)).await;
                tx.send(run).map_err(|e| e.to_string())?;
                Ok(())
            })
        });

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Runner::new(config, schedule).run(shutdown_rx, executor).await;

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_waiting_runner() {
        // A schedule whose next occurrence is far in the future.
        let config = JobConfig {
            name: "patient".to_string(),
            rule: RuleConfig {
                years: vec![3000],
                timezone: Some("UTC".to_string()),
                ..RuleConfig::default()
            },
            command: vec![],
            instances: 1,
            allow_overlap: false,
            timeout_sec: None,
        };
        let schedule = build_recurrence(&config).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(
            Runner::new(config, schedule).run(shutdown_rx, recording_executor(tx)),
        );

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop after shutdown")
            .unwrap();
        assert!(rx.recv().await.is_none());
    }
}
