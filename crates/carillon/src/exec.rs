//! Process-spawning job executor.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use carillon_runner::{JobConfig, JobExecutor, JobRun};

/// Build an executor that runs the job's command once per worker instance.
///
/// Tick context travels through environment variables so the spawned binary
/// knows which job fired, which instance it is, and for when.
pub fn spawn_executor(config: &JobConfig) -> JobExecutor {
    let command = config.command.clone();
    let timeout_sec = config.timeout_sec;

    Arc::new(move |run: JobRun| {
        let command = command.clone();
        Box::pin(async move {
            let (bin, args) = command
                .split_first()
                .ok_or_else(|| "job has no command".to_string())?;

            let mut cmd = tokio::process::Command::new(bin);
            cmd.args(args)
                .env("CARILLON_JOB", &run.job)
                .env("CARILLON_INSTANCE", run.instance.to_string())
                .env("CARILLON_EXECUTION_ID", &run.execution_id)
                .env("CARILLON_SCHEDULED_FOR", run.scheduled_for.to_rfc3339())
                // If the host dies, the OS reaps the child with it.
                .kill_on_drop(true);

            let mut child = cmd
                .spawn()
                .map_err(|e| format!("failed to spawn {bin}: {e}"))?;

            let status = match timeout_sec {
                Some(secs) => {
                    match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!(
                                job = %run.job,
                                instance = run.instance,
                                timeout_sec = secs,
                                "instance timed out, killing"
                            );
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            return Err(format!("timed out after {secs}s"));
                        }
                    }
                }
                None => child.wait().await,
            };

            match status {
                Ok(status) if status.success() => {
                    debug!(job = %run.job, instance = run.instance, "instance completed");
                    Ok(())
                }
                Ok(status) => Err(format!("exited with status: {status}")),
                Err(e) => Err(format!("wait error: {e}")),
            }
        })
    })
}
