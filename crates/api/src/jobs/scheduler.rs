//! Periodic background jobs that run beside the pipeline processors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFrequency {
    Seconds(u64),
    Minutes(u64),
}

impl JobFrequency {
    /// Get the duration between job executions.
    pub fn duration(&self) -> Duration {
        match self {
            JobFrequency::Seconds(secs) => Duration::from_secs((*secs).max(1)),
            JobFrequency::Minutes(mins) => Duration::from_secs((*mins).max(1) * 60),
        }
    }
}

/// Trait for implementing background jobs.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// The name of this job (used for logging and metric labels).
    fn name(&self) -> &'static str;

    fn frequency(&self) -> JobFrequency;

    async fn execute(&self) -> anyhow::Result<()>;
}

/// Runs every registered job on its own interval until shut down.
pub struct JobScheduler {
    jobs: Vec<Arc<dyn Job>>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn register<J: Job + 'static>(&mut self, job: J) {
        self.jobs.push(Arc::new(job));
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Start all registered jobs. The first run happens one period after start.
    pub fn start(&mut self) {
        info!(jobs = self.jobs.len(), "Starting job scheduler");

        for job in &self.jobs {
            let job = Arc::clone(job);
            let cancel = self.cancel.clone();
            self.tasks.spawn(run_job(job, cancel));
        }
    }

    /// Signals every job to stop after its current run.
    pub fn shutdown(&self) {
        info!("Initiating job scheduler shutdown");
        self.cancel.cancel();
    }

    /// Wait for all jobs to complete, aborting whatever is left after `timeout`.
    pub async fn wait_for_shutdown(mut self, timeout: Duration) {
        let drain = async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Job task panicked");
                }
            }
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(timeout_ms = timeout.as_millis() as u64, "Job shutdown timed out");
            self.tasks.abort_all();
        } else {
            info!("All jobs completed gracefully");
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_job(job: Arc<dyn Job>, cancel: CancellationToken) {
    let name = job.name();
    let period = job.frequency().duration();
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    debug!(job = name, period_ms = period.as_millis() as u64, "Job scheduled");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job = name, "Job shutting down");
                break;
            }
            _ = interval.tick() => {
                let start = Instant::now();
                let result = job.execute().await;
                let elapsed = start.elapsed();
                histogram!("job_duration_seconds", "job" => name).record(elapsed.as_secs_f64());

                match result {
                    Ok(()) => debug!(job = name, elapsed_ms = elapsed.as_millis() as u64, "Job completed"),
                    Err(e) => {
                        counter!("job_failures_total", "job" => name).increment(1);
                        warn!(job = name, elapsed_ms = elapsed.as_millis() as u64, error = %e, "Job failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingJob {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn frequency(&self) -> JobFrequency {
            JobFrequency::Seconds(1)
        }

        async fn execute(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[test]
    fn test_job_frequency_duration() {
        assert_eq!(JobFrequency::Seconds(30).duration(), Duration::from_secs(30));
        assert_eq!(JobFrequency::Minutes(2).duration(), Duration::from_secs(120));
        assert_eq!(JobFrequency::Seconds(0).duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_scheduler_register() {
        let mut scheduler = JobScheduler::default();
        scheduler.register(CountingJob {
            runs: Arc::new(AtomicUsize::new(0)),
            fail: false,
        });
        assert_eq!(scheduler.job_names(), vec!["counting"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_on_interval_and_survive_failures() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = JobScheduler::new();
        scheduler.register(CountingJob {
            runs: runs.clone(),
            fail: true,
        });
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        scheduler.shutdown();
        scheduler.wait_for_shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_before_first_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = JobScheduler::new();
        scheduler.register(CountingJob {
            runs: runs.clone(),
            fail: false,
        });
        scheduler.start();
        scheduler.shutdown();
        scheduler.wait_for_shutdown(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
