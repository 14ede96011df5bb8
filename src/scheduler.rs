// Background Job Scheduler
//
// Runs periodic jobs (the daily criteria refinement) with a per-run timeout
// and keeps an in-memory execution history.

use crate::error::ReaderError;
use crate::refiner::{GenerationRefiner, RefinementOutcome};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{sleep, timeout};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job execution failed: {0}")]
    ExecutionError(String),

    #[error(transparent)]
    Reader(#[from] ReaderError),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job error: {0}")]
    JobError(#[from] JobError),
}

/// Report generated after job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Number of items the job looked at
    pub items_processed: usize,

    /// Number of changes made
    pub changes_made: usize,

    /// Duration of job execution
    #[serde(with = "serde_duration_millis")]
    pub duration: Duration,

    /// Number of errors encountered
    pub errors: usize,

    /// Optional error message if job failed
    pub error_message: Option<String>,
}

impl JobReport {
    fn failed(duration: Duration, message: String) -> Self {
        Self {
            items_processed: 0,
            changes_made: 0,
            duration,
            errors: 1,
            error_message: Some(message),
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// When a job becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval after the previous due time
    Every(Duration),
    /// Each midnight, UTC
    DailyAtMidnightUtc,
}

impl Schedule {
    /// Shortest step an interval schedule advances by
    pub const MIN_STEP: Duration = Duration::from_millis(1);

    /// First due time strictly after `from`
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let one_day = chrono::Duration::days(1);
        match self {
            Schedule::Every(interval) => {
                from + chrono::Duration::from_std((*interval).max(Self::MIN_STEP)).unwrap_or(one_day)
            }
            Schedule::DailyAtMidnightUtc => (from + one_day)
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| Utc.from_utc_datetime(&midnight))
                .unwrap_or(from + one_day),
        }
    }
}

/// Trait for scheduled jobs
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Job name (for logging and tracking)
    fn name(&self) -> &str;

    fn schedule(&self) -> Schedule;

    /// Upper bound on one run
    fn max_duration(&self) -> Duration;

    async fn run(&self) -> Result<JobReport, JobError>;
}

/// Job execution record for tracking history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: String,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub report: Option<JobReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Timeout,
}

/// Runs kept in the in-memory history; older ones are dropped
pub const MAX_HISTORY: usize = 100;

/// Background job scheduler
pub struct BackgroundScheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    running: Arc<AtomicBool>,
    history: Mutex<Vec<JobRun>>,
    /// Longest sleep between checks, so `stop` is noticed promptly
    poll_interval: Duration,
}

impl Default for BackgroundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            history: Mutex::new(Vec::new()),
            poll_interval: Duration::from_secs(60),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Register a job with the scheduler
    pub fn register_job(&mut self, job: Arc<dyn ScheduledJob>) {
        self.jobs.push(job);
    }

    /// Start the scheduler (runs until stopped)
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        tracing::info!("Starting background scheduler with {} jobs", self.jobs.len());

        let now = Utc::now();
        let mut next_due: HashMap<String, DateTime<Utc>> = self
            .jobs
            .iter()
            .map(|job| (job.name().to_string(), job.schedule().next_after(now)))
            .collect();
        for (name, due) in &next_due {
            tracing::info!("Job {} first due at {}", name, due);
        }

        while self.running.load(Ordering::SeqCst) {
            for job in &self.jobs {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                let now = Utc::now();
                let due = next_due.get(job.name()).copied().unwrap_or(now);
                if due > now {
                    tracing::debug!("Job {} not due until {}", job.name(), due);
                    continue;
                }

                if let Err(e) = self.run_job(job.as_ref()).await {
                    tracing::error!("Job {} failed: {}", job.name(), e);
                }
                let mut next = job.schedule().next_after(due);
                let now = Utc::now();
                if next <= now {
                    // Missed slots (e.g. after suspend) collapse into one run
                    next = job.schedule().next_after(now);
                }
                tracing::info!("Job {} next due at {}", job.name(), next);
                next_due.insert(job.name().to_string(), next);
            }

            let until_next = next_due
                .values()
                .min()
                .and_then(|due| due.signed_duration_since(Utc::now()).to_std().ok())
                .unwrap_or(self.poll_interval);
            sleep(until_next.min(self.poll_interval)).await;
        }

        tracing::info!("Stopping background scheduler");
        Ok(())
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run a registered job immediately
    pub async fn run_now(&self, job_name: &str) -> Result<JobReport, SchedulerError> {
        let job = self
            .jobs
            .iter()
            .find(|job| job.name() == job_name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJob(job_name.to_string()))?;
        self.run_job(job.as_ref()).await
    }

    /// Run a specific job with timeout
    async fn run_job(&self, job: &dyn ScheduledJob) -> Result<JobReport, SchedulerError> {
        let job_name = job.name();
        let max_duration = job.max_duration();
        let started_at = Utc::now();
        let clock = Instant::now();
        let job_id = uuid::Uuid::new_v4().to_string();

        tracing::info!("Starting job {} (id: {})", job_name, job_id);

        let result = timeout(max_duration, job.run()).await;

        let (status, report, error) = match result {
            Ok(Ok(report)) => {
                tracing::info!(
                    "Job {} completed successfully: {} changes in {:?}",
                    job_name,
                    report.changes_made,
                    report.duration
                );
                (JobStatus::Success, report, None)
            }
            Ok(Err(e)) => {
                tracing::error!("Job {} failed: {}", job_name, e);
                let report = JobReport::failed(clock.elapsed(), e.to_string());
                (JobStatus::Failed, report, Some(e))
            }
            Err(_) => {
                tracing::error!("Job {} timed out after {:?}", job_name, max_duration);
                let report =
                    JobReport::failed(max_duration, format!("Timeout after {:?}", max_duration));
                (JobStatus::Timeout, report, Some(JobError::Timeout(max_duration)))
            }
        };

        self.record_job_run(JobRun {
            id: job_id,
            job_name: job_name.to_string(),
            started_at,
            completed_at: Some(Utc::now()),
            status,
            report: Some(report.clone()),
        });

        match error {
            Some(e) => Err(SchedulerError::JobError(e)),
            None => Ok(report),
        }
    }

    fn record_job_run(&self, job_run: JobRun) {
        tracing::debug!("Job run recorded: {} - {:?}", job_run.job_name, job_run.status);
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(job_run);
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
    }

    /// Most recent runs first, optionally for one job
    pub fn get_job_history(&self, job_name: Option<&str>, limit: usize) -> Vec<JobRun> {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history
            .iter()
            .rev()
            .filter(|run| job_name.map_or(true, |name| run.job_name == name))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Daily criteria refinement as a scheduled job
pub struct RefinementJob {
    refiner: Arc<GenerationRefiner>,
    schedule: Schedule,
    max_duration: Duration,
}

impl RefinementJob {
    pub const NAME: &'static str = "criteria_refinement";

    pub fn new(refiner: Arc<GenerationRefiner>, schedule: Schedule, max_duration: Duration) -> Self {
        Self {
            refiner,
            schedule,
            max_duration,
        }
    }
}

#[async_trait]
impl ScheduledJob for RefinementJob {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn schedule(&self) -> Schedule {
        self.schedule
    }

    fn max_duration(&self) -> Duration {
        self.max_duration
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let clock = Instant::now();
        let report = match self.refiner.run_cycle().await? {
            RefinementOutcome::NoOp => JobReport {
                items_processed: 0,
                changes_made: 0,
                duration: clock.elapsed(),
                errors: 0,
                error_message: None,
            },
            RefinementOutcome::NewGeneration(generation) => JobReport {
                items_processed: generation.feedback_count as usize,
                changes_made: 1,
                duration: clock.elapsed(),
                errors: 0,
                error_message: None,
            },
        };
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct TestJob {
        name: String,
        delay: Duration,
        will_fail: bool,
        runs: AtomicUsize,
    }

    impl TestJob {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                delay: Duration::ZERO,
                will_fail: false,
                runs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ScheduledJob for TestJob {
        fn name(&self) -> &str {
            &self.name
        }

        fn schedule(&self) -> Schedule {
            Schedule::Every(Duration::from_millis(10))
        }

        fn max_duration(&self) -> Duration {
            Duration::from_millis(200)
        }

        async fn run(&self) -> Result<JobReport, JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            if self.will_fail {
                return Err(JobError::ExecutionError("Test failure".to_string()));
            }

            Ok(JobReport {
                items_processed: 3,
                changes_made: 1,
                duration: Duration::from_millis(5),
                errors: 0,
                error_message: None,
            })
        }
    }

    #[test]
    fn test_job_report_serialization() {
        let report = JobReport {
            items_processed: 100,
            changes_made: 10,
            duration: Duration::from_millis(500),
            errors: 0,
            error_message: None,
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"duration\":500"));
        let deserialized: JobReport = serde_json::from_str(&json).unwrap();

        assert_eq!(report.items_processed, deserialized.items_processed);
        assert_eq!(report.duration, deserialized.duration);
    }

    #[test]
    fn test_next_midnight() {
        let from = Utc.with_ymd_and_hms(2024, 3, 14, 17, 30, 0).unwrap();
        let next = Schedule::DailyAtMidnightUtc.next_after(from);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap());

        let at_midnight = Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(
            Schedule::DailyAtMidnightUtc.next_after(at_midnight),
            Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_interval_schedule() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = Schedule::Every(Duration::from_secs(3600)).next_after(from);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_zero_interval_still_advances() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(Schedule::Every(Duration::ZERO).next_after(from) > from);
    }

    #[tokio::test]
    async fn test_zero_interval_job_can_be_stopped() {
        struct Busy(AtomicUsize);

        #[async_trait]
        impl ScheduledJob for Busy {
            fn name(&self) -> &str {
                "busy"
            }

            fn schedule(&self) -> Schedule {
                Schedule::Every(Duration::ZERO)
            }

            fn max_duration(&self) -> Duration {
                Duration::from_secs(1)
            }

            async fn run(&self) -> Result<JobReport, JobError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(JobReport {
                    items_processed: 0,
                    changes_made: 0,
                    duration: Duration::ZERO,
                    errors: 0,
                    error_message: None,
                })
            }
        }

        let job = Arc::new(Busy(AtomicUsize::new(0)));
        let mut scheduler = BackgroundScheduler::new().with_poll_interval(Duration::from_millis(5));
        scheduler.register_job(job.clone());
        let scheduler = Arc::new(scheduler);

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop();

        let stopped = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(stopped.is_ok(), "scheduler ignored stop");
        assert!(job.0.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_run_now_records_success() {
        let mut scheduler = BackgroundScheduler::new();
        scheduler.register_job(Arc::new(TestJob::new("test_ok")));

        let report = scheduler.run_now("test_ok").await.unwrap();
        assert_eq!(report.changes_made, 1);

        let history = scheduler.get_job_history(Some("test_ok"), 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_history_keeps_latest_runs_only() {
        let mut scheduler = BackgroundScheduler::new();
        scheduler.register_job(Arc::new(TestJob::new("test_ok")));

        for _ in 0..MAX_HISTORY + 5 {
            scheduler.run_now("test_ok").await.unwrap();
        }

        let history = scheduler.get_job_history(None, usize::MAX);
        assert_eq!(history.len(), MAX_HISTORY);
        let newest = scheduler.get_job_history(None, 1);
        assert_eq!(history[0].id, newest[0].id);
    }

    #[tokio::test]
    async fn test_failed_and_timed_out_jobs() {
        let mut failing = TestJob::new("test_fail");
        failing.will_fail = true;
        let mut slow = TestJob::new("test_slow");
        slow.delay = Duration::from_secs(5);

        let mut scheduler = BackgroundScheduler::new();
        scheduler.register_job(Arc::new(failing));
        scheduler.register_job(Arc::new(slow));

        assert!(scheduler.run_now("test_fail").await.is_err());
        let result = scheduler.run_now("test_slow").await;
        assert!(matches!(
            result,
            Err(SchedulerError::JobError(JobError::Timeout(_)))
        ));

        let history = scheduler.get_job_history(None, 10);
        assert_eq!(history[0].status, JobStatus::Timeout);
        assert_eq!(history[1].status, JobStatus::Failed);
        assert!(matches!(
            scheduler.run_now("missing").await,
            Err(SchedulerError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_start_runs_due_jobs_until_stopped() {
        let job = Arc::new(TestJob::new("test_loop"));
        let mut scheduler = BackgroundScheduler::new().with_poll_interval(Duration::from_millis(5));
        scheduler.register_job(job.clone());
        let scheduler = Arc::new(scheduler);

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.start().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));
        scheduler.stop();
        handle.await.unwrap().unwrap();

        assert!(job.runs.load(Ordering::SeqCst) >= 2);
    }
}
