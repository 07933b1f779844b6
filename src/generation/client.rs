use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::generation::error::{BackendError, GenerationError};
use crate::generation::params::GenerationRequest;
use crate::generation::progress::ProgressReporter;

const MIN_KEEP_ALIVE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    Json(Value),
    Binary {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

/// Opaque id of a queued remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Completed(RawResponse),
    Failed(String),
    Queued(JobHandle),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Succeeded(RawResponse),
    Failed(String),
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, request: &GenerationRequest) -> Result<SubmitOutcome, BackendError>;

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, BackendError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub poll_interval: Duration,
    pub keep_alive_interval: Duration,
    pub overall_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
enum JobState {
    Submitting,
    Pending { job: JobHandle, attempt: u32 },
    Succeeded(RawResponse),
    Failed(String),
    TimedOut,
}

fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt.max(1))
}

pub struct GenerationClient {
    backend: Arc<dyn ImageBackend>,
    settings: ClientSettings,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn ImageBackend>, settings: ClientSettings) -> Self {
        GenerationClient { backend, settings }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn execute(
        &self,
        request: &GenerationRequest,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, GenerationError> {
        let started = Instant::now();
        let deadline = started + self.settings.overall_timeout;
        let mut state = JobState::Submitting;

        loop {
            state = match state {
                JobState::Submitting => {
                    let outcome = self
                        .submit_with_retry(request, reporter, cancel, deadline)
                        .await?;
                    reporter.submitted();
                    match outcome {
                        SubmitOutcome::Completed(raw) => JobState::Succeeded(raw),
                        SubmitOutcome::Failed(reason) => JobState::Failed(reason),
                        SubmitOutcome::Queued(job) => {
                            info!(
                                backend = self.backend.name(),
                                job_id = %job.0,
                                "Image job queued"
                            );
                            JobState::Pending { job, attempt: 0 }
                        }
                    }
                }
                JobState::Pending { job, attempt } => {
                    if attempt > 0 {
                        let wake_at = (Instant::now() + self.settings.poll_interval).min(deadline);
                        self.keep_alive_until(sleep_until(wake_at), reporter, cancel, deadline)
                            .await?;
                    }
                    if Instant::now() >= deadline {
                        JobState::TimedOut
                    } else {
                        let attempt = attempt + 1;
                        reporter.polling(attempt);
                        match self.poll_with_retry(&job, reporter, cancel, deadline).await? {
                            Some(JobStatus::Pending) => JobState::Pending { job, attempt },
                            Some(JobStatus::Succeeded(raw)) => JobState::Succeeded(raw),
                            Some(JobStatus::Failed(reason)) => JobState::Failed(reason),
                            None => JobState::TimedOut,
                        }
                    }
                }
                JobState::Succeeded(raw) => return Ok(raw),
                JobState::Failed(reason) => return Err(GenerationError::JobFailed(reason)),
                JobState::TimedOut => {
                    warn!(
                        backend = self.backend.name(),
                        waited_s = started.elapsed().as_secs_f64(),
                        "Image job exceeded its wait budget"
                    );
                    return Err(self.timed_out());
                }
            };
        }
    }

    fn timed_out(&self) -> GenerationError {
        GenerationError::TimedOut {
            waited: self.settings.overall_timeout,
        }
    }

    /// Drives `work` while sending a keep-alive every `keep_alive_interval`,
    /// so a slow backend call or a long wait never goes quiet. `Ok(None)`
    /// means the deadline passed first.
    async fn keep_alive_until<F>(
        &self,
        work: F,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<Option<F::Output>, GenerationError>
    where
        F: Future,
    {
        tokio::pin!(work);
        let period = self.settings.keep_alive_interval.max(MIN_KEEP_ALIVE);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = sleep_until(deadline) => return Ok(None),
                output = &mut work => return Ok(Some(output)),
                _ = ticker.tick() => reporter.keep_alive(),
            }
        }
    }

    /// Waits out the linear backoff. `false` when the next attempt would
    /// start past the deadline.
    async fn backoff(
        &self,
        attempt: u32,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<bool, GenerationError> {
        let wake_at = Instant::now() + retry_delay(self.settings.retry_base_delay, attempt);
        if wake_at >= deadline {
            return Ok(false);
        }
        let slept = self
            .keep_alive_until(sleep_until(wake_at), reporter, cancel, deadline)
            .await?;
        Ok(slept.is_some())
    }

    async fn submit_with_retry(
        &self,
        request: &GenerationRequest,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<SubmitOutcome, GenerationError> {
        let mut failures = 0u32;
        loop {
            let result = self
                .keep_alive_until(self.backend.submit(request), reporter, cancel, deadline)
                .await?
                .ok_or_else(|| self.timed_out())?;

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    failures += 1;
                    let should_retry = err.retryable && failures <= self.settings.max_retries;
                    warn!(
                        backend = self.backend.name(),
                        "Image submit failed: {} (attempt={}, retrying={})",
                        err.message,
                        failures,
                        should_retry
                    );
                    if !should_retry
                        || !self.backoff(failures, reporter, cancel, deadline).await?
                    {
                        return Err(GenerationError::RemoteError(err.message));
                    }
                }
            }
        }
    }

    /// `Ok(None)` means the deadline passed while waiting on the backend.
    async fn poll_with_retry(
        &self,
        job: &JobHandle,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<Option<JobStatus>, GenerationError> {
        let mut failures = 0u32;
        loop {
            let Some(result) = self
                .keep_alive_until(self.backend.poll(job), reporter, cancel, deadline)
                .await?
            else {
                return Ok(None);
            };

            match result {
                Ok(status) => {
                    debug!(job_id = %job.0, status = status_label(&status), "Polled image job");
                    return Ok(Some(status));
                }
                Err(err) => {
                    failures += 1;
                    let should_retry = err.retryable && failures <= self.settings.max_retries;
                    warn!(
                        backend = self.backend.name(),
                        job_id = %job.0,
                        "Image job poll failed: {} (attempt={}, retrying={})",
                        err.message,
                        failures,
                        should_retry
                    );
                    if !should_retry {
                        return Err(GenerationError::RemoteError(err.message));
                    }
                    if !self.backoff(failures, reporter, cancel, deadline).await? {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

fn status_label(status: &JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Succeeded(_) => "succeeded",
        JobStatus::Failed(_) => "failed",
    }
}
