use crate::core::config::PollConfig;
use crate::core::error::{Result, WorkflowError};
use crate::core::model::{JobHandle, JobStatus, PollState};
use crate::services::backend::StoryBackend;
use crate::utils::timer::{cancellable, delay};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

/// Queries the status of `job` until it reaches a terminal status or
/// `config.max_attempts` queries were spent.
///
/// The first query is issued immediately; every later one waits
/// `config.interval` first. A failed query uses up one attempt. When the
/// budget runs out the loop ends in `TimedOut`, unless the last query itself
/// failed, in which case that error is returned. Cancelling `cancel` stops the
/// loop between queries and aborts a query in flight.
pub async fn poll_until_ready(
    backend: &dyn StoryBackend,
    job: &JobHandle,
    config: &PollConfig,
    cancel: &CancellationToken,
    mut observe: impl FnMut(&PollState) + Send,
) -> Result<String> {
    observe(&PollState::Submitted(job.clone()));
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        if attempt > 1 {
            delay(config.interval(), cancel).await?;
        }
        observe(&PollState::Polling {
            attempt,
            max_attempts: config.max_attempts,
        });
        debug!("Checking job {} ({}/{})", job, attempt, config.max_attempts);

        match cancellable(cancel, backend.flipbook_status(job)).await {
            Ok(JobStatus::Ready(link)) => {
                info!("Job {} ready: {}", job, link);
                observe(&PollState::Ready(link.clone()));
                return Ok(link);
            }
            Ok(JobStatus::Error(details)) => {
                warn!("Job {} failed: {}", job, details);
                observe(&PollState::Error(details.clone()));
                return Err(WorkflowError::JobFailed(details));
            }
            Ok(JobStatus::Pending) => {
                last_error = None;
            }
            Err(WorkflowError::Cancelled) => {
                info!("Stopped polling job {}", job);
                return Err(WorkflowError::Cancelled);
            }
            Err(e) => {
                warn!("Status check {}/{} for job {} failed: {}", attempt, config.max_attempts, job, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => {
            observe(&PollState::Error(e.user_message()));
            Err(e)
        }
        None => {
            warn!("Job {} still pending after {} checks", job, config.max_attempts);
            observe(&PollState::TimedOut);
            Err(WorkflowError::JobTimedOut {
                attempts: config.max_attempts,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::MockBackend;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    fn poll_config() -> PollConfig {
        PollConfig {
            interval_seconds: 10,
            max_attempts: 5,
        }
    }

    fn job() -> JobHandle {
        JobHandle("job-1".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_query() {
        let backend = MockBackend::new().with_statuses(vec![
            Ok(JobStatus::Pending),
            Ok(JobStatus::Pending),
            Ok(JobStatus::Ready("https://flip/abc".into())),
        ]);
        let start = Instant::now();
        let states = Arc::new(Mutex::new(Vec::new()));
        let seen = states.clone();

        let link = poll_until_ready(&backend, &job(), &poll_config(), &CancellationToken::new(), move |s| {
            seen.lock().unwrap().push(s.clone())
        })
        .await
        .unwrap();

        assert_eq!(link, "https://flip/abc");
        let offsets: Vec<Duration> = backend
            .status_times()
            .iter()
            .map(|t| t.duration_since(start))
            .collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(10), Duration::from_secs(20)]
        );

        let states = states.lock().unwrap();
        assert_eq!(states.first(), Some(&PollState::Submitted(job())));
        assert_eq!(states.last(), Some(&PollState::Ready("https://flip/abc".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_times_out() {
        let backend = MockBackend::new().with_statuses(vec![Ok(JobStatus::Pending); 5]);
        let mut last = None;

        let err = poll_until_ready(&backend, &job(), &poll_config(), &CancellationToken::new(), |s| {
            last = Some(s.clone())
        })
        .await
        .unwrap_err();

        assert_eq!(err, WorkflowError::JobTimedOut { attempts: 5 });
        assert_eq!(backend.status_times().len(), 5);
        assert_eq!(last, Some(PollState::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_stops_immediately() {
        let backend = MockBackend::new().with_statuses(vec![
            Ok(JobStatus::Pending),
            Ok(JobStatus::Error("conversion failed".into())),
            Ok(JobStatus::Ready("never".into())),
        ]);

        let err = poll_until_ready(&backend, &job(), &poll_config(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(err, WorkflowError::JobFailed("conversion failed".into()));
        assert_eq!(backend.status_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_queries_consume_budget() {
        let backend = MockBackend::new().with_statuses(vec![
            Err(WorkflowError::Network("reset".into())),
            Ok(JobStatus::Pending),
            Err(WorkflowError::Network("reset".into())),
            Ok(JobStatus::Ready("https://flip/ok".into())),
        ]);
        let link = poll_until_ready(&backend, &job(), &poll_config(), &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(link, "https://flip/ok");

        let backend = MockBackend::new()
            .with_statuses(vec![Err(WorkflowError::Network("down".into())); 5]);
        let err = poll_until_ready(&backend, &job(), &poll_config(), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::Network("down".into()));
        assert_eq!(backend.status_times().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_queries_stops_polling() {
        let backend = Arc::new(MockBackend::new());
        let token = CancellationToken::new();

        let task = {
            let backend = backend.clone();
            let token = token.clone();
            tokio::spawn(async move {
                poll_until_ready(backend.as_ref(), &job(), &poll_config(), &token, |_| {}).await
            })
        };

        // Let the first query run, then cancel during the wait before the second.
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();

        let out = task.await.unwrap();
        assert_eq!(out, Err(WorkflowError::Cancelled));
        assert_eq!(backend.status_times().len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.status_times().len(), 1);
    }
}
