use std::thread;
use std::time::Duration;

use anytext_contracts::events::EventWriter;
use anytext_contracts::jobs::{parse_task_response, JobHandle, JobStatus};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{error_chain_text, truncate_text, JobError};
use crate::normalize::{normalize, DecodedImage, OpacityMask};
use crate::transport::{ApiReply, TaskApi};
use crate::{emit_event, map_object};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Blocking pause between status queries.
pub trait Sleeper {
    fn sleep(&self, interval: Duration);
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, interval: Duration) {
        (**self).sleep(interval)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, interval: Duration) {
        thread::sleep(interval);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    max_attempts: u32,
}

impl PollPolicy {
    /// `max_attempts` is clamped to at least one status query.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }
}

/// What a single status query produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollObservation {
    Status(JobStatus),
    TransportError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Polling { attempts: u32 },
    Succeeded { result_url: String, attempts: u32 },
    Failed { message: String, attempts: u32 },
    TimedOut { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollAction {
    Sleep(Duration),
    Fetch(String),
    Stop,
}

impl PollState {
    pub fn start() -> Self {
        Self::Polling { attempts: 0 }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Polling { attempts }
            | Self::Succeeded { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::TimedOut { attempts } => *attempts,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Polling { .. })
    }

    /// Folds one observation into the state.
    ///
    /// Every observation spends one attempt. A non-terminal observation
    /// checks the budget before asking for a sleep, so the last allowed
    /// query is never followed by a pause. Terminal states absorb further
    /// observations unchanged.
    pub fn advance(self, observation: PollObservation, policy: &PollPolicy) -> (Self, PollAction) {
        let Self::Polling { attempts } = self else {
            return (self, PollAction::Stop);
        };
        let attempts = attempts.saturating_add(1);
        match observation {
            PollObservation::Status(JobStatus::Succeeded { result_url }) => (
                Self::Succeeded {
                    result_url: result_url.clone(),
                    attempts,
                },
                PollAction::Fetch(result_url),
            ),
            PollObservation::Status(JobStatus::Failed { message }) => {
                (Self::Failed { message, attempts }, PollAction::Stop)
            }
            PollObservation::Status(JobStatus::Running) | PollObservation::TransportError(_) => {
                if attempts >= policy.max_attempts() {
                    (Self::TimedOut { attempts }, PollAction::Stop)
                } else {
                    (Self::Polling { attempts }, PollAction::Sleep(policy.interval()))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResult {
    pub image: DecodedImage,
    pub mask: OpacityMask,
    pub result_url: String,
    pub asset_sha256: String,
    pub attempts: u32,
}

/// Drives status queries for one handle until the job settles, then fetches
/// and normalizes the result.
pub struct Poller<'a, A: TaskApi, S: Sleeper> {
    api: &'a A,
    sleeper: &'a S,
    events: &'a EventWriter,
    policy: PollPolicy,
}

impl<'a, A: TaskApi, S: Sleeper> Poller<'a, A, S> {
    pub fn new(api: &'a A, sleeper: &'a S, events: &'a EventWriter, policy: PollPolicy) -> Self {
        Self {
            api,
            sleeper,
            events,
            policy,
        }
    }

    pub fn run(&self, api_key: &str, handle: &JobHandle) -> Result<FetchedResult, JobError> {
        let mut state = PollState::start();
        loop {
            let observation = self.observe(api_key, handle, state.attempts() + 1)?;
            let (next, action) = state.advance(observation, &self.policy);
            state = next;
            match action {
                PollAction::Sleep(interval) => self.sleeper.sleep(interval),
                PollAction::Fetch(url) => {
                    emit_event(
                        self.events,
                        "job_succeeded",
                        map_object(json!({
                            "task_id": handle.as_str(),
                            "result_url": url,
                            "attempts": state.attempts(),
                        })),
                    );
                    return self.fetch(&url, state.attempts());
                }
                PollAction::Stop => break,
            }
        }

        match state {
            PollState::Failed { message, .. } => Err(JobError::JobFailed { message }),
            PollState::TimedOut { attempts } => Err(JobError::TimeoutExceeded { attempts }),
            PollState::Polling { attempts } | PollState::Succeeded { attempts, .. } => {
                Err(JobError::MalformedResponse(format!(
                    "poll loop stopped in a non-final state after {attempts} queries"
                )))
            }
        }
    }

    fn observe(
        &self,
        api_key: &str,
        handle: &JobHandle,
        attempt: u32,
    ) -> Result<PollObservation, JobError> {
        let reply = match self.api.get_task(api_key, handle) {
            Ok(reply) => reply,
            Err(err) => {
                return Ok(self.transport_error(handle, attempt, error_chain_text(&err, 512)));
            }
        };
        if is_retryable_status(reply.status) {
            let detail = format!(
                "HTTP {}: {}",
                reply.status,
                truncate_text(&reply.text_lossy(), 512)
            );
            return Ok(self.transport_error(handle, attempt, detail));
        }
        if !reply.is_ok() {
            return Err(JobError::PollRejected {
                status: reply.status,
                message: rejection_message(&reply),
            });
        }

        let body = reply
            .parse_json()
            .map_err(|err| JobError::MalformedResponse(error_chain_text(&err, 512)))?;
        let status = parse_task_response(&body).map_err(JobError::MalformedResponse)?;
        let message = match &status {
            JobStatus::Failed { message } => Value::String(message.clone()),
            _ => Value::Null,
        };
        emit_event(
            self.events,
            "poll_status",
            map_object(json!({
                "task_id": handle.as_str(),
                "attempt": attempt,
                "status": status_label(&status),
                "message": message,
            })),
        );
        Ok(PollObservation::Status(status))
    }

    fn transport_error(&self, handle: &JobHandle, attempt: u32, detail: String) -> PollObservation {
        emit_event(
            self.events,
            "poll_transport_error",
            map_object(json!({
                "task_id": handle.as_str(),
                "attempt": attempt,
                "error": detail,
            })),
        );
        PollObservation::TransportError(detail)
    }

    fn fetch(&self, url: &str, attempts: u32) -> Result<FetchedResult, JobError> {
        let reply = self
            .api
            .fetch_asset(url)
            .map_err(|err| JobError::Fetch(error_chain_text(&err, 512)))?;
        if !reply.is_ok() {
            return Err(JobError::Fetch(format!(
                "HTTP {} from {url}: {}",
                reply.status,
                truncate_text(&reply.text_lossy(), 256)
            )));
        }
        let asset_sha256 = hex::encode(Sha256::digest(&reply.body));
        emit_event(
            self.events,
            "asset_fetched",
            map_object(json!({
                "url": url,
                "bytes": reply.body.len(),
                "sha256": asset_sha256,
            })),
        );
        let (image, mask) = normalize(&reply.body)?;
        Ok(FetchedResult {
            image,
            mask,
            result_url: url.to_string(),
            asset_sha256,
            attempts,
        })
    }
}

/// Throttling and server-side failures are retried; other non-200 replies
/// (bad key, unknown task) are final.
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

fn rejection_message(reply: &ApiReply) -> String {
    let body = reply.parse_json().unwrap_or(Value::Null);
    match (text_field(&body, "code"), text_field(&body, "message")) {
        (Some(code), Some(message)) => format!("{code}: {message}"),
        (Some(text), None) | (None, Some(text)) => text.to_string(),
        (None, None) => truncate_text(&reply.text_lossy(), 512),
    }
}

fn text_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn status_label(status: &JobStatus) -> &'static str {
    match status {
        JobStatus::Running => "RUNNING",
        JobStatus::Succeeded { .. } => "SUCCEEDED",
        JobStatus::Failed { .. } => "FAILED",
    }
}
