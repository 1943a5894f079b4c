mod error;
mod normalize;
mod poll;
mod submit;
#[cfg(test)]
mod testing;
mod transport;

use anytext_contracts::events::{EventPayload, EventWriter};
use anytext_contracts::jobs::{GenerationRequest, JobConfig, JobHandle};
use serde_json::{json, Map, Value};

pub use error::JobError;
pub use normalize::{normalize, DecodedImage, OpacityMask, PLACEHOLDER_MASK_SIZE};
pub use poll::{
    FetchedResult, PollAction, PollObservation, PollPolicy, PollState, Poller, Sleeper,
    ThreadSleeper, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL,
};
pub use submit::submit;
pub use transport::{
    ApiReply, DashscopeClient, TaskApi, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT,
};

#[derive(Debug, Clone)]
pub struct JobOutput {
    pub image: DecodedImage,
    pub mask: OpacityMask,
    pub request: GenerationRequest,
    pub handle: JobHandle,
    pub result_url: String,
    pub asset_sha256: String,
    pub poll_attempts: u32,
}

/// Runs one AnyText job end to end: validate, submit, poll, fetch, decode.
pub struct AnyTextEngine<A: TaskApi, S: Sleeper> {
    api: A,
    sleeper: S,
    events: EventWriter,
    policy: PollPolicy,
}

impl<A: TaskApi> AnyTextEngine<A, ThreadSleeper> {
    pub fn new(api: A, events: EventWriter) -> Self {
        Self::with_sleeper(api, ThreadSleeper, events, PollPolicy::default())
    }
}

impl<A: TaskApi, S: Sleeper> AnyTextEngine<A, S> {
    pub fn with_sleeper(api: A, sleeper: S, events: EventWriter, policy: PollPolicy) -> Self {
        Self {
            api,
            sleeper,
            events,
            policy,
        }
    }

    pub fn run(&self, config: &JobConfig) -> Result<JobOutput, JobError> {
        config.validate().map_err(JobError::InvalidConfig)?;
        let request = GenerationRequest::from_config(config);

        let handle = submit(&self.api, &request, &config.api_key)?;
        emit_event(
            &self.events,
            "job_submitted",
            map_object(json!({
                "task_id": handle.as_str(),
                "model": request.model,
                "payload": request.to_payload(),
            })),
        );

        let fetched = Poller::new(&self.api, &self.sleeper, &self.events, self.policy)
            .run(&config.api_key, &handle)?;
        emit_event(
            &self.events,
            "job_finished",
            map_object(json!({
                "task_id": handle.as_str(),
                "width": fetched.image.width(),
                "height": fetched.image.height(),
                "mask_kind": fetched.mask.kind(),
                "attempts": fetched.attempts,
            })),
        );

        Ok(JobOutput {
            image: fetched.image,
            mask: fetched.mask,
            request,
            handle,
            result_url: fetched.result_url,
            asset_sha256: fetched.asset_sha256,
            poll_attempts: fetched.attempts,
        })
    }

    /// Like [`run`](Self::run), but failures also land in the event log as
    /// `job_failed`.
    pub fn run_logged(&self, config: &JobConfig) -> Result<JobOutput, JobError> {
        self.run(config).inspect_err(|err| {
            let mut payload = map_object(json!({
                "error": err.to_string(),
                "error_kind": err.kind(),
            }));
            if let JobError::JobFailed { message } = err {
                payload.insert("message".to_string(), Value::String(message.clone()));
            }
            emit_event(&self.events, "job_failed", payload);
        })
    }

    /// Absent result on any failure; the reason is in the event log.
    pub fn generate(&self, config: &JobConfig) -> Option<JobOutput> {
        self.run_logged(config).ok()
    }
}

/// Event logging never decides a job's outcome; write failures go to stderr.
pub(crate) fn emit_event(events: &EventWriter, event_type: &str, payload: EventPayload) {
    if let Err(err) = events.emit(event_type, payload) {
        eprintln!(
            "anytext event log write failed ({}): {err:#}",
            events.path().display()
        );
    }
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
