use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task identifier handed out by the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self(task_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded { result_url: String },
    Failed { message: String },
}

#[derive(Debug, Deserialize)]
struct SubmitEnvelope {
    output: SubmitOutput,
}

#[derive(Debug, Deserialize)]
struct SubmitOutput {
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    output: TaskOutput,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    task_status: Option<String>,
    #[serde(default)]
    result_url: Option<ResultUrls>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResultUrls {
    Many(Vec<String>),
    One(String),
}

impl ResultUrls {
    fn first(self) -> Option<String> {
        match self {
            Self::Many(urls) => urls.into_iter().next(),
            Self::One(url) => Some(url),
        }
    }
}

/// Extracts `output.task_id` from a submission response body.
pub fn parse_submit_response(body: &Value) -> Result<JobHandle, String> {
    let envelope: SubmitEnvelope = serde_json::from_value(body.clone())
        .map_err(|err| format!("submission response missing `output`: {err}"))?;
    envelope
        .output
        .task_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(JobHandle::new)
        .ok_or_else(|| "submission response missing `output.task_id`".to_string())
}

/// Reads the job status out of a task query response body.
///
/// Any status other than `SUCCEEDED` or `FAILED` counts as still running.
pub fn parse_task_response(body: &Value) -> Result<JobStatus, String> {
    let envelope: TaskEnvelope = serde_json::from_value(body.clone())
        .map_err(|err| format!("task response missing `output`: {err}"))?;
    let output = envelope.output;
    let status = output
        .task_status
        .map(|value| value.trim().to_ascii_uppercase())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| "task response missing `output.task_status`".to_string())?;

    match status.as_str() {
        "SUCCEEDED" => {
            let result_url = output
                .result_url
                .and_then(ResultUrls::first)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| "SUCCEEDED task response has no `output.result_url`".to_string())?;
            Ok(JobStatus::Succeeded { result_url })
        }
        "FAILED" => {
            let message = output
                .message
                .filter(|value| !value.trim().is_empty())
                .or(output.code)
                .unwrap_or_else(|| "task failed without a message".to_string());
            Ok(JobStatus::Failed { message })
        }
        _ => Ok(JobStatus::Running),
    }
}
