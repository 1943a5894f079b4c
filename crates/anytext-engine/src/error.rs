use thiserror::Error;

/// Fatal outcomes of one job invocation.
///
/// Transport hiccups while polling (connection errors, 429, 5xx) are not
/// listed here: the poller logs them and keeps going until its budget runs
/// out. Any other non-200 status reply ends the job as `PollRejected`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),
    #[error("job submission failed: {0}")]
    Submission(String),
    #[error("malformed task response: {0}")]
    MalformedResponse(String),
    #[error("task query rejected with HTTP {status}: {message}")]
    PollRejected { status: u16, message: String },
    #[error("job failed: {message}")]
    JobFailed { message: String },
    #[error("job still running after {attempts} status queries")]
    TimeoutExceeded { attempts: u32 },
    #[error("result fetch failed: {0}")]
    Fetch(String),
    #[error("result decode failed: {0}")]
    Decode(String),
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::Submission(_) => "submission",
            Self::MalformedResponse(_) => "malformed_response",
            Self::PollRejected { .. } => "poll_rejected",
            Self::JobFailed { .. } => "job_failed",
            Self::TimeoutExceeded { .. } => "timeout_exceeded",
            Self::Fetch(_) => "fetch",
            Self::Decode(_) => "decode",
        }
    }
}

impl From<image::ImageError> for JobError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{error_chain_text, truncate_text, JobError};

    #[test]
    fn error_chain_text_joins_and_dedupes_causes() {
        let err = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("task query failed (https://example.com/tasks/t-1)")
            .context("task query failed (https://example.com/tasks/t-1)")
            .err()
            .unwrap_or_else(|| anyhow::anyhow!("unreachable"));
        assert_eq!(
            error_chain_text(&err, 512),
            "task query failed (https://example.com/tasks/t-1) | caused by: connection refused"
        );
    }

    #[test]
    fn truncate_text_marks_cut_output() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn kinds_are_stable_labels() {
        assert_eq!(JobError::TimeoutExceeded { attempts: 100 }.kind(), "timeout_exceeded");
        assert_eq!(
            JobError::JobFailed {
                message: "quota exceeded".to_string()
            }
            .to_string(),
            "job failed: quota exceeded"
        );
        let rejected = JobError::PollRejected {
            status: 401,
            message: "InvalidApiKey: Invalid API-key provided.".to_string(),
        };
        assert_eq!(rejected.kind(), "poll_rejected");
        assert_eq!(
            rejected.to_string(),
            "task query rejected with HTTP 401: InvalidApiKey: Invalid API-key provided."
        );
    }
}
