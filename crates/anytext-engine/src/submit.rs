use anytext_contracts::jobs::{parse_submit_response, GenerationRequest, JobHandle};

use crate::error::{error_chain_text, truncate_text, JobError};
use crate::transport::TaskApi;

/// Sends one generation request. No retries; any failure ends the invocation.
pub fn submit(
    api: &impl TaskApi,
    request: &GenerationRequest,
    api_key: &str,
) -> Result<JobHandle, JobError> {
    let payload = request.to_payload();
    let reply = api
        .create_task(api_key, &payload)
        .map_err(|err| JobError::Submission(error_chain_text(&err, 512)))?;
    if !reply.is_ok() {
        return Err(JobError::Submission(format!(
            "HTTP {}: {}",
            reply.status,
            truncate_text(&reply.text_lossy(), 512)
        )));
    }
    let body = reply
        .parse_json()
        .map_err(|err| JobError::Submission(error_chain_text(&err, 512)))?;
    parse_submit_response(&body).map_err(JobError::Submission)
}
