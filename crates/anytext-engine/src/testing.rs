use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Cursor;
use std::time::Duration;

use anyhow::Result;
use anytext_contracts::jobs::JobHandle;
use image::{DynamicImage, ImageFormat};
use serde_json::{json, Value};

use crate::poll::Sleeper;
use crate::transport::{ApiReply, TaskApi};

/// `TaskApi` that replays canned replies and records every call.
///
/// Once the poll script is used up, every further query answers RUNNING.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    submit_replies: RefCell<VecDeque<Result<ApiReply>>>,
    poll_replies: RefCell<VecDeque<Result<ApiReply>>>,
    fetch_replies: RefCell<VecDeque<Result<ApiReply>>>,
    submitted: RefCell<Vec<(String, Value)>>,
    polled: RefCell<Vec<String>>,
    fetched: RefCell<Vec<String>>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_submit(self, reply: Result<ApiReply>) -> Self {
        self.submit_replies.borrow_mut().push_back(reply);
        self
    }

    pub(crate) fn on_poll(self, reply: Result<ApiReply>) -> Self {
        self.poll_replies.borrow_mut().push_back(reply);
        self
    }

    pub(crate) fn on_fetch(self, reply: Result<ApiReply>) -> Self {
        self.fetch_replies.borrow_mut().push_back(reply);
        self
    }

    pub(crate) fn submitted(&self) -> Vec<(String, Value)> {
        self.submitted.borrow().clone()
    }

    pub(crate) fn polled(&self) -> Vec<String> {
        self.polled.borrow().clone()
    }

    pub(crate) fn fetched(&self) -> Vec<String> {
        self.fetched.borrow().clone()
    }
}

impl TaskApi for ScriptedApi {
    fn create_task(&self, api_key: &str, payload: &Value) -> Result<ApiReply> {
        self.submitted
            .borrow_mut()
            .push((api_key.to_string(), payload.clone()));
        self.submit_replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted submit reply")))
    }

    fn get_task(&self, _api_key: &str, handle: &JobHandle) -> Result<ApiReply> {
        self.polled.borrow_mut().push(handle.as_str().to_string());
        self.poll_replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(status_reply("RUNNING")))
    }

    fn fetch_asset(&self, url: &str) -> Result<ApiReply> {
        self.fetched.borrow_mut().push(url.to_string());
        self.fetch_replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted fetch reply")))
    }
}

#[derive(Default)]
pub(crate) struct RecordingSleeper {
    naps: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn naps(&self) -> Vec<Duration> {
        self.naps.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, interval: Duration) {
        self.naps.borrow_mut().push(interval);
    }
}

pub(crate) fn accepted_reply(task_id: &str) -> ApiReply {
    ApiReply::json(
        200,
        &json!({"request_id": "req-1", "output": {"task_id": task_id, "task_status": "PENDING"}}),
    )
}

pub(crate) fn status_reply(status: &str) -> ApiReply {
    ApiReply::json(200, &json!({"output": {"task_id": "t-1", "task_status": status}}))
}

pub(crate) fn succeeded_reply(url: &str) -> ApiReply {
    ApiReply::json(
        200,
        &json!({"output": {"task_id": "t-1", "task_status": "SUCCEEDED", "result_url": [url]}}),
    )
}

pub(crate) fn failed_reply(message: &str) -> ApiReply {
    ApiReply::json(
        200,
        &json!({"output": {"task_id": "t-1", "task_status": "FAILED", "message": message}}),
    )
}

pub(crate) fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap_or_else(|err| panic!("failed to encode test image: {err}"));
    bytes
}
