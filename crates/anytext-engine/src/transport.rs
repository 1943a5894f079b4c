use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use anytext_contracts::jobs::JobHandle;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

pub const DEFAULT_API_BASE: &str = "https://dashscope.aliyuncs.com/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const ASYNC_HEADER: &str = "X-DashScope-Async";

/// Status code and raw body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn parse_json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body).context("response body is not valid JSON")
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The three remote calls a job needs.
///
/// `Err` always means the exchange itself failed (connect, timeout, body
/// read); any response that made it back is an `Ok(ApiReply)` whatever its
/// status.
pub trait TaskApi {
    fn create_task(&self, api_key: &str, payload: &Value) -> Result<ApiReply>;
    fn get_task(&self, api_key: &str, handle: &JobHandle) -> Result<ApiReply>;
    fn fetch_asset(&self, url: &str) -> Result<ApiReply>;
}

impl<T: TaskApi + ?Sized> TaskApi for &T {
    fn create_task(&self, api_key: &str, payload: &Value) -> Result<ApiReply> {
        (**self).create_task(api_key, payload)
    }

    fn get_task(&self, api_key: &str, handle: &JobHandle) -> Result<ApiReply> {
        (**self).get_task(api_key, handle)
    }

    fn fetch_asset(&self, url: &str) -> Result<ApiReply> {
        (**self).fetch_asset(url)
    }
}

pub struct DashscopeClient {
    api_base: String,
    request_timeout: Duration,
    http: HttpClient,
}

impl DashscopeClient {
    /// Client for `api_base`; status queries carry no per-call timeout.
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: normalize_api_base(&api_base.into()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http,
        })
    }

    /// Reads `DASHSCOPE_API_BASE`, falling back to the public endpoint.
    pub fn from_env() -> Result<Self> {
        let api_base =
            non_empty_env("DASHSCOPE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::new(api_base)
    }

    /// Timeout applied to submission and asset download.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn generation_endpoint(&self) -> String {
        format!("{}/services/aigc/anytext/generation", self.api_base)
    }

    pub fn task_endpoint(&self, handle: &JobHandle) -> String {
        format!("{}/tasks/{}", self.api_base, handle.as_str())
    }
}

impl TaskApi for DashscopeClient {
    fn create_task(&self, api_key: &str, payload: &Value) -> Result<ApiReply> {
        let endpoint = self.generation_endpoint();
        let response = self
            .http
            .post(&endpoint)
            .header(ASYNC_HEADER, "enable")
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .json(payload)
            .timeout(self.request_timeout)
            .send()
            .with_context(|| format!("AnyText submission failed ({endpoint})"))?;
        read_reply(response, "AnyText submission")
    }

    fn get_task(&self, api_key: &str, handle: &JobHandle) -> Result<ApiReply> {
        let endpoint = self.task_endpoint(handle);
        let response = self
            .http
            .get(&endpoint)
            .header(ASYNC_HEADER, "enable")
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .with_context(|| format!("AnyText task query failed ({endpoint})"))?;
        read_reply(response, "AnyText task query")
    }

    fn fetch_asset(&self, url: &str) -> Result<ApiReply> {
        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .with_context(|| format!("AnyText result download failed ({url})"))?;
        read_reply(response, "AnyText result download")
    }
}

fn read_reply(response: HttpResponse, label: &str) -> Result<ApiReply> {
    let status = response.status().as_u16();
    let body = response
        .bytes()
        .with_context(|| format!("{label} response body read failed"))?
        .to_vec();
    Ok(ApiReply { status, body })
}

fn normalize_api_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_API_BASE.to_string();
    }
    trimmed.to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
