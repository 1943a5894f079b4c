use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jobs::{GenerationRequest, JobHandle};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskKind {
    /// Derived from the source image's alpha channel.
    Alpha,
    /// Fixed 64x64 zero buffer; the source carried no alpha.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultSummary {
    pub handle: JobHandle,
    pub result_url: String,
    pub asset_sha256: String,
    pub width: u32,
    pub height: u32,
    pub mask_kind: MaskKind,
    pub poll_attempts: u32,
}

pub fn build_receipt(
    request: &GenerationRequest,
    result: &JobResultSummary,
    artifacts: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );

    let mut request_block = Map::new();
    request_block.insert("payload".to_string(), sanitize_payload(&request.to_payload()));
    request_block.insert(
        "image_width".to_string(),
        Value::Number(request.image_width.into()),
    );
    request_block.insert(
        "image_height".to_string(),
        Value::Number(request.image_height.into()),
    );
    root.insert("request".to_string(), Value::Object(request_block));
    root.insert(
        "result".to_string(),
        sanitize_payload(&serde_json::to_value(result).unwrap_or(Value::Null)),
    );
    root.insert(
        "artifacts".to_string(),
        sanitize_payload(&Value::Object(artifacts.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "api_key" | "authorization") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
