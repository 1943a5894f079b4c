use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::{JobConfig, LayoutPriority};

pub const ANYTEXT_MODEL: &str = "wanx-anytext-v1";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerationInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appended_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub layout_priority: LayoutPriority,
    pub steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

/// One generation request, built once per invocation and never mutated.
///
/// Empty text fields and a zero seed are dropped while building, so the wire
/// payload only carries keys the caller actually set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub input: GenerationInput,
    pub parameters: GenerationParameters,
    #[serde(skip)]
    pub image_width: u32,
    #[serde(skip)]
    pub image_height: u32,
}

impl GenerationRequest {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            model: ANYTEXT_MODEL.to_string(),
            input: GenerationInput {
                prompt: non_empty(&config.prompt),
                base_image_url: non_empty(&config.base_image_url),
                mask_image_url: non_empty(&config.mask_image_url),
                appended_prompt: non_empty(&config.appended_prompt),
                negative_prompt: non_empty(&config.negative_prompt),
            },
            parameters: GenerationParameters {
                layout_priority: config.layout_priority,
                steps: config.steps,
                seed: (config.seed != 0).then_some(config.seed),
            },
            image_width: config.image_width,
            image_height: config.image_height,
        }
    }

    /// Request body for the generation endpoint.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn non_empty(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
