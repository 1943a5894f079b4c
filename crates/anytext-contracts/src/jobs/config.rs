use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const STEPS_RANGE: (u32, u32) = (1, 100);
pub const SEED_RANGE: (i64, i64) = (-1, 99_999_999);
pub const IMAGE_DIM_RANGE: (u32, u32) = (64, 7000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutPriority {
    #[default]
    Vertical,
    Horizontal,
}

impl LayoutPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vertical => "vertical",
            Self::Horizontal => "horizontal",
        }
    }
}

impl fmt::Display for LayoutPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutPriority {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vertical" => Ok(Self::Vertical),
            "horizontal" => Ok(Self::Horizontal),
            other => Err(format!(
                "Unknown layout priority '{other}'; expected 'vertical' or 'horizontal'."
            )),
        }
    }
}

/// Configuration record handed over by the host for one invocation.
///
/// Every key is optional when deserializing; missing keys take the same
/// defaults the host form shows.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub prompt: String,
    pub mask_image_url: String,
    pub base_image_url: String,
    pub appended_prompt: String,
    pub negative_prompt: String,
    pub layout_priority: LayoutPriority,
    pub steps: u32,
    pub seed: i64,
    pub api_key: String,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            mask_image_url: String::new(),
            base_image_url: String::new(),
            appended_prompt: String::new(),
            negative_prompt: String::new(),
            layout_priority: LayoutPriority::Vertical,
            steps: 20,
            seed: -1,
            api_key: String::new(),
            image_width: 512,
            image_height: 512,
        }
    }
}

// Hand-written so the key never lands in logs through `{:?}`.
impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("prompt", &self.prompt)
            .field("mask_image_url", &self.mask_image_url)
            .field("base_image_url", &self.base_image_url)
            .field("appended_prompt", &self.appended_prompt)
            .field("negative_prompt", &self.negative_prompt)
            .field("layout_priority", &self.layout_priority)
            .field("steps", &self.steps)
            .field("seed", &self.seed)
            .field("api_key", &"<omitted>")
            .field("image_width", &self.image_width)
            .field("image_height", &self.image_height)
            .finish()
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("API key is empty.".to_string());
        }
        check_range("steps", i64::from(self.steps), STEPS_RANGE.0.into(), STEPS_RANGE.1.into())?;
        check_range("seed", self.seed, SEED_RANGE.0, SEED_RANGE.1)?;
        check_range(
            "image_width",
            i64::from(self.image_width),
            IMAGE_DIM_RANGE.0.into(),
            IMAGE_DIM_RANGE.1.into(),
        )?;
        check_range(
            "image_height",
            i64::from(self.image_height),
            IMAGE_DIM_RANGE.0.into(),
            IMAGE_DIM_RANGE.1.into(),
        )?;
        Ok(())
    }
}

fn check_range(field: &str, value: i64, min: i64, max: i64) -> Result<(), String> {
    if value < min || value > max {
        return Err(format!(
            "{field} must be within {min}..={max} (got {value})."
        ));
    }
    Ok(())
}
