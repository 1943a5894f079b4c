mod config;
mod request;
mod task;

pub use config::{JobConfig, LayoutPriority, IMAGE_DIM_RANGE, SEED_RANGE, STEPS_RANGE};
pub use request::{GenerationInput, GenerationParameters, GenerationRequest, ANYTEXT_MODEL};
pub use task::{parse_submit_response, parse_task_response, JobHandle, JobStatus};
