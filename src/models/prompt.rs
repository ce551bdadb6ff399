use serde::{Deserialize, Serialize};

/// Fully assembled prompt text sent to the txt2img endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub positive: String,
    pub negative: String,
}
