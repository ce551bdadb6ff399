use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::PromptSpec;

/// One dispatched generation. `id` is the preemption key: only the highest id
/// issued so far may write to the display.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub id: u64,
    pub spec: PromptSpec,
    pub submitted_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(id: u64, spec: PromptSpec) -> Self {
        Self {
            id,
            spec,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credentials refused. Halts dispatch until the fault is cleared.
    Auth,
    Timeout,
    Network,
    /// 5xx, 408 or 429.
    Server,
    /// Undecodable image payload.
    Decode,
    /// Any other non-success status; the same request would fail again.
    Rejected,
    Internal,
}

impl FailureKind {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailureKind::Auth)
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::Network | FailureKind::Server | FailureKind::Decode
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::Server => "server",
            FailureKind::Decode => "decode",
            FailureKind::Rejected => "rejected",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Success { image: Vec<u8>, spec: PromptSpec },
    Failure { kind: FailureKind, detail: String },
}

/// Body of `POST /sdapi/v1/txt2img`.
#[derive(Debug, Clone, Serialize)]
pub struct Txt2ImgPayload {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: i64,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub cfg_scale: f32,
    pub sampler_name: String,
    pub n_iter: u32,
    pub batch_size: u32,
    pub restore_faces: bool,
    pub tiling: bool,
    pub do_not_save_samples: bool,
    pub do_not_save_grid: bool,
}

#[derive(Debug, Deserialize)]
pub struct Txt2ImgResponse {
    #[serde(default)]
    pub images: Vec<String>,
}
