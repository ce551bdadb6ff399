use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Idle,
    Generating,
    Ready,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayImage {
    Placeholder,
    Generated(Arc<[u8]>),
}

impl DisplayImage {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, DisplayImage::Placeholder)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            DisplayImage::Placeholder => None,
            DisplayImage::Generated(bytes) => Some(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayError {
    pub kind: FailureKind,
    pub detail: String,
}

/// What the kiosk screen renders. Only the request controller writes it.
#[derive(Debug, Clone)]
pub struct DisplayState {
    pub image: DisplayImage,
    pub prompt_text: String,
    pub status: DisplayStatus,
    /// Request that produced `image`; `None` while the placeholder is shown.
    pub request_id: Option<u64>,
    pub last_error: Option<DisplayError>,
    /// Set while an authentication fault blocks new requests.
    pub suspended: bool,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl DisplayState {
    pub fn placeholder(prompt_text: impl Into<String>) -> Self {
        Self {
            image: DisplayImage::Placeholder,
            prompt_text: prompt_text.into(),
            status: DisplayStatus::Idle,
            request_id: None,
            last_error: None,
            suspended: false,
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }
}
