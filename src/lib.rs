pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod logger;
pub mod models;
pub mod prompt;

pub use client::{ImageGenerator, StableDiffusionClient};
pub use config::{
    ApiConfig, Emphasis, FieldMapping, GenerationConfig, KioskConfig, PromptConfig, RetryConfig,
};
pub use controller::{ControllerHandle, RequestController};
pub use error::{KioskError, Result};
pub use models::{
    Category, DisplayError, DisplayImage, DisplayState, DisplayStatus, FailureKind, FormSelection,
    GenerationRequest, GenerationResult, PromptSpec, UNSET_MARKER,
};
pub use prompt::PromptBuilder;
