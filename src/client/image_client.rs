use crate::{
    client::ImageGenerator,
    config::{ApiConfig, GenerationConfig, KioskConfig},
    error::{KioskError, Result},
    models::{PromptSpec, Txt2ImgPayload, Txt2ImgResponse},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::Instant;

const MAX_ERROR_BODY_CHARS: usize = 200;
const LARGE_PAYLOAD_CHARS: usize = 10_000_000;
/// A1111 picks a fresh seed for -1, so every request (and every remix) differs.
const RANDOM_SEED: i64 = -1;

/// Client for the AUTOMATIC1111 `sdapi` HTTP API.
#[derive(Clone)]
pub struct StableDiffusionClient {
    client: Client,
    api: ApiConfig,
    generation: GenerationConfig,
    timeout: Duration,
}

impl StableDiffusionClient {
    pub fn new(config: &KioskConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KioskError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            api: config.api.clone(),
            generation: config.generation.clone(),
            timeout: config.request_timeout,
        })
    }

    pub fn payload(&self, spec: &PromptSpec) -> Txt2ImgPayload {
        let generation = &self.generation;
        Txt2ImgPayload {
            prompt: spec.positive.clone(),
            negative_prompt: spec.negative.clone(),
            seed: RANDOM_SEED,
            steps: generation.steps,
            width: generation.width,
            height: generation.height,
            cfg_scale: generation.cfg_scale,
            sampler_name: generation.sampler.clone(),
            n_iter: generation.n_iter,
            batch_size: generation.batch_size,
            restore_faces: generation.restore_faces,
            tiling: generation.tiling,
            do_not_save_samples: true,
            do_not_save_grid: true,
        }
    }

    /// Current server options, as returned by `GET /sdapi/v1/options`.
    pub async fn api_info(&self) -> Result<serde_json::Value> {
        let response = self
            .authorized(self.client.get(self.api.options_url()))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| KioskError::DecodeError(e.to_string()))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api.username {
            Some(username) => builder.basic_auth(username, self.api.password.as_deref()),
            None => builder,
        }
    }

    async fn txt2img(&self, payload: &Txt2ImgPayload) -> Result<Vec<u8>> {
        log::debug!(
            "POST {} ({} steps, {}x{})",
            self.api.txt2img_url(),
            payload.steps,
            payload.width,
            payload.height
        );

        let response = self
            .authorized(self.client.post(self.api.txt2img_url()))
            .json(payload)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, &body);
            log::warn!("txt2img request failed with status {}", status);
            return Err(err);
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        decode_images(&body)
    }

    fn transport_error(&self, err: reqwest::Error) -> KioskError {
        if err.is_timeout() {
            KioskError::Timeout(self.timeout)
        } else if err.is_decode() {
            KioskError::DecodeError(err.to_string())
        } else {
            KioskError::NetworkError(err.to_string())
        }
    }
}

#[async_trait]
impl ImageGenerator for StableDiffusionClient {
    async fn generate(&self, spec: &PromptSpec, deadline: Instant) -> Result<Vec<u8>> {
        let payload = self.payload(spec);
        let budget = deadline.saturating_duration_since(Instant::now());

        match tokio::time::timeout_at(deadline, self.txt2img(&payload)).await {
            Ok(result) => result,
            Err(_) => Err(KioskError::Timeout(budget)),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match self.api_info().await {
            Ok(_) => Ok(true),
            Err(err @ KioskError::AuthError(_)) => Err(err),
            Err(err) => {
                log::warn!("API health check failed: {}", err);
                Ok(false)
            }
        }
    }
}

fn classify_status(status: StatusCode, body: &str) -> KioskError {
    let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("no body").to_string()
    } else {
        message
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => KioskError::AuthError(format!(
            "API refused credentials ({}): {}",
            status.as_u16(),
            message
        )),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => KioskError::ServerError {
            status: status.as_u16(),
            message,
        },
        s if s.is_server_error() => KioskError::ServerError {
            status: s.as_u16(),
            message,
        },
        s => KioskError::RequestRejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Extracts the representative (last) image from a txt2img response body.
pub(crate) fn decode_images(body: &[u8]) -> Result<Vec<u8>> {
    let response: Txt2ImgResponse = serde_json::from_slice(body)
        .map_err(|e| KioskError::DecodeError(format!("Malformed txt2img response: {}", e)))?;

    let encoded = response
        .images
        .last()
        .ok_or_else(|| KioskError::DecodeError("No images in response".into()))?;

    if encoded.len() > LARGE_PAYLOAD_CHARS {
        log::warn!("Base64 image payload is very large: {} characters", encoded.len());
    }

    // Some A1111 builds return a data URI instead of bare base64.
    let encoded = match encoded.strip_prefix("data:") {
        Some(uri) => uri.split_once(',').map(|(_, data)| data).unwrap_or(uri),
        None => encoded.as_str(),
    };

    let image = STANDARD
        .decode(encoded.trim())
        .map_err(|e| KioskError::DecodeError(format!("Invalid base64 image: {}", e)))?;

    if image.is_empty() {
        return Err(KioskError::DecodeError("Decoded image is empty".into()));
    }

    log::debug!("Decoded image: {} bytes", image.len());
    Ok(image)
}
