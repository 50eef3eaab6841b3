//! Bounded-concurrency RPC client for the external descriptor-inference
//! service (§4.8). The service is an optional collaborator: when
//! `Config::ml_service_addr` is unset, `MlClient::disabled()` is used and
//! every call degrades to "no embeddings" rather than failing the asset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{AppError, AppResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DESCRIPTOR_INPUT_EDGE: u32 = 512;
const DESCRIPTOR_QUALITY: u8 = 80;

#[derive(Serialize)]
struct DescriptorRequest {
    image_base64: String,
    max_models: u32,
}

#[derive(Deserialize)]
struct DescriptorResponse {
    descriptors: HashMap<String, Vec<f32>>,
}

#[derive(Clone)]
pub struct MlClient {
    inner: Option<Arc<Inner>>,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    semaphore: Semaphore,
}

impl MlClient {
    pub fn new(base_url: Option<String>, concurrency: usize) -> Self {
        let inner = base_url.map(|base_url| {
            Arc::new(Inner {
                http: reqwest::Client::new(),
                base_url,
                semaphore: Semaphore::new(concurrency.max(1)),
            })
        });
        MlClient { inner }
    }

    pub fn disabled() -> Self {
        MlClient { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Requests descriptor vectors for `downscaled_jpeg`. Returns `Ok(None)`
    /// when the client is disabled; a request timeout surfaces as
    /// `AppError::Transient` so the caller's job handler can `retry`.
    pub async fn describe(&self, downscaled_jpeg: &[u8], max_models: u32) -> AppResult<Option<HashMap<String, Vec<f32>>>> {
        let Some(inner) = &self.inner else {
            return Ok(None);
        };

        let _permit = inner.semaphore.acquire().await.map_err(|e| AppError::Internal(e.to_string()))?;
        let body = DescriptorRequest {
            image_base64: base64_encode(downscaled_jpeg),
            max_models,
        };

        let request = inner.http.post(format!("{}/descriptors", inner.base_url)).json(&body).send();
        let response = tokio::time::timeout(REQUEST_TIMEOUT, request)
            .await
            .map_err(|_| AppError::Transient("ML service request timed out".to_string()))?
            .map_err(|e| AppError::Transient(format!("ML service request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Transient(format!("ML service returned {}", response.status())));
        }

        let parsed: DescriptorResponse = response
            .json()
            .await
            .map_err(|e| AppError::Transient(format!("ML service response decode failed: {e}")))?;
        Ok(Some(parsed.descriptors))
    }

    pub fn max_descriptor_input_edge(&self) -> u32 {
        MAX_DESCRIPTOR_INPUT_EDGE
    }

    pub fn descriptor_quality(&self) -> u8 {
        DESCRIPTOR_QUALITY
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
    for chunk in bytes.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32);
        let indices = [(n >> 18) & 0x3F, (n >> 12) & 0x3F, (n >> 6) & 0x3F, n & 0x3F];
        for (i, &idx) in indices.iter().enumerate() {
            if i <= chunk.len() {
                let _ = write!(out, "{}", ALPHABET[idx as usize] as char);
            }
        }
        for _ in 0..(3 - chunk.len()) {
            out.push('=');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_returns_none_without_network() {
        let client = MlClient::disabled();
        assert!(!client.is_enabled());
        let result = client.describe(b"ignored", 4).await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn base64_encode_matches_known_vector() {
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
    }
}
