//! OCR-tier recognizer: one text-OCR call per page image.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RecognitionError;

/// One page's OCR output: recognized text plus the engine's mean
/// character confidence for the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrPage {
    pub text: String,
    pub confidence: f32,
}

/// Seam for the text-OCR engine. Untrusted, latent, and fallible.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Recognize text in a single page image.
    async fn recognize(&self, image: &[u8]) -> Result<OcrPage, RecognitionError>;
}

#[derive(Debug, Serialize)]
struct OcrRequest {
    image: String,
}

/// OCR client posting base64 page images to an HTTP engine.
pub struct HttpOcrClient {
    client: Client,
    base_url: String,
}

impl HttpOcrClient {
    /// Create a client for the given endpoint.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, image: &[u8]) -> Result<OcrPage, RecognitionError> {
        let request = OcrRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
        };

        let url = format!("{}/ocr", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RecognitionError::Transport {
                tier: "ocr",
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(RecognitionError::Transport {
                tier: "ocr",
                reason: format!("HTTP {}", response.status()),
            });
        }

        let page: OcrPage = response
            .json()
            .await
            .map_err(|e| RecognitionError::Malformed {
                tier: "ocr",
                reason: e.to_string(),
            })?;

        debug!(
            chars = page.text.len(),
            confidence = page.confidence,
            "OCR page recognized"
        );
        Ok(page)
    }
}
