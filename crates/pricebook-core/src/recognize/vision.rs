//! Vision-tier recognizer: one chat-completions call carrying every page.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RecognitionError;
use crate::raster::PageFrame;

/// Instruction prompt sent alongside the page images. The model must
/// answer with a single JSON object matching [`VisionInvoice`].
pub const VISION_INSTRUCTIONS: &str = r#"You are an invoice data extraction assistant for a retail food business.
You are given every page of one supplier invoice as images. Extract structured data and return ONLY valid JSON.

The JSON must match this schema exactly:
{
  "invoice_number": "string or null",
  "invoice_date": "string or null (as printed)",
  "subtotal_ex_gst": number or null,
  "gst_total": number or null,
  "total": number or null,
  "items": [
    {
      "description": "string (as printed, including any item code)",
      "quantity": number,
      "pack_size": number or null (units inside one invoiced line, e.g. 2 x 5kg -> 5),
      "unit_cost": number (ex-GST cost for one invoiced line),
      "category": "string or null (e.g. Bakery, Dairy, Produce, Meat, Seafood, Frozen, Beverages, Groceries, Cleaning, Packaging)",
      "gst_applicable": boolean or null (false only when the line is marked GST-free),
      "confidence": number between 0 and 1
    }
  ]
}

Notes:
- Use null for anything you cannot determine.
- Do not invent line items; an empty items array is a valid answer.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Structured result the vision tier reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisionInvoice {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub subtotal_ex_gst: Option<Decimal>,
    pub gst_total: Option<Decimal>,
    pub total: Option<Decimal>,
    #[serde(default)]
    pub items: Vec<VisionItem>,
}

/// One line item as the vision tier reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionItem {
    pub description: String,
    pub quantity: Option<Decimal>,
    pub pack_size: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    pub category: Option<String>,
    pub gst_applicable: Option<bool>,
    pub confidence: Option<f32>,
}

/// Seam for the vision-capable extraction call. Untrusted, latent, and
/// fallible; the chain treats any error as a permanent demotion to OCR.
#[async_trait]
pub trait VisionClient: Send + Sync {
    /// Submit all page images plus the instruction prompt in one call.
    async fn extract(
        &self,
        pages: &[PageFrame],
        instructions: &str,
    ) -> Result<VisionInvoice, RecognitionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Vision client speaking the OpenAI-style chat-completions protocol.
pub struct HttpVisionClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpVisionClient {
    /// Create a client for the given endpoint.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl VisionClient for HttpVisionClient {
    async fn extract(
        &self,
        pages: &[PageFrame],
        instructions: &str,
    ) -> Result<VisionInvoice, RecognitionError> {
        let mut content = vec![ContentPart::Text {
            text: "Extract invoice data from the attached pages.".to_string(),
        }];
        for frame in pages {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&frame.data);
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/{};base64,{encoded}", frame.format),
                },
            });
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: vec![ContentPart::Text {
                        text: instructions.to_string(),
                    }],
                },
                ChatMessage {
                    role: "user",
                    content,
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| RecognitionError::Transport {
                tier: "vision",
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionError::Transport {
                tier: "vision",
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let chat: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| RecognitionError::Malformed {
                    tier: "vision",
                    reason: e.to_string(),
                })?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or(RecognitionError::Malformed {
                tier: "vision",
                reason: "empty choices".to_string(),
            })?;

        let json = extract_json_object(strip_fences(content)).ok_or_else(|| {
            RecognitionError::Malformed {
                tier: "vision",
                reason: "no JSON object in response".to_string(),
            }
        })?;

        let invoice: VisionInvoice =
            serde_json::from_str(json).map_err(|e| RecognitionError::Malformed {
                tier: "vision",
                reason: e.to_string(),
            })?;

        debug!(items = invoice.items.len(), "vision tier response parsed");
        Ok(invoice)
    }
}

/// Strip markdown fences the model may add despite instructions.
fn strip_fences(s: &str) -> &str {
    s.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Bracket the outermost JSON object in a string that may carry
/// surrounding commentary or reasoning tokens.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_extract_json_object() {
        assert_eq!(
            extract_json_object("thinking... {\"items\": []} done"),
            Some("{\"items\": []}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn test_vision_invoice_parses_partial_payload() {
        let json = r#"{"invoice_number": "INV-100", "items": [
            {"description": "Milk 2L", "quantity": 6, "unit_cost": 2.10, "confidence": 0.92,
             "pack_size": null, "category": "Dairy", "gst_applicable": false}
        ]}"#;
        let invoice: VisionInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-100"));
        assert_eq!(invoice.items.len(), 1);
        assert_eq!(invoice.items[0].gst_applicable, Some(false));
        assert!(invoice.total.is_none());
    }
}
