//! Configuration structures for the invoice pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::catalog::Category;

/// Main configuration for the pricebook pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricebookConfig {
    /// Document rasterization configuration.
    pub raster: RasterConfig,

    /// Recognition chain configuration.
    pub recognition: RecognitionConfig,

    /// Pricing configuration.
    pub pricing: PricingConfig,

    /// Catalog matching configuration.
    pub matching: MatchingConfig,

    /// Vendor learning configuration.
    pub learning: LearningConfig,
}

/// Rasterizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Target density for rendered page frames, in DPI-equivalent.
    /// 200 keeps small invoice print OCR-legible.
    pub target_dpi: u32,

    /// Maximum pages to rasterize per document (0 = unlimited).
    pub max_pages: usize,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            target_dpi: 200,
            max_pages: 10,
        }
    }
}

/// Recognition chain configuration. The vision tier is enabled only when
/// an API key is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Vision extraction endpoint (OpenAI-style chat completions).
    pub vision_base_url: String,

    /// Vision model identifier.
    pub vision_model: String,

    /// Vision API key. `None` disables the vision tier entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_api_key: Option<String>,

    /// Timeout for the single all-pages vision call, in seconds.
    pub vision_timeout_secs: u64,

    /// OCR endpoint accepting one page image per request.
    pub ocr_base_url: String,

    /// Timeout per OCR page call, in seconds.
    pub ocr_timeout_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            vision_base_url: "http://localhost:11434/v1".to_string(),
            vision_model: "qwen2.5vl".to_string(),
            vision_api_key: None,
            vision_timeout_secs: 60,
            ocr_base_url: "http://localhost:8884".to_string(),
            ocr_timeout_secs: 30,
        }
    }
}

/// Pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// National GST rate applied to GST-applicable lines.
    pub gst_rate: Decimal,

    /// Global default markup multiplier.
    pub default_markup: Decimal,

    /// Global per-category markup table, consulted after any vendor
    /// default and before the global default.
    pub category_markups: HashMap<Category, Decimal>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let mut category_markups = HashMap::new();
        category_markups.insert(Category::Bakery, Decimal::new(180, 2));
        category_markups.insert(Category::Produce, Decimal::new(150, 2));
        category_markups.insert(Category::Beverages, Decimal::new(200, 2));
        category_markups.insert(Category::Frozen, Decimal::new(170, 2));

        Self {
            gst_rate: Decimal::new(10, 2),
            default_markup: Decimal::new(165, 2),
            category_markups,
        }
    }
}

/// Catalog matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum shared significant words for a fuzzy match.
    pub min_shared_words: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { min_shared_words: 2 }
    }
}

/// Vendor learning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Correction log entries retained per vendor; oldest evicted beyond
    /// this cap.
    pub correction_cap: usize,

    /// Minimum stored hint confidence before a learned value overrides a
    /// recognizer's guess.
    pub hint_confidence_threshold: f32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            correction_cap: 100,
            hint_confidence_threshold: 0.6,
        }
    }
}

impl PricebookConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }

    /// Whether the vision tier is configured.
    pub fn vision_enabled(&self) -> bool {
        self.recognition.vision_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PricebookConfig::default();
        assert_eq!(config.pricing.gst_rate, Decimal::new(10, 2));
        assert_eq!(config.pricing.default_markup, Decimal::new(165, 2));
        assert_eq!(config.learning.correction_cap, 100);
        assert!(!config.vision_enabled());
    }

    #[test]
    fn test_round_trip_json() {
        let config = PricebookConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PricebookConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.raster.target_dpi, 200);
        assert_eq!(back.matching.min_shared_words, 2);
    }
}
