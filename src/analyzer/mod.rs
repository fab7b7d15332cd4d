use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{AnalyzerConfig, AnalyzerKind};

mod gemini;
mod label;

pub use gemini::GeminiAnalyzer;

/// Values below this are treated as zero when judging a draft degenerate.
const NEAR_ZERO: f64 = 0.01;

/// Per-100g nutrient values extracted from a label photo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutrientDraft {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
}

impl NutrientDraft {
    fn values(&self) -> [f64; 6] {
        [
            self.calories,
            self.protein,
            self.carbs,
            self.fat,
            self.fiber,
            self.sugar,
        ]
    }

    pub fn is_degenerate(&self) -> bool {
        self.values().iter().all(|v| v.abs() < NEAR_ZERO)
    }

    pub fn is_well_formed(&self) -> bool {
        self.values().iter().all(|v| v.is_finite() && *v >= 0.0)
    }
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("label rejected: {reason}; suggestion: {suggestion}")]
    Rejected { reason: String, suggestion: String },

    #[error("no plausible nutrient values in label")]
    Degenerate,

    #[error("malformed analyzer response: {0}")]
    MalformedResponse(String),

    #[error("analyzer request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("analyzer unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, image: &[u8]) -> Result<NutrientDraft, AnalyzeError>;
}

/// Stand-in used when no recognition backend is configured.
pub struct DisabledAnalyzer;

#[async_trait]
impl Analyzer for DisabledAnalyzer {
    async fn analyze(&self, _image: &[u8]) -> Result<NutrientDraft, AnalyzeError> {
        Err(AnalyzeError::Unavailable(
            "no image analyzer configured".into(),
        ))
    }
}

pub fn from_config(cfg: &AnalyzerConfig) -> anyhow::Result<Arc<dyn Analyzer>> {
    let analyzer: Arc<dyn Analyzer> = match cfg.kind {
        AnalyzerKind::Gemini => Arc::new(GeminiAnalyzer::new(cfg)?),
        AnalyzerKind::Disabled => {
            tracing::warn!("image analyzer disabled; every scan will fail");
            Arc::new(DisabledAnalyzer)
        }
    };
    Ok(analyzer)
}
