use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::analyzer::NutrientDraft;

/// Nutrient record as stored and as sent to clients. Macros are per 100g.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NutritionalInfo {
    pub id: String,
    pub total_weight: f64, // grams
    pub calories: f64,     // kcal
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
    pub image_path: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl NutritionalInfo {
    pub fn from_draft(id: String, total_weight: f64, draft: NutrientDraft) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            total_weight,
            calories: draft.calories,
            protein: draft.protein,
            carbs: draft.carbs,
            fat: draft.fat,
            fiber: draft.fiber,
            sugar: draft.sugar,
            image_path: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Processing => "processing",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

/// A confirmed scan: the original image plus the final nutrient values.
#[derive(Debug, Clone)]
pub struct ConfirmedScan {
    pub id: String,
    pub image_data: Vec<u8>,
    pub status: ScanStatus,
    pub error: Option<String>,
    pub result: NutritionalInfo,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
