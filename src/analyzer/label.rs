//! Parsing of the model's answer to the label prompt.

use serde::Deserialize;
use serde_json::Value;

use super::{AnalyzeError, NutrientDraft};

pub(super) const LABEL_PROMPT: &str = r#"Analyze this nutritional label image and extract the values per 100g in a structured format:
- Calories
- Protein
- Carbohydrates
- Fat
- Fiber
- Sugar

Format the response as a JSON object with exactly one of "error" or "success" populated.
Not all values can be zero. If most values are zero, raise an error explaining what went wrong.
{
    "error": {
        "error_reason": "string",
        "suggestion_for_better_results": "string"
    },
    "success": {
        "calories": number,
        "protein": number,
        "carbs": number,
        "fat": number,
        "fiber": number,
        "sugar": number
    }
}"#;

const REQUIRED_FIELDS: [&str; 4] = ["calories", "protein", "carbs", "fat"];

#[derive(Debug, Default, Deserialize)]
struct LabelFailure {
    #[serde(default)]
    error_reason: String,
    #[serde(default)]
    suggestion_for_better_results: String,
}

#[derive(Debug, Deserialize)]
struct LabelSuccess {
    calories: f64,
    protein: f64,
    carbs: f64,
    fat: f64,
    #[serde(default)]
    fiber: f64,
    #[serde(default)]
    sugar: f64,
}

/// Models like to wrap JSON in a ```json fence.
fn strip_fence(text: &str) -> &str {
    let t = text.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

pub(super) fn parse_label_response(text: &str) -> Result<NutrientDraft, AnalyzeError> {
    let body = strip_fence(text);
    let raw: Value = serde_json::from_str(body)
        .map_err(|e| AnalyzeError::MalformedResponse(format!("{e} while parsing {body}")))?;

    if let Some(err) = raw.get("error").filter(|v| !v.is_null()) {
        let failure: LabelFailure = serde_json::from_value(err.clone()).unwrap_or_default();
        if !failure.error_reason.is_empty() {
            return Err(AnalyzeError::Rejected {
                reason: failure.error_reason,
                suggestion: failure.suggestion_for_better_results,
            });
        }
    }

    let success = raw
        .get("success")
        .filter(|v| v.is_object())
        .ok_or_else(|| {
            AnalyzeError::MalformedResponse("missing or invalid success object".into())
        })?;
    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| success.get(**f).is_none()) {
        return Err(AnalyzeError::MalformedResponse(format!(
            "missing required field '{missing}'"
        )));
    }

    let s: LabelSuccess = serde_json::from_value(success.clone())
        .map_err(|e| AnalyzeError::MalformedResponse(e.to_string()))?;
    let draft = NutrientDraft {
        calories: s.calories,
        protein: s.protein,
        carbs: s.carbs,
        fat: s.fat,
        fiber: s.fiber,
        sugar: s.sugar,
    };

    if !draft.is_well_formed() {
        return Err(AnalyzeError::MalformedResponse(
            "negative or non-finite nutrient value".into(),
        ));
    }
    if draft.is_degenerate() {
        return Err(AnalyzeError::Degenerate);
    }
    Ok(draft)
}
