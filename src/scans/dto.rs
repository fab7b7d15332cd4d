use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::history::HistorySummary;
use super::repo_types::NutritionalInfo;

pub const PROTOCOL_VERSION: u64 = 1;

/// Weight assumed when a confirm omits `total_weight`.
const DEFAULT_TOTAL_WEIGHT: f64 = 100.0;

/// A validation failure at the message boundary. `Display` is the text sent
/// back to the client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    InvalidEnvelope,
    #[error("Unsupported protocol version")]
    UnsupportedVersion,
    #[error("Unknown message type")]
    UnknownType(String),
    #[error("Invalid image data")]
    InvalidImage,
    #[error("Invalid weight value")]
    InvalidWeight,
    #[error("Invalid image format")]
    ImageEncoding,
    #[error("Missing nutrition info ID")]
    MissingId,
    #[error("Invalid nutrition info ID format")]
    InvalidId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub image: Bytes,
    pub total_weight: f64,
}

/// Client-confirmed values. Missing or non-numeric fields were already
/// replaced with defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmScanRequest {
    pub id: String,
    pub total_weight: f64,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
    pub sugar: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Scan(ScanRequest),
    ConfirmScan(ConfirmScanRequest),
    GetHistory,
}

impl ClientMessage {
    /// Parses and validates one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: Value = serde_json::from_str(text).map_err(|_| ProtocolError::InvalidEnvelope)?;
        let envelope = raw.as_object().ok_or(ProtocolError::InvalidEnvelope)?;

        if let Some(version) = envelope.get("version").filter(|v| !v.is_null()) {
            if version.as_u64() != Some(PROTOCOL_VERSION) {
                return Err(ProtocolError::UnsupportedVersion);
            }
        }

        let kind = envelope
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::InvalidEnvelope)?;
        let data = envelope.get("data").filter(|d| d.is_object());

        match kind {
            "scan" => ScanRequest::from_data(data).map(Self::Scan),
            "confirm_scan" => ConfirmScanRequest::from_data(data).map(Self::ConfirmScan),
            "get_history" => Ok(Self::GetHistory),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

impl ScanRequest {
    fn from_data(data: Option<&Value>) -> Result<Self, ProtocolError> {
        let field = |name: &str| data.and_then(|d| d.get(name));

        let image = field("image")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::InvalidImage)?;
        let total_weight = field("totalWeight")
            .and_then(Value::as_f64)
            .filter(|w| w.is_finite() && *w >= 0.0)
            .ok_or(ProtocolError::InvalidWeight)?;

        let image = STANDARD
            .decode(image)
            .map_err(|_| ProtocolError::ImageEncoding)?;
        if image.is_empty() {
            return Err(ProtocolError::InvalidImage);
        }

        Ok(Self {
            image: Bytes::from(image),
            total_weight,
        })
    }
}

fn lenient_number<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(d)?.as_f64())
}

#[derive(Debug, Default, Deserialize)]
struct ConfirmFields {
    #[serde(default, deserialize_with = "lenient_number")]
    total_weight: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    calories: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    protein: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    carbs: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    fat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    fiber: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    sugar: Option<f64>,
}

impl ConfirmScanRequest {
    fn from_data(data: Option<&Value>) -> Result<Self, ProtocolError> {
        let data = data.ok_or(ProtocolError::MissingId)?;
        let id = match data.get("id") {
            None | Some(Value::Null) => return Err(ProtocolError::MissingId),
            Some(Value::String(id)) => id.clone(),
            Some(_) => return Err(ProtocolError::InvalidId),
        };

        let f = ConfirmFields::deserialize(data).unwrap_or_default();
        Ok(Self {
            id,
            total_weight: f.total_weight.unwrap_or(DEFAULT_TOTAL_WEIGHT),
            calories: f.calories.unwrap_or_default(),
            protein: f.protein.unwrap_or_default(),
            carbs: f.carbs.unwrap_or_default(),
            fat: f.fat.unwrap_or_default(),
            fiber: f.fiber.unwrap_or_default(),
            sugar: f.sugar.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ScanResult { data: NutritionalInfo },
    ScanSaved { data: () },
    History { data: HistorySummary },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Outbound frame: the message plus protocol version and per-connection
/// sequence number.
#[derive(Debug, Serialize)]
pub struct Outbound<'a> {
    pub version: u64,
    pub seq: u64,
    #[serde(flatten)]
    pub message: &'a ServerMessage,
}

impl<'a> Outbound<'a> {
    pub fn new(seq: u64, message: &'a ServerMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            seq,
            message,
        }
    }
}

#[cfg(test)]
mod dto_tests {
    use super::*;
    use serde_json::json;

    fn parse(v: Value) -> Result<ClientMessage, ProtocolError> {
        ClientMessage::parse(&v.to_string())
    }

    #[test]
    fn scan_decodes_image() {
        let msg = parse(json!({"type": "scan", "data": {"image": "aGVsbG8=", "totalWeight": 250}}));
        assert_eq!(
            msg,
            Ok(ClientMessage::Scan(ScanRequest {
                image: Bytes::from_static(b"hello"),
                total_weight: 250.0,
            }))
        );
    }

    #[test]
    fn scan_field_errors() {
        assert_eq!(
            parse(json!({"type": "scan", "data": {"totalWeight": 1}})),
            Err(ProtocolError::InvalidImage)
        );
        assert_eq!(
            parse(json!({"type": "scan", "data": {"image": "aGVsbG8=", "totalWeight": "1"}})),
            Err(ProtocolError::InvalidWeight)
        );
        assert_eq!(
            parse(json!({"type": "scan", "data": {"image": "aGVsbG8=", "totalWeight": -3}})),
            Err(ProtocolError::InvalidWeight)
        );
        assert_eq!(
            parse(json!({"type": "scan", "data": {"image": "not base64!", "totalWeight": 1}})),
            Err(ProtocolError::ImageEncoding)
        );
        assert_eq!(
            parse(json!({"type": "scan", "data": {"image": "", "totalWeight": 1}})),
            Err(ProtocolError::InvalidImage)
        );
        assert_eq!(parse(json!({"type": "scan"})), Err(ProtocolError::InvalidImage));
    }

    #[test]
    fn confirm_defaults_bad_fields() {
        let msg = parse(json!({"type": "confirm_scan", "data": {
            "id": "abc", "calories": "lots", "protein": 3.5, "fat": null
        }}))
        .unwrap();
        let ClientMessage::ConfirmScan(req) = msg else {
            panic!("expected confirm_scan");
        };
        assert_eq!(req.id, "abc");
        assert_eq!(req.total_weight, 100.0);
        assert_eq!(req.calories, 0.0);
        assert_eq!(req.protein, 3.5);
        assert_eq!(req.fat, 0.0);
        assert_eq!(req.sugar, 0.0);
    }

    #[test]
    fn confirm_id_errors() {
        assert_eq!(
            parse(json!({"type": "confirm_scan", "data": {}})),
            Err(ProtocolError::MissingId)
        );
        assert_eq!(
            parse(json!({"type": "confirm_scan", "data": {"id": 7}})),
            Err(ProtocolError::InvalidId)
        );
        assert_eq!(parse(json!({"type": "confirm_scan"})), Err(ProtocolError::MissingId));
    }

    #[test]
    fn envelope_errors() {
        assert_eq!(ClientMessage::parse("{"), Err(ProtocolError::InvalidEnvelope));
        assert_eq!(parse(json!([1, 2])), Err(ProtocolError::InvalidEnvelope));
        assert_eq!(parse(json!({"type": 5})), Err(ProtocolError::InvalidEnvelope));
        assert_eq!(
            parse(json!({"type": "ping"})),
            Err(ProtocolError::UnknownType("ping".into()))
        );
        assert_eq!(
            ProtocolError::UnknownType("ping".into()).to_string(),
            "Unknown message type"
        );
    }

    #[test]
    fn version_is_checked_when_present() {
        assert_eq!(
            parse(json!({"type": "get_history", "version": 1})),
            Ok(ClientMessage::GetHistory)
        );
        assert_eq!(
            parse(json!({"type": "get_history", "version": 2})),
            Err(ProtocolError::UnsupportedVersion)
        );
    }

    #[test]
    fn outbound_wire_shape() {
        let saved = serde_json::to_value(Outbound::new(3, &ServerMessage::ScanSaved { data: () })).unwrap();
        assert_eq!(saved, json!({"version": 1, "seq": 3, "type": "scan_saved", "data": null}));

        let err = serde_json::to_value(Outbound::new(4, &ServerMessage::error("nope"))).unwrap();
        assert_eq!(err, json!({"version": 1, "seq": 4, "type": "error", "message": "nope"}));
        assert!(err.get("data").is_none());
    }
}
