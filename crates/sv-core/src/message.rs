//! Inbound client messages
//!
//! Every text frame a client sends is decoded exactly once, at the transport
//! boundary, into a [`ClientMessage`]. Downstream code matches on the variant
//! instead of probing JSON keys.

use crate::pose::{ClientPose, PoseError};

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// New head/camera pose: `{"position": {..}, "quaternion": {..}}`
    PoseUpdate(ClientPose),
    /// New camera projection: `{"fov": degrees, "aspect": ratio}`
    IntrinsicsUpdate(IntrinsicsUpdate),
    /// Anything carrying a `"type"` tag
    Control(ControlMessage),
}

/// Camera projection parameters requested by a client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntrinsicsUpdate {
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width / height
    pub aspect: f32,
}

impl IntrinsicsUpdate {
    /// Build from a field of view in degrees, validating both values
    pub fn from_degrees(fov_degrees: f32, aspect: f32) -> Result<Self, MessageError> {
        if !fov_degrees.is_finite() || fov_degrees <= 0.0 || fov_degrees >= 180.0 {
            return Err(MessageError::InvalidIntrinsics(format!(
                "fov must be in (0, 180) degrees, got {fov_degrees}"
            )));
        }
        if !aspect.is_finite() || aspect <= 0.0 {
            return Err(MessageError::InvalidIntrinsics(format!(
                "aspect must be positive, got {aspect}"
            )));
        }
        Ok(Self {
            fov_y: fov_degrees.to_radians(),
            aspect,
        })
    }
}

/// Session control messages
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Toggle dual-eye rendering for the sending session
    Stereo {
        enabled: bool,
        eye_separation: Option<f32>,
    },
    /// Unrecognised control type, ignored by the pipeline
    Other(String),
}

/// Message decoding errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error(transparent)]
    InvalidPose(#[from] PoseError),
    #[error("Invalid camera parameters: {0}")]
    InvalidIntrinsics(String),
}

impl ClientMessage {
    /// Decode a UTF-8 JSON text frame
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| MessageError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode a binary frame that carries JSON text
    pub fn decode_bytes(data: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(data).map_err(|e| MessageError::Malformed(e.to_string()))?;
        Self::decode(text)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, MessageError> {
        // Some clients JSON-encode the payload twice
        if let serde_json::Value::String(inner) = &value {
            return Self::decode(inner);
        }

        let Some(object) = value.as_object() else {
            return Err(MessageError::Malformed("expected a JSON object".into()));
        };

        if let Some(kind) = object.get("type") {
            let kind = kind
                .as_str()
                .ok_or_else(|| MessageError::Malformed("'type' must be a string".into()))?;
            return Ok(Self::Control(decode_control(kind, &value)?));
        }

        if object.contains_key("position") || object.contains_key("quaternion") {
            return Ok(Self::PoseUpdate(ClientPose::from_json(&value)?));
        }

        if object.contains_key("fov") || object.contains_key("aspect") {
            let fov = finite(&value, "fov")?;
            let aspect = finite(&value, "aspect")?;
            return Ok(Self::IntrinsicsUpdate(IntrinsicsUpdate::from_degrees(
                fov, aspect,
            )?));
        }

        Err(MessageError::Malformed("unrecognised message shape".into()))
    }
}

fn decode_control(kind: &str, value: &serde_json::Value) -> Result<ControlMessage, MessageError> {
    match kind {
        "stereo" => {
            let enabled = value
                .get("enabled")
                .and_then(serde_json::Value::as_bool)
                .ok_or_else(|| MessageError::Malformed("stereo requires 'enabled'".into()))?;
            let eye_separation = match value.get("eye_separation") {
                None | Some(serde_json::Value::Null) => None,
                Some(_) => {
                    let sep = finite(value, "eye_separation")?;
                    if sep < 0.0 {
                        return Err(MessageError::Malformed(
                            "eye_separation must be non-negative".into(),
                        ));
                    }
                    Some(sep)
                }
            };
            Ok(ControlMessage::Stereo {
                enabled,
                eye_separation,
            })
        }
        other => Ok(ControlMessage::Other(other.to_string())),
    }
}

fn finite(value: &serde_json::Value, key: &str) -> Result<f32, MessageError> {
    value
        .get(key)
        .and_then(serde_json::Value::as_f64)
        .map(|v| v as f32)
        .filter(|v| v.is_finite())
        .ok_or_else(|| MessageError::Malformed(format!("'{key}' must be a finite number")))
}
