// Copyright (c) 2025, The Metapipe Authors
// MIT License
// All rights reserved.

//! # Typed Messages and the Wire Codec
//!
//! The pipeline moves JSON documents describing video metadata. This module
//! declares the typed messages exchanged between services and the codec that
//! maps them to and from wire payloads. A payload that does not match the
//! declared schema produces [`AmqpError::DecodeError`], which the delivery
//! loop routes through the same retry/DLQ path as a handler failure.

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Company that owns a video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Company {
    pub id: i64,
    pub name: String,
}

/// One action recognized in a video clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionRecognition {
    pub frame_num: i64,
    pub timestamp: String,
    pub action: String,
    pub confidence: f64,
    pub clip_length: i64,
}

/// Metadata record for a single video. The `video_id` field is the key the
/// resolver matches against when deciding where to forward a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoMetadata {
    pub video_id: String,
    pub timestamp: String,
    pub company: Company,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Metadata record enriched with recognized actions, consumed by the
/// ingest side of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoMetadataWithActions {
    pub video_id: String,
    pub timestamp: String,
    pub company: Company,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
    #[serde(default)]
    pub actions: Vec<ActionRecognition>,
}

/// Identity a message carries into log events, so drop/forward outcomes can
/// be traced back to the video they concern.
pub trait MessageId {
    fn message_id(&self) -> &str;
}

impl MessageId for VideoMetadata {
    fn message_id(&self) -> &str {
        &self.video_id
    }
}

impl MessageId for VideoMetadataWithActions {
    fn message_id(&self) -> &str {
        &self.video_id
    }
}

/// Decodes a wire payload into a typed message.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, AmqpError> {
    serde_json::from_slice(payload).map_err(|err| AmqpError::DecodeError(err.to_string()))
}

/// Encodes a typed message into a wire payload.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, AmqpError> {
    serde_json::to_vec(message).map_err(|err| AmqpError::DecodeError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "video_id": "v1",
            "timestamp": "2025-06-01T10:00:00Z",
            "company": { "id": 7, "name": "acme" },
            "extra": { "source": "camera-3" }
        }"#
    }

    #[test]
    fn decodes_video_metadata() {
        let msg: VideoMetadata = decode(sample_json().as_bytes()).unwrap();
        assert_eq!(msg.video_id, "v1");
        assert_eq!(msg.company.id, 7);
        assert_eq!(msg.extra["source"], Value::from("camera-3"));
    }

    #[test]
    fn message_id_is_the_video_id() {
        let msg: VideoMetadata = decode(sample_json().as_bytes()).unwrap();
        assert_eq!(msg.message_id(), "v1");
    }

    #[test]
    fn decode_failure_is_a_decode_error() {
        let err = decode::<VideoMetadata>(b"not json").unwrap_err();
        assert!(matches!(err, AmqpError::DecodeError(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"{
            "video_id": "v1",
            "timestamp": "2025-06-01T10:00:00Z",
            "company": { "id": 7, "name": "acme" },
            "surprise": true
        }"#;
        let err = decode::<VideoMetadata>(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, AmqpError::DecodeError(_)));
    }

    #[test]
    fn missing_extra_defaults_to_empty() {
        let raw = r#"{
            "video_id": "v1",
            "timestamp": "2025-06-01T10:00:00Z",
            "company": { "id": 7, "name": "acme" }
        }"#;
        let msg: VideoMetadata = decode(raw.as_bytes()).unwrap();
        assert!(msg.extra.is_empty());
    }

    #[test]
    fn encoded_message_decodes_back() {
        let msg: VideoMetadataWithActions = decode(
            r#"{
                "video_id": "v2",
                "timestamp": "2025-06-01T11:00:00Z",
                "company": { "id": 1, "name": "acme" },
                "actions": [
                    {
                        "frame_num": 10,
                        "timestamp": "00:00:02",
                        "action": "wave",
                        "confidence": 0.92,
                        "clip_length": 48
                    }
                ]
            }"#
            .as_bytes(),
        )
        .unwrap();

        let bytes = encode(&msg).unwrap();
        let back: VideoMetadataWithActions = decode(&bytes).unwrap();
        assert_eq!(back, msg);
    }
}
