//! Wire frames: the message envelope and its boundary validation.
//!
//! Every frame on the channel, inbound or outbound, is a JSON object
//! `{"type": string, "data"?: any, "message"?: string}`. Validation
//! happens once, in [`parse_frame`], before a frame can reach any
//! listener; anything that does not conform is a
//! [`ChannelError::Protocol`] and the frame is discarded by the caller.

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Sentinel message type that subscribes a listener to every frame.
pub const WILDCARD: &str = "*";

/// Control frame requesting enrollment in progress broadcasts.
pub const TYPE_SUBSCRIBE: &str = "subscribe";

/// Server acknowledgement of [`TYPE_SUBSCRIBE`], carrying the current
/// job snapshot.
pub const TYPE_SUBSCRIBED: &str = "subscribed";

/// Per-job progress broadcasts.
pub const TYPE_IMPORT_PROGRESS: &str = "import-progress";

/// A typed message frame.
///
/// Used in both directions: outbound frames are built with
/// [`Envelope::new`]/[`Envelope::with_data`] and serialized as-is;
/// inbound frames are produced by [`parse_frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type discriminator. Listeners are keyed by this value.
    #[serde(rename = "type")]
    pub message_type: String,

    /// Variant-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Optional human-readable text accompanying the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    /// Creates a payload-less frame of the given type.
    #[must_use]
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            data: None,
            message: None,
        }
    }

    /// Creates a frame of the given type carrying a serialized payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if the payload cannot
    /// be represented as a JSON value.
    pub fn with_data<T: Serialize>(
        message_type: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_type: message_type.into(),
            data: Some(serde_json::to_value(data)?),
            message: None,
        })
    }
}

/// Parses and validates a raw text frame.
///
/// The shape check is deliberately explicit rather than a plain serde
/// derive: a frame must be a JSON object with a string `type`; `data` is
/// passed through untouched; a non-string `message` is dropped rather
/// than failing the whole frame.
///
/// # Errors
///
/// Returns [`ChannelError::Protocol`] for invalid JSON, a non-object
/// frame, or a missing/non-string `type` field.
pub fn parse_frame(text: &str) -> Result<Envelope, ChannelError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ChannelError::Protocol(format!("invalid JSON frame: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(ChannelError::Protocol(
            "frame is not a JSON object".to_string(),
        ));
    };

    let Some(message_type) = object.get("type").and_then(serde_json::Value::as_str) else {
        return Err(ChannelError::Protocol(
            "frame is missing a string `type` field".to_string(),
        ));
    };

    Ok(Envelope {
        message_type: message_type.to_string(),
        data: object.get("data").cloned(),
        message: object
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_frame() {
        let Ok(envelope) = parse_frame(r#"{"type":"subscribed"}"#) else {
            panic!("expected a valid frame");
        };
        assert_eq!(envelope.message_type, "subscribed");
        assert!(envelope.data.is_none());
        assert!(envelope.message.is_none());
    }

    #[test]
    fn parse_frame_with_data_and_message() {
        let raw = r#"{"type":"import-progress","data":[{"jobId":"j1"}],"message":"ok"}"#;
        let Ok(envelope) = parse_frame(raw) else {
            panic!("expected a valid frame");
        };
        assert_eq!(envelope.message_type, "import-progress");
        assert!(envelope.data.as_ref().is_some_and(serde_json::Value::is_array));
        assert_eq!(envelope.message.as_deref(), Some("ok"));
    }

    #[test]
    fn non_string_message_is_dropped_not_fatal() {
        let Ok(envelope) = parse_frame(r#"{"type":"status","message":42}"#) else {
            panic!("expected a valid frame");
        };
        assert!(envelope.message.is_none());
    }

    #[test]
    fn missing_type_is_a_protocol_error() {
        let Err(err) = parse_frame(r#"{"data":{}}"#) else {
            panic!("expected a protocol error");
        };
        assert!(matches!(err, ChannelError::Protocol(_)));
    }

    #[test]
    fn non_string_type_is_a_protocol_error() {
        assert!(parse_frame(r#"{"type":42}"#).is_err());
    }

    #[test]
    fn non_object_frame_is_a_protocol_error() {
        assert!(parse_frame(r#"["type","subscribe"]"#).is_err());
        assert!(parse_frame(r#""subscribe""#).is_err());
    }

    #[test]
    fn invalid_json_is_a_protocol_error() {
        assert!(parse_frame("not json at all").is_err());
    }

    #[test]
    fn outbound_serialization_omits_empty_fields() {
        let json = serde_json::to_string(&Envelope::new(TYPE_SUBSCRIBE)).ok();
        assert_eq!(json.as_deref(), Some(r#"{"type":"subscribe"}"#));
    }

    #[test]
    fn with_data_round_trips() {
        let Ok(envelope) = Envelope::with_data("ack", &vec![1, 2, 3]) else {
            panic!("expected serializable payload");
        };
        let json = serde_json::to_string(&envelope).unwrap_or_default();
        let Ok(parsed) = parse_frame(&json) else {
            panic!("expected own output to parse");
        };
        assert_eq!(parsed, envelope);
    }
}
