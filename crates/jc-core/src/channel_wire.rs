use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

pub const NAMESPACE_STATS: &str = "stats";
pub const NAMESPACE_LEADS: &str = "leads";

pub const EVENT_INITIAL_STATS: &str = "initial_stats";
pub const EVENT_STATS_UPDATE: &str = "stats_update";
pub const EVENT_NEW_LEAD: &str = "new_lead";

/// One push-channel message. The server also broadcasts `{"type": .., "data": ..}`,
/// so `type` is accepted as the event name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelFrame {
    #[serde(alias = "type")]
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ChannelFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(normalize_namespace(namespace));
        self
    }

    /// Frames without a namespace tag belong to whichever connection received them.
    pub fn belongs_to(&self, namespace: &str) -> bool {
        match self.namespace.as_deref() {
            Some(tagged) => normalize_namespace(tagged) == normalize_namespace(namespace),
            None => true,
        }
    }
}

pub fn normalize_namespace(namespace: &str) -> String {
    namespace.trim().trim_matches('/').to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame(frame: &ChannelFrame, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded = serde_json::to_string(frame).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame(text: &str, max_frame_bytes: usize) -> Result<ChannelFrame, FrameError> {
    let raw = text.trim_end_matches(['\n', '\r']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_event_frames_sent_by_the_stats_socket() {
        let frame = decode_frame(
            r#"{"event":"initial_stats","data":{"openPositions":342,"successfulPlacements":1247,"consultationsPerMonth":856,"courses":67}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        assert_eq!(frame.event, EVENT_INITIAL_STATS);
        assert_eq!(frame.data["openPositions"], 342);
        assert_eq!(frame.namespace, None);
    }

    #[test]
    fn accepts_type_as_event_name() {
        let frame = decode_frame(
            "{\"type\":\"new_lead\",\"data\":{\"name\":\"Anna\"}}\r\n",
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode broadcast");
        assert_eq!(frame.event, EVENT_NEW_LEAD);
        assert_eq!(frame.data["name"], "Anna");
    }

    #[test]
    fn encode_keeps_namespace_tag() {
        let frame = ChannelFrame::new(EVENT_STATS_UPDATE, serde_json::json!({"courses": 1}))
            .with_namespace("/stats");
        let text = encode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let decoded = decode_frame(&text, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(decoded.namespace.as_deref(), Some("stats"));
        assert_eq!(decoded, frame);
    }

    #[test]
    fn namespace_tag_isolates_event_names() {
        let untagged = ChannelFrame::new(EVENT_NEW_LEAD, Value::Null);
        assert!(untagged.belongs_to(NAMESPACE_LEADS));
        assert!(untagged.belongs_to(NAMESPACE_STATS));

        let tagged = untagged.with_namespace(NAMESPACE_LEADS);
        assert!(tagged.belongs_to("/leads"));
        assert!(!tagged.belongs_to(NAMESPACE_STATS));
    }

    #[test]
    fn rejects_oversized_frames_both_ways() {
        let frame = ChannelFrame::new("emit", serde_json::json!({"blob": "x".repeat(128)}));
        assert!(matches!(
            encode_frame(&frame, 64),
            Err(FrameError::OversizedFrame { .. })
        ));

        let text = format!("{{\"event\":\"x\",\"data\":\"{}\"}}", "y".repeat(2_000));
        assert!(matches!(
            decode_frame(&text, 1_024),
            Err(FrameError::OversizedFrame { .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        match decode_frame("{\"not\":\"valid\"", DEFAULT_MAX_FRAME_BYTES) {
            Err(FrameError::Decode(_)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            decode_frame("{\"data\":1}", DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::Decode(_))
        ));
    }
}
