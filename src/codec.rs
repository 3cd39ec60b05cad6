//! Bus wire codec.
//!
//! Every bus message is a multipart message: a topic string, a JSON metadata
//! object and, for messages carrying SDU or frame bytes, a raw payload part.
//! Topics of channel-bound messages carry the channel id as a `.sc.vc.map`
//! suffix.

use crate::error::BusError;
use crate::ids::{ChannelId, FrameCookie, PayloadCookie, PayloadPartCookie, Qos};
use crate::protocol::{
    InboundMessage, OutboundMessage, RadioDownlinkFrame, RadioUplinkFrame, RadioUplinkState,
    SduDownlink, SduEventKind, SduFlags, SduUplinkEvent, SduUplinkRequest,
    TOPIC_DOWNLINK_FRAME, TOPIC_DOWNLINK_SDU, TOPIC_UPLINK_FRAME, TOPIC_UPLINK_SDU_EVENT,
    TOPIC_UPLINK_SDU_REQUEST, TOPIC_UPLINK_STATE,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, trace, warn};

/// A message that can travel over the bus as topic / metadata / payload parts.
pub trait WireMessage: Sized {
    fn to_parts(&self) -> Result<Vec<Bytes>, BusError>;

    /// `Ok(None)` means the message was empty and has been logged and dropped.
    fn from_parts(parts: Vec<Bytes>) -> Result<Option<Self>, BusError>;
}

/// A multipart message split into its parts, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub metadata: Map<String, Value>,
    pub payload: Vec<u8>,
}

pub fn channel_id_to_topic(base: &str, channel_id: ChannelId) -> String {
    format!(
        "{}.{}.{}.{}",
        base, channel_id.sc_id, channel_id.vchannel_id, channel_id.map_id
    )
}

/// Extracts the channel id from the last three components of a topic.
/// Both `.` and `-` separate components; numbers may be decimal or `0x` hex.
pub fn channel_id_from_topic(topic: &str) -> Result<ChannelId, BusError> {
    let bad_topic = || BusError::BadTopic(topic.to_string());

    let parts: Vec<&str> = topic
        .split(|c: char| c == '.' || c == '-')
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() < 3 {
        return Err(bad_topic());
    }

    let tail = &parts[parts.len() - 3..];
    let sc_id = parse_number(tail[0]).and_then(|v| u16::try_from(v).ok());
    let vc_id = parse_number(tail[1]).and_then(|v| u8::try_from(v).ok());
    let map_id = parse_number(tail[2]).and_then(|v| u8::try_from(v).ok());

    match (sc_id, vc_id, map_id) {
        (Some(sc_id), Some(vc_id), Some(map_id)) => Ok(ChannelId::new(sc_id, vc_id, map_id)),
        _ => Err(bad_topic()),
    }
}

/// True if `topic` is `base` itself or `base` followed by a suffix.
pub fn topic_matches(topic: &str, base: &str) -> bool {
    match topic.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Splits a multipart message. Parts after the payload are drained with a
/// warning.
pub fn split_parts(parts: Vec<Bytes>) -> Result<Option<RawMessage>, BusError> {
    let mut parts = parts.into_iter();

    let topic = match parts.next() {
        Some(topic) if !topic.is_empty() => topic,
        _ => {
            error!("got empty topic message");
            return Ok(None);
        }
    };
    let topic = String::from_utf8(topic.to_vec())
        .map_err(|_| BusError::MalformedMessage("topic is not valid utf-8".to_string()))?;
    trace!("got msg topic \"{}\"", topic);

    let metadata = match parts.next() {
        Some(metadata) => metadata,
        None => {
            error!("there is no message parts after topic {}", topic);
            return Err(BusError::MalformedMessage(format!(
                "there is no message parts after topic {topic}"
            )));
        }
    };
    if metadata.is_empty() {
        error!("got empty message metadata for topic {}", topic);
        return Ok(None);
    }
    let metadata = match serde_json::from_slice::<Value>(&metadata)? {
        Value::Object(map) => map,
        other => {
            return Err(BusError::MalformedMessage(format!(
                "metadata is not a JSON object: {other}"
            )))
        }
    };

    let payload = match parts.next() {
        Some(payload) => {
            if payload.is_empty() {
                warn!("message have a zero size payload");
            }
            payload.to_vec()
        }
        None => {
            trace!("this message have no payload");
            Vec::new()
        }
    };

    for _extra in parts {
        warn!("flushing extra message data on topic {}", topic);
    }

    Ok(Some(RawMessage { topic, metadata, payload }))
}

fn join_parts<M: Serialize>(topic: String, metadata: &M, payload: Option<&[u8]>) -> Result<Vec<Bytes>, BusError> {
    let metadata = serde_json::to_vec(metadata)?;

    let mut parts = vec![Bytes::from(topic), Bytes::from(metadata)];
    if let Some(payload) = payload {
        parts.push(Bytes::copy_from_slice(payload));
    }
    Ok(parts)
}

fn require(metadata: &Map<String, Value>, fields: &[&'static str]) -> Result<(), BusError> {
    match fields.iter().find(|field| !metadata.contains_key(**field)) {
        Some(field) => Err(BusError::MissingField(*field)),
        None => Ok(()),
    }
}

fn parse_metadata<T: DeserializeOwned>(
    metadata: Map<String, Value>,
    fields: &[&'static str],
) -> Result<T, BusError> {
    require(&metadata, fields)?;
    serde_json::from_value(Value::Object(metadata))
        .map_err(|e| BusError::MalformedMessage(e.to_string()))
}

// Metadata layouts

#[derive(Debug, Serialize, Deserialize)]
struct SduUplinkRequestMeta {
    sc_id: u16,
    vchannel_id: u8,
    map_id: u8,
    qos: Qos,
    cookie: PayloadCookie,
}

#[derive(Debug, Serialize, Deserialize)]
struct RadioDownlinkFrameMeta {
    checksum_valid: bool,
    frame_no: u64,
    cookie: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RadioUplinkStateMeta {
    #[serde(default)]
    cookie_in_wait: Option<u64>,
    #[serde(default)]
    cookie_in_progress: Option<u64>,
    #[serde(default)]
    cookie_sent: Option<u64>,
    #[serde(default)]
    cookie_dropped: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SduUplinkEventMeta {
    sc_id: u16,
    vchannel_id: u8,
    map_id: u8,
    cookie: PayloadPartCookie,
    event: SduEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SduDownlinkMeta {
    sc_id: u16,
    vchannel_id: u8,
    map_id: u8,
    qos: Qos,
    flags: SduFlags,
}

#[derive(Debug, Serialize, Deserialize)]
struct RadioUplinkFrameMeta {
    cookie: FrameCookie,
}

const CHANNEL_FIELDS: [&str; 3] = ["sc_id", "vchannel_id", "map_id"];

impl WireMessage for InboundMessage {
    fn to_parts(&self) -> Result<Vec<Bytes>, BusError> {
        match self {
            InboundMessage::SduUplinkRequest(request) => {
                let id = request.channel_id;
                let meta = SduUplinkRequestMeta {
                    sc_id: id.sc_id,
                    vchannel_id: id.vchannel_id,
                    map_id: id.map_id,
                    qos: request.qos,
                    cookie: request.cookie,
                };
                join_parts(channel_id_to_topic(TOPIC_UPLINK_SDU_REQUEST, id), &meta, Some(&request.data))
            }
            InboundMessage::RadioDownlinkFrame(frame) => {
                let meta = RadioDownlinkFrameMeta {
                    checksum_valid: frame.checksum_valid,
                    frame_no: frame.frame_no,
                    cookie: frame.cookie,
                };
                join_parts(TOPIC_DOWNLINK_FRAME.to_string(), &meta, Some(&frame.data))
            }
            InboundMessage::RadioUplinkState(state) => {
                let meta = RadioUplinkStateMeta {
                    cookie_in_wait: state.cookie_in_wait,
                    cookie_in_progress: state.cookie_in_progress,
                    cookie_sent: state.cookie_done,
                    cookie_dropped: state.cookie_failed,
                };
                join_parts(TOPIC_UPLINK_STATE.to_string(), &meta, None)
            }
            InboundMessage::Unknown { topic } => Err(BusError::MalformedMessage(format!(
                "refusing to encode message of unknown topic {topic}"
            ))),
        }
    }

    fn from_parts(parts: Vec<Bytes>) -> Result<Option<Self>, BusError> {
        let Some(raw) = split_parts(parts)? else {
            return Ok(None);
        };
        classify_inbound(raw).map(Some)
    }
}

/// Routes a split message to its inbound kind by topic.
pub fn classify_inbound(raw: RawMessage) -> Result<InboundMessage, BusError> {
    let RawMessage { topic, metadata, payload } = raw;

    if topic_matches(&topic, TOPIC_UPLINK_SDU_REQUEST) {
        let mut fields = CHANNEL_FIELDS.to_vec();
        fields.extend(["qos", "cookie"]);
        let meta: SduUplinkRequestMeta = parse_metadata(metadata, &fields)?;
        let channel_id = ChannelId::new(meta.sc_id, meta.vchannel_id, meta.map_id);

        if topic.len() > TOPIC_UPLINK_SDU_REQUEST.len() {
            match channel_id_from_topic(&topic[TOPIC_UPLINK_SDU_REQUEST.len()..]) {
                Ok(topic_id) if topic_id != channel_id => warn!(
                    "channel id missmatch for sdu uplink request. in topic: {}; in metadata: {} \
                     assuming right one in metadata",
                    topic_id, channel_id
                ),
                Ok(_) => {}
                Err(e) => warn!("{}; using channel id from metadata", e),
            }
        }

        return Ok(InboundMessage::SduUplinkRequest(SduUplinkRequest {
            channel_id,
            qos: meta.qos,
            cookie: meta.cookie,
            data: payload,
        }));
    }

    if topic_matches(&topic, TOPIC_DOWNLINK_FRAME) {
        let meta: RadioDownlinkFrameMeta =
            parse_metadata(metadata, &["checksum_valid", "frame_no", "cookie"])?;
        return Ok(InboundMessage::RadioDownlinkFrame(RadioDownlinkFrame {
            checksum_valid: meta.checksum_valid,
            frame_no: meta.frame_no,
            cookie: meta.cookie,
            data: payload,
        }));
    }

    if topic_matches(&topic, TOPIC_UPLINK_STATE) {
        let meta: RadioUplinkStateMeta = parse_metadata(metadata, &[])?;
        return Ok(InboundMessage::RadioUplinkState(RadioUplinkState {
            cookie_in_wait: meta.cookie_in_wait,
            cookie_in_progress: meta.cookie_in_progress,
            cookie_done: meta.cookie_sent,
            cookie_failed: meta.cookie_dropped,
        }));
    }

    Ok(InboundMessage::Unknown { topic })
}

impl WireMessage for OutboundMessage {
    fn to_parts(&self) -> Result<Vec<Bytes>, BusError> {
        match self {
            OutboundMessage::SduUplinkEvent(event) => {
                let id = event.channel_id;
                let meta = SduUplinkEventMeta {
                    sc_id: id.sc_id,
                    vchannel_id: id.vchannel_id,
                    map_id: id.map_id,
                    cookie: event.part_cookie,
                    event: event.event,
                    comment: event.comment.clone(),
                };
                join_parts(channel_id_to_topic(TOPIC_UPLINK_SDU_EVENT, id), &meta, None)
            }
            OutboundMessage::SduDownlink(sdu) => {
                let id = sdu.channel_id;
                let meta = SduDownlinkMeta {
                    sc_id: id.sc_id,
                    vchannel_id: id.vchannel_id,
                    map_id: id.map_id,
                    qos: sdu.qos,
                    flags: sdu.flags,
                };
                join_parts(channel_id_to_topic(TOPIC_DOWNLINK_SDU, id), &meta, Some(&sdu.data))
            }
            OutboundMessage::RadioUplinkFrame(frame) => {
                let meta = RadioUplinkFrameMeta { cookie: frame.cookie };
                join_parts(TOPIC_UPLINK_FRAME.to_string(), &meta, Some(&frame.data))
            }
        }
    }

    fn from_parts(parts: Vec<Bytes>) -> Result<Option<Self>, BusError> {
        let Some(RawMessage { topic, metadata, payload }) = split_parts(parts)? else {
            return Ok(None);
        };

        if topic_matches(&topic, TOPIC_UPLINK_SDU_EVENT) {
            let mut fields = CHANNEL_FIELDS.to_vec();
            fields.extend(["cookie", "event"]);
            let meta: SduUplinkEventMeta = parse_metadata(metadata, &fields)?;
            return Ok(Some(OutboundMessage::SduUplinkEvent(SduUplinkEvent {
                channel_id: ChannelId::new(meta.sc_id, meta.vchannel_id, meta.map_id),
                part_cookie: meta.cookie,
                event: meta.event,
                comment: meta.comment,
            })));
        }

        if topic_matches(&topic, TOPIC_DOWNLINK_SDU) {
            let mut fields = CHANNEL_FIELDS.to_vec();
            fields.extend(["qos", "flags"]);
            let meta: SduDownlinkMeta = parse_metadata(metadata, &fields)?;
            return Ok(Some(OutboundMessage::SduDownlink(SduDownlink {
                channel_id: ChannelId::new(meta.sc_id, meta.vchannel_id, meta.map_id),
                qos: meta.qos,
                flags: meta.flags,
                data: payload,
            })));
        }

        if topic_matches(&topic, TOPIC_UPLINK_FRAME) {
            let meta: RadioUplinkFrameMeta = parse_metadata(metadata, &["cookie"])?;
            return Ok(Some(OutboundMessage::RadioUplinkFrame(RadioUplinkFrame {
                cookie: meta.cookie,
                data: payload,
            })));
        }

        Err(BusError::MalformedMessage(format!("unknown outbound topic {topic}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches_requires_component_boundary() {
        assert!(topic_matches("radio.uplink_state", TOPIC_UPLINK_STATE));
        assert!(topic_matches("uslp.uplink_sdu_request.1.0.1", TOPIC_UPLINK_SDU_REQUEST));
        assert!(!topic_matches("radio.uplink_state_ext", TOPIC_UPLINK_STATE));
        assert!(!topic_matches("radio.uplink", TOPIC_UPLINK_STATE));
    }

    #[test]
    fn test_channel_id_from_legacy_topic() {
        let id = channel_id_from_topic("uslp.uplink_sdu_request.66-0-1").unwrap();
        assert_eq!(id, ChannelId::new(66, 0, 1));

        let id = channel_id_from_topic("uslp.uplink_sdu_request.0x42.0.0x1").unwrap();
        assert_eq!(id, ChannelId::new(0x42, 0, 1));
    }

    #[test]
    fn test_channel_id_from_short_topic_fails() {
        assert!(matches!(
            channel_id_from_topic("radio.uplink_state"),
            Err(BusError::BadTopic(_))
        ));
    }
}
