use crate::ids::{ChannelId, FrameCookie, PayloadCookie, PayloadPartCookie, Qos};
use core::fmt;
use core::ops::BitOr;
use serde::{Deserialize, Serialize};

pub const TOPIC_UPLINK_SDU_REQUEST: &str = "uslp.uplink_sdu_request";
pub const TOPIC_UPLINK_SDU_EVENT: &str = "uslp.uplink_sdu_event";
pub const TOPIC_DOWNLINK_SDU: &str = "uslp.downlink_sdu";

pub const TOPIC_UPLINK_FRAME: &str = "radio.uplink_frame";
pub const TOPIC_DOWNLINK_FRAME: &str = "radio.downlink_frame";
pub const TOPIC_UPLINK_STATE: &str = "radio.uplink_state";

/// Topic prefixes the server subscribes to.
pub const INBOUND_TOPICS: [&str; 3] = [
    TOPIC_UPLINK_SDU_REQUEST,
    TOPIC_DOWNLINK_FRAME,
    TOPIC_UPLINK_STATE,
];

// Inbound messages

/// Client wants an SDU sent. `mapa` channels take the data as is, `mapp`
/// channels expect it to be an EPP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SduUplinkRequest {
    pub channel_id: ChannelId,
    pub qos: Qos,
    pub cookie: PayloadCookie,
    pub data: Vec<u8>,
}

/// A frame the radio received. Only the metadata we care about is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioDownlinkFrame {
    pub checksum_valid: bool,
    pub frame_no: u64,
    pub cookie: u64,
    pub data: Vec<u8>,
}

/// Snapshot of the radio's uplink pipeline.
///
/// Slots carry the cookies exactly as the radio reported them. A present
/// slot may name a frame this server never sent (including cookie 0 from
/// other senders) and still means the slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioUplinkState {
    pub cookie_in_wait: Option<u64>,
    pub cookie_in_progress: Option<u64>,
    pub cookie_done: Option<u64>,
    pub cookie_failed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    SduUplinkRequest(SduUplinkRequest),
    RadioDownlinkFrame(RadioDownlinkFrame),
    RadioUplinkState(RadioUplinkState),
    /// A topic we did not subscribe for or do not know yet.
    Unknown { topic: String },
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::SduUplinkRequest(_) => "sdu_uplink_request",
            InboundMessage::RadioDownlinkFrame(_) => "radio_downlink_frame",
            InboundMessage::RadioUplinkState(_) => "radio_uplink_state",
            InboundMessage::Unknown { .. } => "unknown",
        }
    }
}

// Outbound messages

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SduEventKind {
    /// Taken into the stack queue.
    SduAccepted,
    /// Refused by the stack.
    SduRejected,
    /// Part of a frame handed to the radio server.
    SduSentToRadio,
    SduRadiated,
    SduRadiationFailed,
}

impl SduEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SduEventKind::SduAccepted => "sdu_accepted",
            SduEventKind::SduRejected => "sdu_rejected",
            SduEventKind::SduSentToRadio => "sdu_sent_to_radio",
            SduEventKind::SduRadiated => "sdu_radiated",
            SduEventKind::SduRadiationFailed => "sdu_radiation_failed",
        }
    }
}

impl fmt::Display for SduEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SduUplinkEvent {
    pub channel_id: ChannelId,
    pub part_cookie: PayloadPartCookie,
    pub event: SduEventKind,
    pub comment: Option<String>,
}

impl SduUplinkEvent {
    pub fn new(channel_id: ChannelId, part_cookie: PayloadPartCookie, event: SduEventKind) -> Self {
        Self { channel_id, part_cookie, event, comment: None }
    }
}

/// An SDU demultiplexed from downlink frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SduDownlink {
    pub channel_id: ChannelId,
    pub qos: Qos,
    pub flags: SduFlags,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioUplinkFrame {
    pub cookie: FrameCookie,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    SduUplinkEvent(SduUplinkEvent),
    SduDownlink(SduDownlink),
    RadioUplinkFrame(RadioUplinkFrame),
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::SduUplinkEvent(_) => "sdu_uplink_event",
            OutboundMessage::SduDownlink(_) => "sdu_downlink",
            OutboundMessage::RadioUplinkFrame(_) => "radio_uplink_frame",
        }
    }
}

impl From<SduUplinkEvent> for OutboundMessage {
    fn from(event: SduUplinkEvent) -> Self {
        OutboundMessage::SduUplinkEvent(event)
    }
}

impl From<SduDownlink> for OutboundMessage {
    fn from(sdu: SduDownlink) -> Self {
        OutboundMessage::SduDownlink(sdu)
    }
}

impl From<RadioUplinkFrame> for OutboundMessage {
    fn from(frame: RadioUplinkFrame) -> Self {
        OutboundMessage::RadioUplinkFrame(frame)
    }
}

/// Status flags of a demultiplexed SDU. Serialized as an array of names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct SduFlags(u8);

impl SduFlags {
    pub const INCOMPLETE: SduFlags = SduFlags(1 << 0);
    pub const IDLE: SduFlags = SduFlags(1 << 1);
    pub const CORRUPTED: SduFlags = SduFlags(1 << 2);
    pub const MAPA: SduFlags = SduFlags(1 << 3);
    pub const MAPP: SduFlags = SduFlags(1 << 4);
    pub const STRAY: SduFlags = SduFlags(1 << 5);

    const NAMES: [(SduFlags, &'static str); 6] = [
        (SduFlags::INCOMPLETE, "incomplete"),
        (SduFlags::IDLE, "idle"),
        (SduFlags::CORRUPTED, "corrupted"),
        (SduFlags::MAPA, "mapa"),
        (SduFlags::MAPP, "mapp"),
        (SduFlags::STRAY, "stray"),
    ];

    pub const fn empty() -> Self {
        SduFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: SduFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SduFlags) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }

    pub fn from_name(name: &str) -> Option<SduFlags> {
        Self::NAMES
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(flag, _)| *flag)
    }
}

impl BitOr for SduFlags {
    type Output = SduFlags;

    fn bitor(self, rhs: SduFlags) -> SduFlags {
        SduFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for SduFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for name in self.names() {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

impl From<SduFlags> for Vec<String> {
    fn from(flags: SduFlags) -> Self {
        flags.names().map(String::from).collect()
    }
}

impl TryFrom<Vec<String>> for SduFlags {
    type Error = String;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names.iter().try_fold(SduFlags::empty(), |acc, name| {
            SduFlags::from_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| format!("unknown sdu flag \"{name}\""))
        })
    }
}
