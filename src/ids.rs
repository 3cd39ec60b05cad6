use core::fmt;
use core::num::NonZeroU64;
use serde::{Deserialize, Serialize};

/// Client-assigned SDU cookie. Round-tripped unchanged in every event.
pub type PayloadCookie = u64;

/// Global MAP channel identifier: spacecraft, virtual channel and MAP id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    pub sc_id: u16,
    pub vchannel_id: u8,
    pub map_id: u8,
}

impl ChannelId {
    pub const fn new(sc_id: u16, vchannel_id: u8, map_id: u8) -> Self {
        Self { sc_id, vchannel_id, map_id }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.sc_id, self.vchannel_id, self.map_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    Expedited,
    SequenceControlled,
}

impl Qos {
    pub fn as_str(self) -> &'static str {
        match self {
            Qos::Expedited => "expedited",
            Qos::SequenceControlled => "sequence_controlled",
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fragment of a possibly segmented SDU, as resolved by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadPartCookie {
    pub cookie: PayloadCookie,
    pub part_no: u32,
    #[serde(rename = "is_final_part")]
    pub is_final: bool,
}

impl PayloadPartCookie {
    /// The single part of an SDU that was not segmented (or not yet resolved).
    pub const fn whole(cookie: PayloadCookie) -> Self {
        Self { cookie, part_no: 0, is_final: true }
    }
}

impl fmt::Display for PayloadPartCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cookie: {}, part: {}", self.cookie, self.part_no)?;
        if self.is_final {
            f.write_str(" (final)")?;
        }
        Ok(())
    }
}

/// Cookie of a frame handed to the radio. Zero is the radio's "no frame"
/// sentinel, so it can never be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct FrameCookie(NonZeroU64);

impl FrameCookie {
    pub const FIRST: FrameCookie = FrameCookie(NonZeroU64::MIN);

    pub fn new(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The cookie after this one, wrapping from `u64::MAX` back to 1.
    pub fn next(self) -> Self {
        match NonZeroU64::new(self.0.get().wrapping_add(1)) {
            Some(value) => Self(value),
            None => Self::FIRST,
        }
    }
}

impl TryFrom<u64> for FrameCookie {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or("frame cookie can not be zero")
    }
}

impl From<FrameCookie> for u64 {
    fn from(cookie: FrameCookie) -> Self {
        cookie.get()
    }
}

impl fmt::Display for FrameCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
