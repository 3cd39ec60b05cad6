//! USLP stack boundary.
//!
//! The dispatcher only talks to the link layer through [`OutputStack`] and
//! [`InputStack`]. [`MuxStack`] and [`DemuxStack`] are compact in-process
//! implementations configured with the ground station's static channel plan.

pub mod frame;
pub mod input;
pub mod output;

pub use input::DemuxStack;
pub use output::MuxStack;

use crate::error::StackError;
use crate::ids::{ChannelId, PayloadCookie, PayloadPartCookie, Qos};
use crate::protocol::SduFlags;
use arrayvec::ArrayVec;
use static_assertions::const_assert;

pub const RADIO_FRAME_SIZE: usize = 200;
pub const SPACECRAFT_ID: u16 = 0x42;

pub const UPLINK_VCHANNEL_ID: u8 = 0x00;
pub const UPLINK_TELECOMMAND_MAPID: u8 = 0x00;
pub const UPLINK_IP_MAPID: u8 = 0x01;

pub const DOWNLINK_VCHANNEL_ID: u8 = 0x00;
pub const DOWNLINK_TELEMETRY_MAPID: u8 = 0x00;
pub const DOWNLINK_IP_MAPID: u8 = 0x01;

/// Upper bound of SDU parts a single frame may carry.
pub const MAX_PARTS_PER_FRAME: usize = 8;

const_assert!(RADIO_FRAME_SIZE > frame::MAX_OVERHEAD);
const_assert!(RADIO_FRAME_SIZE <= u16::MAX as usize + 1);

pub type PartCookies = ArrayVec<PayloadPartCookie, MAX_PARTS_PER_FRAME>;

/// What the output stack knows about the frame it is about to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub channel_id: ChannelId,
    pub payload_cookies: PartCookies,
    pub frame_seq_no: Option<u16>,
}

/// One SDU demultiplexed by the input stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSduEvent {
    pub channel_id: ChannelId,
    pub qos: Qos,
    pub flags: SduFlags,
    pub data: Vec<u8>,
}

/// How a MAP channel treats its SDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    /// MAPA: octets are carried as is.
    Access,
    /// MAPP: SDUs are EPP packets.
    Packet,
}

impl MapKind {
    pub fn flag(self) -> SduFlags {
        match self {
            MapKind::Access => SduFlags::MAPA,
            MapKind::Packet => SduFlags::MAPP,
        }
    }
}

/// Uplink side: SDUs in, fixed size frames out.
pub trait OutputStack {
    fn frame_size(&self) -> usize;

    fn has_map_channel(&self, channel_id: ChannelId) -> bool;

    fn submit_sdu(
        &mut self,
        channel_id: ChannelId,
        cookie: PayloadCookie,
        data: &[u8],
        qos: Qos,
    ) -> Result<(), StackError>;

    /// Parameters of the next frame, if one is ready.
    fn peek_frame(&self) -> Option<FrameParams>;

    /// Writes the next frame into `buf`, which must be exactly
    /// [`OutputStack::frame_size`] bytes long.
    fn pop_frame(&mut self, buf: &mut [u8]) -> Result<FrameParams, StackError>;
}

/// Downlink side: frames in, one callback per demultiplexed SDU.
pub trait InputStack {
    fn push_frame(
        &mut self,
        data: &[u8],
        on_sdu: &mut dyn FnMut(MapSduEvent),
    ) -> Result<(), StackError>;
}

/// Uplink stack with the ground station's channel plan.
pub fn ground_output_stack() -> MuxStack {
    let mut stack = MuxStack::new(RADIO_FRAME_SIZE);
    stack.add_map_channel(
        ChannelId::new(SPACECRAFT_ID, UPLINK_VCHANNEL_ID, UPLINK_TELECOMMAND_MAPID),
        MapKind::Packet,
    );
    stack.add_map_channel(
        ChannelId::new(SPACECRAFT_ID, UPLINK_VCHANNEL_ID, UPLINK_IP_MAPID),
        MapKind::Packet,
    );
    stack
}

/// Downlink stack with the ground station's channel plan.
pub fn ground_input_stack() -> DemuxStack {
    let mut stack = DemuxStack::new(SPACECRAFT_ID);
    stack.add_map_channel(
        ChannelId::new(SPACECRAFT_ID, DOWNLINK_VCHANNEL_ID, DOWNLINK_TELEMETRY_MAPID),
        MapKind::Packet,
    );
    stack.add_map_channel(
        ChannelId::new(SPACECRAFT_ID, DOWNLINK_VCHANNEL_ID, DOWNLINK_IP_MAPID),
        MapKind::Packet,
    );
    stack.emit_idle(false);
    stack
}
