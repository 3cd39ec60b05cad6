//! Fixed-length transfer frame layout used by the in-process stack.
//!
//! ```text
//! +--------------------------+-----------+---------+----------+-----------------+------+
//! | id word (32)             | len-1 (16)| ctl (8) | seq (16)?| rule|upid, dlen | data |
//! | TFVN SCID s/d VCID MAP 0 |           |         |          | (8) (16)        | fill |
//! +--------------------------+-----------+---------+----------+-----------------+------+
//! ```
//!
//! `ctl` bit 7 is the bypass flag (expedited), bits 0..2 the sequence number
//! length. Octets after the valid data are idle fill.

use crate::error::StackError;
use crate::ids::ChannelId;

pub const TFVN: u8 = 0x0C;

pub const PRIMARY_HEADER_LEN: usize = 7;
pub const SEQ_NO_LEN: usize = 2;
pub const DATA_HEADER_LEN: usize = 3;
pub const MAX_OVERHEAD: usize = PRIMARY_HEADER_LEN + SEQ_NO_LEN + DATA_HEADER_LEN;

pub const UPID_PACKETS: u8 = 0x00;
pub const UPID_MAPA_SDU: u8 = 0x05;
pub const UPID_IDLE: u8 = 0x1F;

pub const IDLE_FILL: u8 = 0x55;

const BYPASS_FLAG: u8 = 0x80;
const SEQ_LEN_MASK: u8 = 0x07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionRule {
    SegmentStart,
    SegmentContinue,
    SegmentLast,
    Unsegmented,
}

impl ConstructionRule {
    pub fn for_segment(is_first: bool, is_last: bool) -> Self {
        match (is_first, is_last) {
            (true, true) => ConstructionRule::Unsegmented,
            (true, false) => ConstructionRule::SegmentStart,
            (false, true) => ConstructionRule::SegmentLast,
            (false, false) => ConstructionRule::SegmentContinue,
        }
    }

    fn bits(self) -> u8 {
        match self {
            ConstructionRule::SegmentStart => 0b011,
            ConstructionRule::SegmentContinue => 0b100,
            ConstructionRule::SegmentLast => 0b101,
            ConstructionRule::Unsegmented => 0b111,
        }
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b011 => Some(ConstructionRule::SegmentStart),
            0b100 => Some(ConstructionRule::SegmentContinue),
            0b101 => Some(ConstructionRule::SegmentLast),
            0b111 => Some(ConstructionRule::Unsegmented),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel_id: ChannelId,
    pub bypass: bool,
    pub seq_no: Option<u16>,
    pub rule: ConstructionRule,
    pub upid: u8,
    pub data_len: u16,
}

impl FrameHeader {
    pub fn len(&self) -> usize {
        PRIMARY_HEADER_LEN + self.seq_no.map_or(0, |_| SEQ_NO_LEN) + DATA_HEADER_LEN
    }
}

/// Room left for SDU data in a frame of `frame_size` bytes.
pub const fn data_capacity(frame_size: usize) -> usize {
    frame_size.saturating_sub(MAX_OVERHEAD)
}

pub fn encode(header: &FrameHeader, data: &[u8], buf: &mut [u8]) -> Result<(), StackError> {
    let header_len = header.len();
    if header_len + data.len() > buf.len() || data.len() != usize::from(header.data_len) {
        return Err(StackError::BadFrame(format!(
            "{} data bytes do not fit a {} byte frame",
            data.len(),
            buf.len()
        )));
    }
    let frame_len_field = u16::try_from(buf.len() - 1)
        .map_err(|_| StackError::BadFrame(format!("frame of {} bytes is too long", buf.len())))?;

    let id = header.channel_id;
    let id_word: u32 = (u32::from(TFVN) << 28)
        | (u32::from(id.sc_id) << 12)
        | (u32::from(id.vchannel_id & 0x3F) << 5)
        | (u32::from(id.map_id & 0x0F) << 1);

    buf[0..4].copy_from_slice(&id_word.to_be_bytes());
    buf[4..6].copy_from_slice(&frame_len_field.to_be_bytes());

    let mut control = 0u8;
    if header.bypass {
        control |= BYPASS_FLAG;
    }
    let mut pos = PRIMARY_HEADER_LEN;
    if let Some(seq_no) = header.seq_no {
        control |= SEQ_NO_LEN as u8;
        buf[pos..pos + SEQ_NO_LEN].copy_from_slice(&seq_no.to_be_bytes());
        pos += SEQ_NO_LEN;
    }
    buf[6] = control;

    buf[pos] = (header.rule.bits() << 5) | (header.upid & 0x1F);
    buf[pos + 1..pos + 3].copy_from_slice(&header.data_len.to_be_bytes());
    pos += DATA_HEADER_LEN;

    buf[pos..pos + data.len()].copy_from_slice(data);
    buf[pos + data.len()..].fill(IDLE_FILL);
    Ok(())
}

pub fn decode(buf: &[u8]) -> Result<(FrameHeader, &[u8]), StackError> {
    if buf.len() < PRIMARY_HEADER_LEN + DATA_HEADER_LEN {
        return Err(StackError::BadFrame(format!("frame of {} bytes is too short", buf.len())));
    }

    let id_word = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let tfvn = (id_word >> 28) as u8;
    if tfvn != TFVN {
        return Err(StackError::BadFrame(format!("unexpected frame version {tfvn:#x}")));
    }
    let channel_id = ChannelId::new(
        ((id_word >> 12) & 0xFFFF) as u16,
        ((id_word >> 5) & 0x3F) as u8,
        ((id_word >> 1) & 0x0F) as u8,
    );

    let frame_len = usize::from(u16::from_be_bytes([buf[4], buf[5]])) + 1;
    if frame_len != buf.len() {
        return Err(StackError::BadFrame(format!(
            "frame length field {} does not match {} received bytes",
            frame_len,
            buf.len()
        )));
    }

    let control = buf[6];
    let mut pos = PRIMARY_HEADER_LEN;
    let seq_no = match usize::from(control & SEQ_LEN_MASK) {
        0 => None,
        SEQ_NO_LEN if buf.len() >= pos + SEQ_NO_LEN + DATA_HEADER_LEN => {
            let seq_no = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            pos += SEQ_NO_LEN;
            Some(seq_no)
        }
        other => {
            return Err(StackError::BadFrame(format!("unsupported sequence number length {other}")))
        }
    };

    let rule = ConstructionRule::from_bits(buf[pos] >> 5).ok_or_else(|| {
        StackError::BadFrame(format!("unsupported construction rule {:#05b}", buf[pos] >> 5))
    })?;
    let upid = buf[pos] & 0x1F;
    let data_len = u16::from_be_bytes([buf[pos + 1], buf[pos + 2]]);
    pos += DATA_HEADER_LEN;

    let end = pos + usize::from(data_len);
    if end > buf.len() {
        return Err(StackError::BadFrame(format!(
            "data length {} exceeds frame of {} bytes",
            data_len,
            buf.len()
        )));
    }

    let header = FrameHeader {
        channel_id,
        bypass: control & BYPASS_FLAG != 0,
        seq_no,
        rule,
        upid,
        data_len,
    };
    Ok((header, &buf[pos..end]))
}
