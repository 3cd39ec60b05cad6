use super::frame::{self, ConstructionRule, FrameHeader};
use super::{FrameParams, MapKind, OutputStack, PartCookies};
use crate::epp::EppHeader;
use crate::error::StackError;
use crate::ids::{ChannelId, PayloadCookie, PayloadPartCookie, Qos};
use heapless::Deque;
use std::collections::BTreeMap;
use tracing::{debug, trace};

pub const MAX_QUEUED_SDUS: usize = 32;
pub const MAX_SDU_SIZE: usize = 64 * 1024;

#[derive(Debug)]
struct QueuedSdu {
    cookie: PayloadCookie,
    data: Vec<u8>,
    offset: usize,
    next_part: u32,
}

#[derive(Debug)]
struct MapEmitter {
    id: ChannelId,
    kind: MapKind,
    expedited: Deque<QueuedSdu, MAX_QUEUED_SDUS>,
    sequenced: Deque<QueuedSdu, MAX_QUEUED_SDUS>,
}

impl MapEmitter {
    /// SDU to segment next. A sequence-controlled SDU that already started
    /// segmentation keeps the channel until its last segment, since the
    /// receiver reassembles one SDU per MAP at a time.
    fn front(&self) -> Option<(&QueuedSdu, Qos)> {
        if let Some(sdu) = self.sequenced.front().filter(|sdu| sdu.offset > 0) {
            return Some((sdu, Qos::SequenceControlled));
        }
        self.expedited
            .front()
            .map(|sdu| (sdu, Qos::Expedited))
            .or_else(|| self.sequenced.front().map(|sdu| (sdu, Qos::SequenceControlled)))
    }

    fn queue_mut(&mut self, qos: Qos) -> &mut Deque<QueuedSdu, MAX_QUEUED_SDUS> {
        match qos {
            Qos::Expedited => &mut self.expedited,
            Qos::SequenceControlled => &mut self.sequenced,
        }
    }
}

/// Next segment the stack would emit.
#[derive(Debug, Clone, Copy)]
struct Segment {
    channel_index: usize,
    qos: Qos,
    offset: usize,
    len: usize,
    part: PayloadPartCookie,
    seq_no: Option<u16>,
}

/// Round-robin MAP multiplexer producing fixed size frames. Each frame carries
/// one segment of one SDU; expedited SDUs overtake sequence-controlled ones
/// on the same channel, but never in the middle of a segmented SDU.
#[derive(Debug)]
pub struct MuxStack {
    frame_size: usize,
    channels: Vec<MapEmitter>,
    next_channel: usize,
    // per virtual channel (sc_id, vc_id)
    frame_seq_no: BTreeMap<(u16, u8), u16>,
}

impl MuxStack {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            channels: Vec::new(),
            next_channel: 0,
            frame_seq_no: BTreeMap::new(),
        }
    }

    /// Registers a MAP channel. Registering the same id twice keeps the first.
    pub fn add_map_channel(&mut self, id: ChannelId, kind: MapKind) {
        if self.has_map_channel(id) {
            return;
        }
        self.channels.push(MapEmitter {
            id,
            kind,
            expedited: Deque::new(),
            sequenced: Deque::new(),
        });
    }

    pub fn queued_sdus(&self, id: ChannelId) -> usize {
        self.channels
            .iter()
            .find(|channel| channel.id == id)
            .map_or(0, |channel| channel.expedited.len() + channel.sequenced.len())
    }

    fn next_segment(&self) -> Option<Segment> {
        let count = self.channels.len();
        let capacity = frame::data_capacity(self.frame_size);

        (0..count)
            .map(|step| (self.next_channel + step) % count)
            .find_map(|index| {
                let channel = &self.channels[index];
                let (sdu, qos) = channel.front()?;

                let len = (sdu.data.len() - sdu.offset).min(capacity);
                let is_final = sdu.offset + len == sdu.data.len();
                let seq_no = match qos {
                    Qos::Expedited => None,
                    Qos::SequenceControlled => Some(
                        self.frame_seq_no
                            .get(&(channel.id.sc_id, channel.id.vchannel_id))
                            .copied()
                            .unwrap_or(0),
                    ),
                };

                Some(Segment {
                    channel_index: index,
                    qos,
                    offset: sdu.offset,
                    len,
                    part: PayloadPartCookie {
                        cookie: sdu.cookie,
                        part_no: sdu.next_part,
                        is_final,
                    },
                    seq_no,
                })
            })
    }

    fn params(&self, segment: &Segment) -> FrameParams {
        let mut payload_cookies = PartCookies::new();
        payload_cookies.push(segment.part);
        FrameParams {
            channel_id: self.channels[segment.channel_index].id,
            payload_cookies,
            frame_seq_no: segment.seq_no,
        }
    }
}

impl OutputStack for MuxStack {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn has_map_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.iter().any(|channel| channel.id == channel_id)
    }

    fn submit_sdu(
        &mut self,
        channel_id: ChannelId,
        cookie: PayloadCookie,
        data: &[u8],
        qos: Qos,
    ) -> Result<(), StackError> {
        let channel = self
            .channels
            .iter_mut()
            .find(|channel| channel.id == channel_id)
            .ok_or(StackError::UnknownChannel(channel_id))?;

        if data.is_empty() {
            return Err(StackError::InvalidSdu("empty sdu".to_string()));
        }
        if data.len() > MAX_SDU_SIZE {
            return Err(StackError::SduTooLarge { size: data.len(), limit: MAX_SDU_SIZE });
        }
        if channel.kind == MapKind::Packet {
            let header = EppHeader::read(data)
                .map_err(|e| StackError::InvalidSdu(format!("bad epp packet: {e}")))?;
            if header.packet_len as usize != data.len() {
                return Err(StackError::InvalidSdu(format!(
                    "epp packet length {} does not match sdu size {}",
                    header.packet_len,
                    data.len()
                )));
            }
        }

        let sdu = QueuedSdu {
            cookie,
            data: data.to_vec(),
            offset: 0,
            next_part: 0,
        };
        channel
            .queue_mut(qos)
            .push_back(sdu)
            .map_err(|_| StackError::ChannelFull(channel_id))?;

        debug!("queued {} bytes sdu cookie {} on {} ({})", data.len(), cookie, channel_id, qos);
        Ok(())
    }

    fn peek_frame(&self) -> Option<FrameParams> {
        self.next_segment().map(|segment| self.params(&segment))
    }

    fn pop_frame(&mut self, buf: &mut [u8]) -> Result<FrameParams, StackError> {
        if buf.len() != self.frame_size {
            return Err(StackError::FrameSizeMismatch {
                expected: self.frame_size,
                given: buf.len(),
            });
        }
        let segment = self.next_segment().ok_or(StackError::NoFrameReady)?;
        let params = self.params(&segment);

        let channel = &mut self.channels[segment.channel_index];
        let upid = match channel.kind {
            MapKind::Access => frame::UPID_MAPA_SDU,
            MapKind::Packet => frame::UPID_PACKETS,
        };
        let vc_key = (channel.id.sc_id, channel.id.vchannel_id);
        let queue = channel.queue_mut(segment.qos);
        let Some(sdu) = queue.front_mut() else {
            return Err(StackError::NoFrameReady);
        };

        let header = FrameHeader {
            channel_id: params.channel_id,
            bypass: segment.qos == Qos::Expedited,
            seq_no: segment.seq_no,
            rule: ConstructionRule::for_segment(segment.offset == 0, segment.part.is_final),
            upid,
            data_len: segment.len as u16,
        };
        frame::encode(
            &header,
            &sdu.data[segment.offset..segment.offset + segment.len],
            buf,
        )?;

        sdu.offset += segment.len;
        sdu.next_part += 1;
        if segment.part.is_final {
            queue.pop_front();
        }

        if let Some(seq_no) = segment.seq_no {
            self.frame_seq_no.insert(vc_key, seq_no.wrapping_add(1));
        }
        self.next_channel = (segment.channel_index + 1) % self.channels.len();

        trace!(
            "emitted frame for {} with {} ({} bytes)",
            params.channel_id,
            segment.part,
            segment.len
        );
        Ok(params)
    }
}
