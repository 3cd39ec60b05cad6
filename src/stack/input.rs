use super::frame::{self, ConstructionRule};
use super::{InputStack, MapKind, MapSduEvent};
use crate::error::StackError;
use crate::ids::{ChannelId, Qos};
use crate::protocol::SduFlags;
use super::output::MAX_SDU_SIZE;
use tracing::{debug, warn};

#[derive(Debug)]
struct Reassembly {
    qos: Qos,
    flags: SduFlags,
    data: Vec<u8>,
    expected_seq_no: Option<u16>,
}

#[derive(Debug)]
struct MapAcceptor {
    id: ChannelId,
    kind: MapKind,
    pending: Option<Reassembly>,
}

impl MapAcceptor {
    fn event(&self, qos: Qos, flags: SduFlags, data: Vec<u8>) -> MapSduEvent {
        MapSduEvent {
            channel_id: self.id,
            qos,
            flags: flags | self.kind.flag(),
            data,
        }
    }

    /// Emits whatever was collected so far as an incomplete SDU.
    fn flush_incomplete(&mut self, on_sdu: &mut dyn FnMut(MapSduEvent)) {
        if let Some(pending) = self.pending.take() {
            warn!("dropping unfinished sdu on {} ({} bytes)", self.id, pending.data.len());
            let event = self.event(pending.qos, pending.flags | SduFlags::INCOMPLETE, pending.data);
            on_sdu(event);
        }
    }
}

/// Demultiplexer for frames produced by a [`super::MuxStack`] compatible
/// encoder. Segments are reassembled per MAP channel.
#[derive(Debug)]
pub struct DemuxStack {
    sc_id: u16,
    channels: Vec<MapAcceptor>,
    emit_idle: bool,
}

impl DemuxStack {
    pub fn new(sc_id: u16) -> Self {
        Self {
            sc_id,
            channels: Vec::new(),
            emit_idle: false,
        }
    }

    pub fn add_map_channel(&mut self, id: ChannelId, kind: MapKind) {
        if self.channels.iter().any(|channel| channel.id == id) {
            return;
        }
        self.channels.push(MapAcceptor { id, kind, pending: None });
    }

    /// Whether idle frames are reported as `idle` SDUs or dropped.
    pub fn emit_idle(&mut self, enabled: bool) {
        self.emit_idle = enabled;
    }
}

impl InputStack for DemuxStack {
    fn push_frame(
        &mut self,
        data: &[u8],
        on_sdu: &mut dyn FnMut(MapSduEvent),
    ) -> Result<(), StackError> {
        let (header, payload) = frame::decode(data)?;
        let qos = if header.bypass { Qos::Expedited } else { Qos::SequenceControlled };

        if header.channel_id.sc_id != self.sc_id {
            warn!(
                "dropping frame for spacecraft {:#x}, expected {:#x}",
                header.channel_id.sc_id, self.sc_id
            );
            return Ok(());
        }

        if header.upid == frame::UPID_IDLE {
            if self.emit_idle {
                on_sdu(MapSduEvent {
                    channel_id: header.channel_id,
                    qos,
                    flags: SduFlags::IDLE,
                    data: payload.to_vec(),
                });
            }
            return Ok(());
        }

        let Some(channel) = self.channels.iter_mut().find(|channel| channel.id == header.channel_id)
        else {
            debug!("stray frame for unknown map channel {}", header.channel_id);
            on_sdu(MapSduEvent {
                channel_id: header.channel_id,
                qos,
                flags: SduFlags::STRAY,
                data: payload.to_vec(),
            });
            return Ok(());
        };

        match header.rule {
            ConstructionRule::Unsegmented => {
                channel.flush_incomplete(on_sdu);
                let event = channel.event(qos, SduFlags::empty(), payload.to_vec());
                on_sdu(event);
            }
            ConstructionRule::SegmentStart => {
                channel.flush_incomplete(on_sdu);
                channel.pending = Some(Reassembly {
                    qos,
                    flags: SduFlags::empty(),
                    data: payload.to_vec(),
                    expected_seq_no: header.seq_no.map(|seq_no| seq_no.wrapping_add(1)),
                });
            }
            ConstructionRule::SegmentContinue | ConstructionRule::SegmentLast => {
                let pending = channel.pending.get_or_insert_with(|| {
                    warn!("segment without start on {}", header.channel_id);
                    Reassembly {
                        qos,
                        flags: SduFlags::INCOMPLETE,
                        data: Vec::new(),
                        expected_seq_no: None,
                    }
                });

                if let (Some(expected), Some(got)) = (pending.expected_seq_no, header.seq_no) {
                    if expected != got {
                        warn!(
                            "frame sequence gap on {}: expected {}, got {}",
                            header.channel_id, expected, got
                        );
                        pending.flags.insert(SduFlags::INCOMPLETE | SduFlags::CORRUPTED);
                    }
                }
                pending.expected_seq_no = header.seq_no.map(|seq_no| seq_no.wrapping_add(1));
                pending.data.extend_from_slice(payload);

                if pending.data.len() > MAX_SDU_SIZE {
                    channel.flush_incomplete(on_sdu);
                } else if header.rule == ConstructionRule::SegmentLast {
                    if let Some(done) = channel.pending.take() {
                        let event = channel.event(done.qos, done.flags, done.data);
                        on_sdu(event);
                    }
                }
            }
        }

        Ok(())
    }
}
