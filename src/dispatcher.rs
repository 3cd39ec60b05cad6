//! Frame-lifecycle dispatcher.
//!
//! Synchronous state machine between the bus and the USLP stack. Every
//! handler takes the current time explicitly and writes its outbound messages
//! into an ordered outbox which the server loop drains with
//! [`Dispatcher::take_outbound`].

use crate::epp::EppHeader;
use crate::error::StackError;
use crate::frames::{FrameOutcome, FrameState, FrameTracker};
use crate::ids::PayloadPartCookie;
use crate::protocol::{
    InboundMessage, OutboundMessage, RadioDownlinkFrame, RadioUplinkFrame, RadioUplinkState,
    SduDownlink, SduEventKind, SduFlags, SduUplinkEvent, SduUplinkRequest,
};
use crate::stack::{InputStack, MapSduEvent, OutputStack};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(1000);
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long a frame may stay with the radio without a terminal report.
    pub frame_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub sdus_accepted: u64,
    pub sdus_rejected: u64,
    pub frames_sent: u64,
    pub frames_radiated: u64,
    pub frames_failed: u64,
    pub frames_timed_out: u64,
    pub downlink_frames: u64,
    pub downlink_frame_errors: u64,
    pub downlink_sdus: u64,
}

pub struct Dispatcher<O: OutputStack, I: InputStack> {
    ostack: O,
    istack: I,
    frames: FrameTracker,
    outbox: Vec<OutboundMessage>,
    last_downlink_frame_no: Option<u64>,
    stats: DispatcherStats,
}

impl<O: OutputStack, I: InputStack> Dispatcher<O, I> {
    pub fn new(ostack: O, istack: I, config: DispatcherConfig) -> Self {
        Self {
            ostack,
            istack,
            frames: FrameTracker::new(config.frame_timeout),
            outbox: Vec::new(),
            last_downlink_frame_no: None,
            stats: DispatcherStats::default(),
        }
    }

    /// Routes one inbound bus message to its handler.
    pub fn dispatch(&mut self, message: InboundMessage, now: Instant) {
        match message {
            InboundMessage::SduUplinkRequest(request) => self.on_sdu_uplink_request(request),
            InboundMessage::RadioDownlinkFrame(frame) => self.on_radio_downlink_frame(frame),
            InboundMessage::RadioUplinkState(state) => self.on_radio_uplink_state(state, now),
            InboundMessage::Unknown { topic } => {
                error!("dropping bus message with unknown topic '{}'", topic);
            }
        }
    }

    pub fn on_sdu_uplink_request(&mut self, request: SduUplinkRequest) {
        let SduUplinkRequest { channel_id, qos, cookie, data } = request;
        let part_cookie = PayloadPartCookie::whole(cookie);

        let result = if self.ostack.has_map_channel(channel_id) {
            self.ostack.submit_sdu(channel_id, cookie, &data, qos)
        } else {
            Err(StackError::UnknownChannel(channel_id))
        };

        match result {
            Ok(()) => {
                info!(
                    "accepted {} bytes sdu cookie {} for {} ({})",
                    data.len(),
                    cookie,
                    channel_id,
                    qos
                );
                self.stats.sdus_accepted += 1;
                self.emit_sdu_event(SduUplinkEvent::new(
                    channel_id,
                    part_cookie,
                    SduEventKind::SduAccepted,
                ));
            }
            Err(e) => {
                error!("unable to accept sdu cookie {} for {}: {}", cookie, channel_id, e);
                self.stats.sdus_rejected += 1;
                let mut event = SduUplinkEvent::new(channel_id, part_cookie, SduEventKind::SduRejected);
                event.comment = Some(e.to_string());
                self.emit_sdu_event(event);
            }
        }
    }

    pub fn on_radio_downlink_frame(&mut self, frame: RadioDownlinkFrame) {
        trace!(
            "got downlink frame no {} cookie {} ({} bytes)",
            frame.frame_no,
            frame.cookie,
            frame.data.len()
        );
        self.stats.downlink_frames += 1;

        if !frame.checksum_valid {
            warn!("downlink frame no {} has invalid checksum", frame.frame_no);
        }
        if let Some(previous) = self.last_downlink_frame_no {
            if !is_consecutive_frame_no(previous, frame.frame_no) {
                warn!(
                    "downlink frame no {} does not follow {}, frames may be lost",
                    frame.frame_no, previous
                );
            }
        }
        self.last_downlink_frame_no = Some(frame.frame_no);

        let outbox = &mut self.outbox;
        let stats = &mut self.stats;
        let result = self.istack.push_frame(&frame.data, &mut |event| {
            stats.downlink_sdus += 1;
            outbox.push(relay_downlink_sdu(event).into());
        });

        if let Err(e) = result {
            self.stats.downlink_frame_errors += 1;
            error!("unable to accept downlink frame no {}: {}", frame.frame_no, e);
        }
    }

    /// Applies a radio report: timeouts first, then the reported cookies, then
    /// decides whether the radio can take another frame.
    pub fn on_radio_uplink_state(&mut self, state: RadioUplinkState, now: Instant) {
        trace!("radio uplink state {:?}", state);

        self.sweep_timeouts(now);

        for outcome in self.frames.apply_report(&state) {
            self.fan_out(outcome);
        }

        self.decide_next_uplink_frame(&state, now);
    }

    /// Fails every frame the radio kept for longer than the frame timeout.
    pub fn sweep_timeouts(&mut self, now: Instant) {
        for outcome in self.frames.sweep_expired(now) {
            self.fan_out(outcome);
        }
    }

    /// Outbound messages produced since the last call, in production order.
    pub fn take_outbound(&mut self) -> Vec<OutboundMessage> {
        core::mem::take(&mut self.outbox)
    }

    pub fn frames(&self) -> &FrameTracker {
        &self.frames
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats
    }

    pub fn output_stack(&self) -> &O {
        &self.ostack
    }

    pub fn input_stack(&self) -> &I {
        &self.istack
    }

    pub fn output_stack_mut(&mut self) -> &mut O {
        &mut self.ostack
    }

    pub fn input_stack_mut(&mut self) -> &mut I {
        &mut self.istack
    }

    fn decide_next_uplink_frame(&mut self, state: &RadioUplinkState, now: Instant) {
        if state.cookie_in_wait.is_some() {
            trace!("radio is not ready for another uplink frame");
            return;
        }
        if self.frames.radio_slot_busy() {
            // radio reports a free slot while we still think it holds our frame
            trace!("radio is ready for next uplink frame, but one is still on its way");
            return;
        }
        if self.frames.is_full() {
            warn!(
                "{} frames are awaiting radio reports, holding back the next one",
                self.frames.len()
            );
            return;
        }
        if self.ostack.peek_frame().is_none() {
            trace!("uslp stack has no frame ready");
            return;
        }

        let mut data = vec![0u8; self.ostack.frame_size()];
        let params = match self.ostack.pop_frame(&mut data) {
            Ok(params) => params,
            Err(e) => {
                error!("unable to pop uplink frame from uslp stack: {}", e);
                return;
            }
        };

        let frame_cookie = self.frames.next_cookie();
        debug!(
            "sending frame {} for {} with {} sdu parts to radio",
            frame_cookie,
            params.channel_id,
            params.payload_cookies.len()
        );
        self.outbox.push(RadioUplinkFrame { cookie: frame_cookie, data }.into());
        for part_cookie in &params.payload_cookies {
            self.emit_sdu_event(SduUplinkEvent::new(
                params.channel_id,
                *part_cookie,
                SduEventKind::SduSentToRadio,
            ));
        }
        self.stats.frames_sent += 1;

        if let Err(params) = self.frames.track(frame_cookie, params, now) {
            error!(
                "frame queue overflow, frame {} for {} is not tracked",
                frame_cookie, params.channel_id
            );
        }
    }

    fn fan_out(&mut self, outcome: FrameOutcome) {
        let FrameOutcome { entry, timed_out } = outcome;

        let kind = match entry.state {
            FrameState::Radiated => {
                self.stats.frames_radiated += 1;
                SduEventKind::SduRadiated
            }
            _ if timed_out => {
                self.stats.frames_timed_out += 1;
                SduEventKind::SduRadiationFailed
            }
            _ => {
                self.stats.frames_failed += 1;
                SduEventKind::SduRadiationFailed
            }
        };

        for part_cookie in &entry.sdu_part_cookies {
            match kind {
                SduEventKind::SduRadiated => {
                    info!("radiated payload part {} on {}", part_cookie, entry.channel_id)
                }
                _ if timed_out => error!(
                    "payload part {} on {} timed out with frame {}",
                    part_cookie, entry.channel_id, entry.frame_cookie
                ),
                _ => error!(
                    "payload part {} on {} failed with frame {}",
                    part_cookie, entry.channel_id, entry.frame_cookie
                ),
            }
            self.emit_sdu_event(SduUplinkEvent::new(entry.channel_id, *part_cookie, kind));
        }
    }

    fn emit_sdu_event(&mut self, event: SduUplinkEvent) {
        self.outbox.push(event.into());
    }
}

/// Downlink frame numbers come from a 16 bit counter on the radio side.
pub fn is_consecutive_frame_no(previous: u64, current: u64) -> bool {
    if current == previous.wrapping_add(1) {
        return true;
    }
    previous == u64::from(u16::MAX) && current == 0
}

fn relay_downlink_sdu(event: MapSduEvent) -> SduDownlink {
    let MapSduEvent { channel_id, qos, flags, data } = event;
    info!(
        "got downlink sdu on {} ({} bytes, flags: {})",
        channel_id,
        data.len(),
        flags
    );

    let stripped = if flags.contains(SduFlags::MAPP) {
        match EppHeader::split(&data) {
            Ok((header, payload)) => {
                if header.packet_len as usize != data.len() {
                    warn!(
                        "epp header on {} declares {} bytes, sdu has {}",
                        channel_id,
                        header.packet_len,
                        data.len()
                    );
                }
                Some(payload.to_vec())
            }
            Err(e) => {
                warn!("unable to strip epp header on {}: {}, relaying raw bytes", channel_id, e);
                None
            }
        }
    } else {
        None
    };
    let data = stripped.unwrap_or(data);

    SduDownlink { channel_id, qos, flags, data }
}
